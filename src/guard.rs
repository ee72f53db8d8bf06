//! Mutual-Exclusion Guard
//!
//! Decides whether a mutating operation may start on a document. A document has one slot:
//! empty, reserved by an operation that is waiting on the generation service, or holding the
//! tracking entry of the execution that operation put in flight. The execution store's
//! in-flight index is consulted as well, so executions that became in flight elsewhere
//! (another tab, hydration) also block.
//!
//! `decide` is a pure query. `admit` runs the same decision and claims the slot under one
//! lock, so two racing callers can never both be allowed.

use crate::error::CoordinatorError;
use crate::execution::{ExecutionMode, ExecutionStatus, ExecutionStore};
use crate::types::{DocumentId, ExecutionId, SectionId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// A mutating operation, as seen by the guard
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardedOperation {
    Create(ExecutionMode),
    Regenerate {
        execution_id: ExecutionId,
        mode: ExecutionMode,
    },
    Approve(ExecutionId),
    Disapprove(ExecutionId),
    Clone(ExecutionId),
    Delete(ExecutionId),
    EditSection(ExecutionId),
}

impl GuardedOperation {
    pub fn name(&self) -> &'static str {
        match self {
            GuardedOperation::Create(_) => "create",
            GuardedOperation::Regenerate { .. } => "regenerate",
            GuardedOperation::Approve(_) => "approve",
            GuardedOperation::Disapprove(_) => "disapprove",
            GuardedOperation::Clone(_) => "clone",
            GuardedOperation::Delete(_) => "delete",
            GuardedOperation::EditSection(_) => "edit_section",
        }
    }
}

/// What an in-flight execution is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedOperation {
    Generation(ExecutionMode),
    Approval { reverts_to: ExecutionStatus },
}

/// Tracking table entry for an execution put in flight through the guard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingEntry {
    pub document_id: DocumentId,
    pub execution_id: ExecutionId,
    pub operation: TrackedOperation,
    /// Target section for partial regenerations
    pub section_id: Option<SectionId>,
}

impl TrackingEntry {
    fn admits_reentry(&self, operation: &GuardedOperation) -> bool {
        match (operation, self.operation) {
            (
                GuardedOperation::Regenerate { execution_id, mode },
                TrackedOperation::Generation(tracked_mode),
            ) => mode.is_partial() && *execution_id == self.execution_id && *mode == tracked_mode,
            _ => false,
        }
    }
}

/// Outcome of a guard check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Allowed,
    /// Idempotent re-entry into an operation that is already tracked
    Attach(TrackingEntry),
    Rejected {
        document_id: DocumentId,
        in_flight: Option<ExecutionId>,
    },
}

impl GuardDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardDecision::Allowed)
    }
}

#[derive(Debug, Clone)]
enum Slot {
    Reserved { token: u64, operation: &'static str },
    Tracking(TrackingEntry),
}

/// Mutual-Exclusion Guard
pub struct MutualExclusionGuard {
    slots: Mutex<HashMap<DocumentId, Slot>>,
    next_token: AtomicU64,
}

impl Default for MutualExclusionGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Admission granted by [`MutualExclusionGuard::admit`]
pub enum Admission<'a> {
    Reserved(Reservation<'a>),
    Attached(TrackingEntry),
}

impl MutualExclusionGuard {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next_token: AtomicU64::new(1),
        }
    }

    /// Decide whether `operation` may start on `document_id`. Performs no writes.
    pub fn decide(
        &self,
        store: &ExecutionStore,
        document_id: &DocumentId,
        operation: &GuardedOperation,
    ) -> GuardDecision {
        let slots = self.slots.lock();
        Self::decide_locked(&slots, store, document_id, operation)
    }

    fn decide_locked(
        slots: &HashMap<DocumentId, Slot>,
        store: &ExecutionStore,
        document_id: &DocumentId,
        operation: &GuardedOperation,
    ) -> GuardDecision {
        match slots.get(document_id) {
            Some(Slot::Reserved { .. }) => {
                return GuardDecision::Rejected {
                    document_id: document_id.clone(),
                    in_flight: store.in_flight(document_id),
                };
            }
            Some(Slot::Tracking(entry)) if Self::is_live(store, entry) => {
                if entry.admits_reentry(operation) {
                    return GuardDecision::Attach(entry.clone());
                }
                return GuardDecision::Rejected {
                    document_id: document_id.clone(),
                    in_flight: Some(entry.execution_id.clone()),
                };
            }
            _ => {}
        }

        match store.in_flight(document_id) {
            Some(in_flight) => GuardDecision::Rejected {
                document_id: document_id.clone(),
                in_flight: Some(in_flight),
            },
            None => GuardDecision::Allowed,
        }
    }

    fn is_live(store: &ExecutionStore, entry: &TrackingEntry) -> bool {
        store
            .get(&entry.execution_id)
            .map(|exec| exec.status.is_in_flight())
            .unwrap_or(false)
    }

    /// Decide and, when allowed, claim the document's slot.
    ///
    /// The returned reservation releases the slot on drop unless it is committed.
    pub fn admit(
        &self,
        store: &ExecutionStore,
        document_id: &DocumentId,
        operation: &GuardedOperation,
    ) -> Result<Admission<'_>, CoordinatorError> {
        let mut slots = self.slots.lock();
        match Self::decide_locked(&slots, store, document_id, operation) {
            GuardDecision::Allowed => {
                let token = self.next_token.fetch_add(1, Ordering::Relaxed);
                slots.insert(
                    document_id.clone(),
                    Slot::Reserved {
                        token,
                        operation: operation.name(),
                    },
                );
                Ok(Admission::Reserved(Reservation {
                    guard: self,
                    document_id: document_id.clone(),
                    token,
                    committed: false,
                }))
            }
            GuardDecision::Attach(entry) => {
                debug!(
                    document_id = %document_id,
                    execution_id = %entry.execution_id,
                    "Attached to tracked regeneration"
                );
                Ok(Admission::Attached(entry))
            }
            GuardDecision::Rejected {
                document_id,
                in_flight,
            } => {
                debug!(
                    document_id = %document_id,
                    operation = operation.name(),
                    in_flight = ?in_flight,
                    "Rejected operation: document busy"
                );
                Err(CoordinatorError::ExecutionInProgress {
                    document_id,
                    in_flight,
                })
            }
        }
    }

    /// Tracking entry currently held for a document, if any.
    pub fn tracking(&self, document_id: &DocumentId) -> Option<TrackingEntry> {
        match self.slots.lock().get(document_id) {
            Some(Slot::Tracking(entry)) => Some(entry.clone()),
            _ => None,
        }
    }

    /// Name of the operation holding a reservation, if any.
    pub fn reserved_by(&self, document_id: &DocumentId) -> Option<&'static str> {
        match self.slots.lock().get(document_id) {
            Some(Slot::Reserved { operation, .. }) => Some(*operation),
            _ => None,
        }
    }

    /// Drop a tracking entry once its watch has finished. Only the entry for
    /// `execution_id` is removed; a newer reservation is left alone.
    pub fn release_tracking(&self, document_id: &DocumentId, execution_id: &ExecutionId) -> bool {
        let mut slots = self.slots.lock();
        let matches = matches!(
            slots.get(document_id),
            Some(Slot::Tracking(entry)) if &entry.execution_id == execution_id
        );
        if matches {
            slots.remove(document_id);
            debug!(document_id = %document_id, execution_id = %execution_id, "Released tracking entry");
        }
        matches
    }

    fn release_reservation(&self, document_id: &DocumentId, token: u64) {
        let mut slots = self.slots.lock();
        if matches!(slots.get(document_id), Some(Slot::Reserved { token: held, .. }) if *held == token) {
            slots.remove(document_id);
        }
    }

    fn promote(&self, document_id: &DocumentId, token: u64, entry: TrackingEntry) {
        let mut slots = self.slots.lock();
        if matches!(slots.get(document_id), Some(Slot::Reserved { token: held, .. }) if *held == token) {
            slots.insert(document_id.clone(), Slot::Tracking(entry));
        }
    }
}

/// Claimed slot for one document
pub struct Reservation<'a> {
    guard: &'a MutualExclusionGuard,
    document_id: DocumentId,
    token: u64,
    committed: bool,
}

impl Reservation<'_> {
    pub fn document_id(&self) -> &DocumentId {
        &self.document_id
    }

    /// Turn the reservation into a tracking entry held until `release_tracking`.
    pub fn commit(mut self, entry: TrackingEntry) {
        self.guard.promote(&self.document_id, self.token, entry);
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.guard.release_reservation(&self.document_id, self.token);
        }
    }
}
