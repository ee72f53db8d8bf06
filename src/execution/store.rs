//! Execution Store
//!
//! Authoritative in-memory list of executions per document. All writes are attributed to
//! one source:
//!
//! - **mutations** (`insert`, `transition`, `patch_outputs`, `remove`) are issued by the
//!   coordinator after the generation service acknowledged a request. Status changes go
//!   through compare-and-swap on the last known status and open a new round (`epoch`).
//! - **observations** (`apply_observation`) come from polls. They carry the epoch they
//!   were issued under and may only move the status forward within that round; stale or
//!   regressive observations are dropped and logged.
//!
//! The store also indexes the single in-flight execution of each document and refuses any
//! write that would put a second one in flight. Every effective change is published to the
//! registered observers after the write lock is released.

use crate::error::StoreError;
use crate::execution::model::{Execution, OutputPatch};
use crate::execution::status::ExecutionStatus;
use crate::types::{DocumentId, ExecutionId, SectionOutputId};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Change published to store observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    Inserted {
        document_id: DocumentId,
        execution_id: ExecutionId,
        status: ExecutionStatus,
    },
    StatusChanged {
        document_id: DocumentId,
        execution_id: ExecutionId,
        from: ExecutionStatus,
        to: ExecutionStatus,
    },
    SectionsReplaced {
        document_id: DocumentId,
        execution_id: ExecutionId,
        outputs: Vec<SectionOutputId>,
    },
    Removed {
        document_id: DocumentId,
        execution_id: ExecutionId,
    },
}

impl StoreEvent {
    pub fn document_id(&self) -> &DocumentId {
        match self {
            StoreEvent::Inserted { document_id, .. }
            | StoreEvent::StatusChanged { document_id, .. }
            | StoreEvent::SectionsReplaced { document_id, .. }
            | StoreEvent::Removed { document_id, .. } => document_id,
        }
    }

    pub fn execution_id(&self) -> &ExecutionId {
        match self {
            StoreEvent::Inserted { execution_id, .. }
            | StoreEvent::StatusChanged { execution_id, .. }
            | StoreEvent::SectionsReplaced { execution_id, .. }
            | StoreEvent::Removed { execution_id, .. } => execution_id,
        }
    }
}

/// Subscriber to store changes
pub trait StoreObserver: Send + Sync {
    fn on_store_event(&self, event: &StoreEvent);
}

/// A polled status (and content) for one execution
#[derive(Debug, Clone)]
pub struct Observation {
    /// Round the poll was issued under
    pub epoch: u64,
    pub status: ExecutionStatus,
    pub outputs: OutputPatch,
}

/// Result of applying an observation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationOutcome {
    /// Status moved forward (content may also have changed)
    Advanced {
        from: ExecutionStatus,
        to: ExecutionStatus,
    },
    /// Same status, new content
    ContentUpdated,
    /// Nothing changed
    Unchanged,
    /// Record was unknown and has been inserted (hydration only)
    Inserted,
    /// Observation belongs to an earlier round
    Stale { current_epoch: u64 },
    /// Observation would move the status backward
    Regression {
        current: ExecutionStatus,
        observed: ExecutionStatus,
    },
}

impl ObservationOutcome {
    pub fn was_applied(&self) -> bool {
        matches!(
            self,
            ObservationOutcome::Advanced { .. }
                | ObservationOutcome::ContentUpdated
                | ObservationOutcome::Unchanged
                | ObservationOutcome::Inserted
        )
    }
}

#[derive(Default)]
struct StoreInner {
    executions: HashMap<ExecutionId, Execution>,
    /// Insertion order per document
    by_document: HashMap<DocumentId, Vec<ExecutionId>>,
    in_flight: HashMap<DocumentId, ExecutionId>,
}

impl StoreInner {
    fn check_single_flight(
        &self,
        document_id: &DocumentId,
        execution_id: &ExecutionId,
        status: ExecutionStatus,
    ) -> Result<(), StoreError> {
        if !status.is_in_flight() {
            return Ok(());
        }
        match self.in_flight.get(document_id) {
            Some(existing) if existing != execution_id => Err(StoreError::SingleFlightViolation {
                document_id: document_id.clone(),
                existing: existing.clone(),
                attempted: execution_id.clone(),
            }),
            _ => Ok(()),
        }
    }

    fn index_status(&mut self, document_id: &DocumentId, execution_id: &ExecutionId, status: ExecutionStatus) {
        if status.is_in_flight() {
            self.in_flight.insert(document_id.clone(), execution_id.clone());
        } else if self.in_flight.get(document_id) == Some(execution_id) {
            self.in_flight.remove(document_id);
        }
    }
}

/// Execution Store
pub struct ExecutionStore {
    inner: RwLock<StoreInner>,
    observers: RwLock<Vec<Arc<dyn StoreObserver>>>,
}

impl Default for ExecutionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn subscribe(&self, observer: Arc<dyn StoreObserver>) {
        self.observers.write().push(observer);
    }

    /// Executions of a document, newest first.
    pub fn list(&self, document_id: &DocumentId) -> Vec<Execution> {
        let inner = self.inner.read();
        let Some(ids) = inner.by_document.get(document_id) else {
            return Vec::new();
        };
        let mut out: Vec<(usize, Execution)> = ids
            .iter()
            .enumerate()
            .filter_map(|(pos, id)| inner.executions.get(id).map(|e| (pos, e.clone())))
            .collect();
        out.sort_by(|(pa, a), (pb, b)| (b.created_at, *pb).cmp(&(a.created_at, *pa)));
        out.into_iter().map(|(_, e)| e).collect()
    }

    pub fn get(&self, execution_id: &ExecutionId) -> Result<Execution, StoreError> {
        self.inner
            .read()
            .executions
            .get(execution_id)
            .cloned()
            .ok_or_else(|| StoreError::ExecutionNotFound(execution_id.clone()))
    }

    pub fn contains(&self, execution_id: &ExecutionId) -> bool {
        self.inner.read().executions.contains_key(execution_id)
    }

    /// The execution currently occupying the document's single-flight slot.
    pub fn in_flight(&self, document_id: &DocumentId) -> Option<ExecutionId> {
        self.inner.read().in_flight.get(document_id).cloned()
    }

    /// Execution shown by default: the most recently created approved one, else the most
    /// recently created one that did not fail or get cancelled.
    pub fn active(&self, document_id: &DocumentId) -> Option<Execution> {
        let inner = self.inner.read();
        let ids = inner.by_document.get(document_id)?;
        let candidates = ids
            .iter()
            .enumerate()
            .filter_map(|(pos, id)| inner.executions.get(id).map(|e| (pos, e)));

        let newest = |items: Vec<(usize, &Execution)>| {
            items
                .into_iter()
                .max_by(|(pa, a), (pb, b)| (a.created_at, *pa).cmp(&(b.created_at, *pb)))
                .map(|(_, e)| e.clone())
        };

        let (approved, others): (Vec<_>, Vec<_>) = candidates
            .filter(|(_, e)| !matches!(e.status, ExecutionStatus::Failed | ExecutionStatus::Cancelled))
            .partition(|(_, e)| e.status == ExecutionStatus::Approved);
        newest(approved).or_else(|| newest(others))
    }

    /// Insert a new execution.
    pub fn insert(&self, execution: Execution) -> Result<(), StoreError> {
        let event = {
            let mut inner = self.inner.write();
            if inner.executions.contains_key(&execution.id) {
                return Err(StoreError::DuplicateExecution(execution.id.clone()));
            }
            inner.check_single_flight(&execution.document_id, &execution.id, execution.status)?;
            inner.index_status(&execution.document_id, &execution.id, execution.status);
            inner
                .by_document
                .entry(execution.document_id.clone())
                .or_default()
                .push(execution.id.clone());
            let event = StoreEvent::Inserted {
                document_id: execution.document_id.clone(),
                execution_id: execution.id.clone(),
                status: execution.status,
            };
            inner.executions.insert(execution.id.clone(), execution);
            event
        };
        debug!(execution_id = %event.execution_id(), "Inserted execution");
        self.publish(vec![event]);
        Ok(())
    }

    /// Compare-and-swap a status as the result of a mutation; opens a new round.
    pub fn transition(
        &self,
        execution_id: &ExecutionId,
        expected: ExecutionStatus,
        next: ExecutionStatus,
    ) -> Result<Execution, StoreError> {
        let (snapshot, event) = {
            let mut inner = self.inner.write();
            let (document_id, actual) = {
                let exec = inner
                    .executions
                    .get(execution_id)
                    .ok_or_else(|| StoreError::ExecutionNotFound(execution_id.clone()))?;
                (exec.document_id.clone(), exec.status)
            };
            if actual != expected {
                return Err(StoreError::StatusConflict {
                    execution_id: execution_id.clone(),
                    expected,
                    actual,
                });
            }
            inner.check_single_flight(&document_id, execution_id, next)?;
            inner.index_status(&document_id, execution_id, next);
            let exec = inner
                .executions
                .get_mut(execution_id)
                .ok_or_else(|| StoreError::ExecutionNotFound(execution_id.clone()))?;
            exec.status = next;
            exec.epoch += 1;
            let event = StoreEvent::StatusChanged {
                document_id,
                execution_id: execution_id.clone(),
                from: actual,
                to: next,
            };
            (exec.clone(), event)
        };
        debug!(
            execution_id = %execution_id,
            from = %expected,
            to = %next,
            epoch = snapshot.epoch,
            "Transitioned execution"
        );
        self.publish(vec![event]);
        Ok(snapshot)
    }

    /// Apply a polled status within its round.
    pub fn apply_observation(
        &self,
        execution_id: &ExecutionId,
        observation: Observation,
    ) -> Result<ObservationOutcome, StoreError> {
        let (outcome, events) = {
            let mut inner = self.inner.write();
            let (document_id, current, epoch) = {
                let exec = inner
                    .executions
                    .get(execution_id)
                    .ok_or_else(|| StoreError::ExecutionNotFound(execution_id.clone()))?;
                (exec.document_id.clone(), exec.status, exec.epoch)
            };

            if observation.epoch != epoch {
                drop(inner);
                warn!(
                    execution_id = %execution_id,
                    observed_epoch = observation.epoch,
                    current_epoch = epoch,
                    observed = %observation.status,
                    "Ignoring status from an earlier round"
                );
                return Ok(ObservationOutcome::Stale {
                    current_epoch: epoch,
                });
            }

            let advances = observation.status != current;
            if advances && !current.can_advance_to(observation.status) {
                drop(inner);
                warn!(
                    execution_id = %execution_id,
                    current = %current,
                    observed = %observation.status,
                    "Ignoring regressive status"
                );
                return Ok(ObservationOutcome::Regression {
                    current,
                    observed: observation.status,
                });
            }
            if advances {
                inner.check_single_flight(&document_id, execution_id, observation.status)?;
                inner.index_status(&document_id, execution_id, observation.status);
            }

            let exec = inner
                .executions
                .get_mut(execution_id)
                .ok_or_else(|| StoreError::ExecutionNotFound(execution_id.clone()))?;
            let changed_outputs = exec.apply_patch(observation.outputs);
            let mut events = Vec::new();
            if !changed_outputs.is_empty() {
                events.push(StoreEvent::SectionsReplaced {
                    document_id: document_id.clone(),
                    execution_id: execution_id.clone(),
                    outputs: changed_outputs,
                });
            }
            let outcome = if advances {
                exec.status = observation.status;
                events.push(StoreEvent::StatusChanged {
                    document_id,
                    execution_id: execution_id.clone(),
                    from: current,
                    to: observation.status,
                });
                ObservationOutcome::Advanced {
                    from: current,
                    to: observation.status,
                }
            } else if events.is_empty() {
                ObservationOutcome::Unchanged
            } else {
                ObservationOutcome::ContentUpdated
            };
            (outcome, events)
        };
        self.publish(events);
        Ok(outcome)
    }

    /// Replace section outputs as the result of a mutation (edit, delete).
    pub fn patch_outputs(
        &self,
        execution_id: &ExecutionId,
        patch: OutputPatch,
    ) -> Result<Execution, StoreError> {
        let (snapshot, events) = {
            let mut inner = self.inner.write();
            let exec = inner
                .executions
                .get_mut(execution_id)
                .ok_or_else(|| StoreError::ExecutionNotFound(execution_id.clone()))?;
            let changed = exec.apply_patch(patch);
            let events = if changed.is_empty() {
                Vec::new()
            } else {
                vec![StoreEvent::SectionsReplaced {
                    document_id: exec.document_id.clone(),
                    execution_id: execution_id.clone(),
                    outputs: changed,
                }]
            };
            (exec.clone(), events)
        };
        self.publish(events);
        Ok(snapshot)
    }

    /// Merge an authoritative record (hydration) into the store.
    ///
    /// Unknown executions are inserted. A known execution that another client moved into a
    /// new round (regenerated, approved, disapproved) takes the listed status as a mutation
    /// and opens a new round; everything else is applied as an observation in the current
    /// round so a stale listing never regresses a newer local status.
    pub fn merge(&self, execution: Execution) -> Result<ObservationOutcome, StoreError> {
        let current = match self.get(&execution.id) {
            Ok(existing) => existing,
            Err(StoreError::ExecutionNotFound(_)) => {
                let mut execution = execution;
                execution.epoch = 0;
                self.insert(execution)?;
                return Ok(ObservationOutcome::Inserted);
            }
            Err(other) => return Err(other),
        };
        let id = execution.id.clone();
        // Listings may omit outputs; an empty list keeps what is stored.
        let outputs = if execution.sections.is_empty() {
            OutputPatch::Keep
        } else {
            OutputPatch::ReplaceAll(execution.sections)
        };

        if current.status.can_reopen_as(execution.status) {
            self.transition(&id, current.status, execution.status)?;
            if !outputs.is_keep() {
                self.patch_outputs(&id, outputs)?;
            }
            debug!(
                execution_id = %id,
                from = %current.status,
                to = %execution.status,
                "Adopted status changed by another client"
            );
            return Ok(ObservationOutcome::Advanced {
                from: current.status,
                to: execution.status,
            });
        }

        self.apply_observation(
            &id,
            Observation {
                epoch: current.epoch,
                status: execution.status,
                outputs,
            },
        )
    }

    /// Remove an execution.
    pub fn remove(&self, execution_id: &ExecutionId) -> Result<Execution, StoreError> {
        let removed = {
            let mut inner = self.inner.write();
            let removed = inner
                .executions
                .remove(execution_id)
                .ok_or_else(|| StoreError::ExecutionNotFound(execution_id.clone()))?;
            if let Some(ids) = inner.by_document.get_mut(&removed.document_id) {
                ids.retain(|id| id != execution_id);
            }
            if inner.in_flight.get(&removed.document_id) == Some(execution_id) {
                inner.in_flight.remove(&removed.document_id);
            }
            removed
        };
        debug!(execution_id = %execution_id, "Removed execution");
        self.publish(vec![StoreEvent::Removed {
            document_id: removed.document_id.clone(),
            execution_id: execution_id.clone(),
        }]);
        Ok(removed)
    }

    fn publish(&self, events: Vec<StoreEvent>) {
        if events.is_empty() {
            return;
        }
        let observers = self.observers.read().clone();
        for event in &events {
            for observer in &observers {
                observer.on_store_event(event);
            }
        }
    }
}
