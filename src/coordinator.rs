//! Execution Coordinator
//!
//! Caller-facing surface of the lifecycle coordinator. Every mutating operation follows the
//! same path: validate locally, claim the document's slot in the mutual-exclusion guard,
//! call the generation service, record the acknowledged result in the store through a
//! compare-and-swap transition, then hand the operation to a completion watch. Nothing
//! reaches the service when a local check already fails.
//!
//! Watches report back through [`WatchFinalizer`], which releases the guard's tracking
//! entry, settles the section tracker and updates the notification ledger before any
//! subscriber sees the completion event.

use crate::approval::ApprovalStateMachine;
use crate::cache::{ViewCache, ViewKey};
use crate::config::{PollingConfig, QuireConfig};
use crate::document::{Document, DocumentLayout, DocumentRegistry, SectionKind};
use crate::error::{CoordinatorError, StoreError};
use crate::execution::{
    Execution, ExecutionMode, ExecutionStatus, ExecutionStore, ObservationOutcome, OutputPatch,
    SectionOutput,
};
use crate::guard::{
    Admission, GuardDecision, GuardedOperation, MutualExclusionGuard, Reservation, TrackedOperation,
    TrackingEntry,
};
use crate::ledger::NotificationLedger;
use crate::poller::{
    apply_generation_report, CompletionEvent, CompletionPoller, CompletionStream, FinalStatus,
    WatchFinalizer, WatchHandle, WatchKind, WatchTarget,
};
use crate::service::{CreateExecutionRequest, GenerationService, HttpGenerationService};
use crate::tracker::{RegenerationEntry, SectionDisplay, SectionRegenerationTracker};
use crate::types::{DocumentId, ExecutionId, JobId, SectionId, SectionOutputId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Parameters of an execution request
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestParams {
    pub llm_id: String,
    pub instructions: String,
    /// Target section (`single`/`from`)
    #[serde(default)]
    pub section_id: Option<SectionId>,
    /// Target execution (`single`/`from`); defaults to the active version
    #[serde(default)]
    pub execution_id: Option<ExecutionId>,
    /// Version name for new executions
    #[serde(default)]
    pub name: Option<String>,
}

/// Handle to a dispatched generation
#[derive(Debug, Clone)]
pub struct ExecutionHandle {
    pub execution_id: ExecutionId,
    pub document_id: DocumentId,
    pub mode: ExecutionMode,
    pub job_id: Option<JobId>,
    /// True when the request attached to an operation that was already running
    pub attached: bool,
    watch: WatchHandle,
}

/// Handle to a partial regeneration
pub type RegenerationHandle = ExecutionHandle;

impl ExecutionHandle {
    pub fn watch(&self) -> &WatchHandle {
        &self.watch
    }

    pub fn completion(&self) -> CompletionStream {
        self.watch.subscribe()
    }

    pub async fn wait(&self) -> Result<CompletionEvent, CoordinatorError> {
        self.watch.wait().await
    }

    pub fn cancel(&self) -> bool {
        self.watch.cancel()
    }
}

/// Handle to a pending approval
#[derive(Debug, Clone)]
pub struct ApprovalHandle {
    pub execution_id: ExecutionId,
    pub document_id: DocumentId,
    /// Status restored if approval fails
    pub reverts_to: ExecutionStatus,
    watch: WatchHandle,
}

impl ApprovalHandle {
    pub fn watch(&self) -> &WatchHandle {
        &self.watch
    }

    pub fn completion(&self) -> CompletionStream {
        self.watch.subscribe()
    }

    pub async fn wait(&self) -> Result<CompletionEvent, CoordinatorError> {
        self.watch.wait().await
    }

    pub fn cancel(&self) -> bool {
        self.watch.cancel()
    }
}

/// Row of the version list view
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionSummary {
    pub execution_id: ExecutionId,
    pub name: String,
    pub status: ExecutionStatus,
    pub created_at: DateTime<Utc>,
    pub is_active: bool,
}

/// Row of the section list view
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionView {
    pub section_id: SectionId,
    pub kind: SectionKind,
    pub title: String,
    pub order: i32,
    /// Output of the active version may be edited or deleted
    pub editable: bool,
    /// Section may be regenerated in the active version
    pub regenerable: bool,
}

/// Views held by the coordinator's cache
#[derive(Debug, Clone)]
pub enum CachedView {
    Content(Execution),
    Versions(Vec<VersionSummary>),
    Sections(Vec<SectionView>),
}

struct ActiveWatch {
    handle: WatchHandle,
    mode: ExecutionMode,
    job_id: Option<JobId>,
}

struct CoordinatorInner {
    me: Weak<CoordinatorInner>,
    service: Arc<dyn GenerationService>,
    store: Arc<ExecutionStore>,
    documents: DocumentRegistry,
    guard: MutualExclusionGuard,
    tracker: SectionRegenerationTracker,
    ledger: NotificationLedger,
    cache: Arc<ViewCache<CachedView>>,
    poller: CompletionPoller,
    watches: Mutex<HashMap<ExecutionId, ActiveWatch>>,
}

/// Execution lifecycle coordinator; clones share state.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<CoordinatorInner>,
}

impl Coordinator {
    pub fn new(service: Arc<dyn GenerationService>, polling: PollingConfig) -> Self {
        let store = Arc::new(ExecutionStore::new());
        let cache = Arc::new(ViewCache::new());
        store.subscribe(cache.clone());
        let poller = CompletionPoller::new(Arc::clone(&service), Arc::clone(&store), polling);
        let inner = Arc::new_cyclic(|me| CoordinatorInner {
            me: me.clone(),
            service,
            store,
            documents: DocumentRegistry::new(),
            guard: MutualExclusionGuard::new(),
            tracker: SectionRegenerationTracker::new(),
            ledger: NotificationLedger::new(),
            cache,
            poller,
            watches: Mutex::new(HashMap::new()),
        });
        Self { inner }
    }

    /// Coordinator talking to the configured HTTP generation service.
    pub fn from_config(config: &QuireConfig) -> Result<Self, CoordinatorError> {
        let service = HttpGenerationService::new(&config.service)
            .map_err(|e| CoordinatorError::from_service("connect", e))?;
        Ok(Self::new(Arc::new(service), config.polling.clone()))
    }

    pub fn store(&self) -> &ExecutionStore {
        &self.inner.store
    }

    pub fn polling(&self) -> &PollingConfig {
        self.inner.poller.config()
    }

    // ---- documents -------------------------------------------------------------------

    /// Register a document layout; returns its revision.
    pub fn register_document(&self, document: Document) -> u64 {
        let document_id = document.id.clone();
        let revision = self.inner.documents.register(document);
        self.inner.cache.on_layout_changed(&document_id);
        revision
    }

    /// Fetch a document from the service and register it.
    pub async fn load_document(&self, document_id: &DocumentId) -> Result<DocumentLayout, CoordinatorError> {
        let document = self
            .inner
            .service
            .get_document(document_id)
            .await
            .map_err(|e| CoordinatorError::from_service("get_document", e))?;
        let revision = self.register_document(document);
        let document = self.inner.documents.document(document_id)?;
        Ok(DocumentLayout { document, revision })
    }

    pub fn section_layout(&self, document_id: &DocumentId) -> Option<DocumentLayout> {
        self.inner.documents.get(document_id)
    }

    /// Apply a full section order based on `expected_revision`.
    pub fn reorder_sections(
        &self,
        document_id: &DocumentId,
        expected_revision: u64,
        order: &[SectionId],
    ) -> Result<u64, CoordinatorError> {
        let revision = self
            .inner
            .documents
            .reorder(document_id, expected_revision, order)?;
        self.inner.cache.on_layout_changed(document_id);
        Ok(revision)
    }

    // ---- queries ---------------------------------------------------------------------

    pub fn execution(&self, execution_id: &ExecutionId) -> Result<Execution, CoordinatorError> {
        self.inner.execution(execution_id)
    }

    pub fn executions(&self, document_id: &DocumentId) -> Vec<Execution> {
        self.inner.store.list(document_id)
    }

    pub fn active_execution(&self, document_id: &DocumentId) -> Option<Execution> {
        self.inner.store.active(document_id)
    }

    /// Guard decision for an operation, without claiming anything.
    pub fn check(&self, document_id: &DocumentId, operation: &GuardedOperation) -> GuardDecision {
        self.inner.guard.decide(&self.inner.store, document_id, operation)
    }

    /// True while `section_index` lies in the affected range of a regeneration whose watch
    /// is live. A cancelled or unresolved watch keeps its tracker entry for resumption but
    /// no longer reports sections as regenerating.
    pub fn is_section_regenerating(&self, execution_id: &ExecutionId, section_index: usize) -> bool {
        self.inner.live_watch(execution_id).is_some()
            && self.inner.tracker.is_regenerating(execution_id, section_index)
    }

    pub fn section_display(&self, execution_id: &ExecutionId, section_index: usize) -> SectionDisplay {
        match self.inner.tracker.section_display(execution_id, section_index) {
            SectionDisplay::Regenerating if self.inner.live_watch(execution_id).is_none() => SectionDisplay::Idle,
            display => display,
        }
    }

    /// Existing section content stays visible while a regeneration is in progress.
    pub fn should_display_existing(&self) -> bool {
        SectionRegenerationTracker::DISPLAY_EXISTING
    }

    pub fn failed_sections(&self, execution_id: &ExecutionId) -> Vec<usize> {
        self.inner.tracker.failed_sections(execution_id)
    }

    // ---- notifications ---------------------------------------------------------------

    pub fn should_notify(&self, document_id: &DocumentId, execution_id: &ExecutionId) -> bool {
        self.inner.ledger.should_notify(document_id, execution_id)
    }

    pub fn dismiss(&self, document_id: &DocumentId, execution_id: &ExecutionId) {
        self.inner.ledger.dismiss(document_id, execution_id)
    }

    /// The caller switched to `document_id`, showing its active version.
    pub fn focus_document(&self, document_id: &DocumentId) {
        let active = self.inner.store.active(document_id).map(|e| e.id);
        self.inner.ledger.focus(document_id, active.as_ref());
    }

    /// The caller switched versions within a document.
    pub fn select_version(&self, document_id: &DocumentId, execution_id: &ExecutionId) {
        self.inner.ledger.focus(document_id, Some(execution_id));
    }

    // ---- cached views ----------------------------------------------------------------

    pub fn content_view(&self, execution_id: &ExecutionId) -> Result<Execution, CoordinatorError> {
        let execution = self.inner.execution(execution_id)?;
        let view = self.inner.cache.get_or_compute(
            &execution.document_id,
            ViewKey::Content(execution_id.clone()),
            || Ok::<_, CoordinatorError>(CachedView::Content(execution.clone())),
        )?;
        if let CachedView::Content(cached) = view {
            return Ok(cached);
        }
        Ok(execution)
    }

    pub fn version_list(&self, document_id: &DocumentId) -> Vec<VersionSummary> {
        let store = &self.inner.store;
        let view = self.inner.cache.get_or_compute(
            document_id,
            ViewKey::VersionList(document_id.clone()),
            || {
                let active = store.active(document_id).map(|e| e.id);
                let rows = store
                    .list(document_id)
                    .into_iter()
                    .map(|e| VersionSummary {
                        is_active: active.as_ref() == Some(&e.id),
                        execution_id: e.id,
                        name: e.name,
                        status: e.status,
                        created_at: e.created_at,
                    })
                    .collect();
                Ok::<_, CoordinatorError>(CachedView::Versions(rows))
            },
        );
        match view {
            Ok(CachedView::Versions(rows)) => rows,
            _ => Vec::new(),
        }
    }

    pub fn section_list(&self, document_id: &DocumentId) -> Result<Vec<SectionView>, CoordinatorError> {
        let inner = &self.inner;
        let view = inner.cache.get_or_compute(
            document_id,
            ViewKey::SectionList(document_id.clone()),
            || {
                let document = inner.documents.document(document_id)?;
                let busy = inner.store.in_flight(document_id).is_some();
                let mutable = inner
                    .store
                    .active(document_id)
                    .is_some_and(|e| e.status.is_mutable());
                let rows = document
                    .sections
                    .iter()
                    .map(|s| SectionView {
                        section_id: s.id.clone(),
                        kind: s.kind,
                        title: s.title.clone(),
                        order: s.order,
                        editable: mutable && !busy && !s.is_read_only(),
                        regenerable: mutable && !busy && s.is_regenerable(),
                    })
                    .collect();
                Ok::<_, CoordinatorError>(CachedView::Sections(rows))
            },
        )?;
        match view {
            CachedView::Sections(rows) => Ok(rows),
            _ => Ok(Vec::new()),
        }
    }

    pub fn cache(&self) -> &ViewCache<CachedView> {
        &self.inner.cache
    }

    // ---- generation ------------------------------------------------------------------

    /// Dispatch a generation request of any mode.
    pub async fn request_execution(
        &self,
        document_id: &DocumentId,
        mode: ExecutionMode,
        params: RequestParams,
    ) -> Result<ExecutionHandle, CoordinatorError> {
        if mode.creates_execution() {
            return self.inner.create(document_id, mode, params).await;
        }

        let section_id = params.section_id.clone().ok_or_else(|| {
            CoordinatorError::InvalidRequest(format!("A {} request needs a section_id", mode))
        })?;
        let execution_id = match &params.execution_id {
            Some(id) => id.clone(),
            None => self
                .inner
                .store
                .active(document_id)
                .map(|e| e.id)
                .ok_or_else(|| {
                    CoordinatorError::InvalidRequest(format!(
                        "Document {} has no version to regenerate",
                        document_id
                    ))
                })?,
        };
        let execution = self.inner.execution(&execution_id)?;
        if &execution.document_id != document_id {
            return Err(CoordinatorError::InvalidRequest(format!(
                "Execution {} does not belong to document {}",
                execution_id, document_id
            )));
        }
        self.inner
            .regenerate(&execution_id, &section_id, mode, &params.llm_id, &params.instructions)
            .await
    }

    /// New version with every section.
    pub async fn create_full(
        &self,
        document_id: &DocumentId,
        llm_id: &str,
        instructions: &str,
    ) -> Result<ExecutionHandle, CoordinatorError> {
        self.inner
            .create(document_id, ExecutionMode::Full, params(llm_id, instructions))
            .await
    }

    /// New version with only the first section populated.
    pub async fn create_full_single(
        &self,
        document_id: &DocumentId,
        llm_id: &str,
        instructions: &str,
    ) -> Result<ExecutionHandle, CoordinatorError> {
        self.inner
            .create(document_id, ExecutionMode::FullSingle, params(llm_id, instructions))
            .await
    }

    pub async fn regenerate_single(
        &self,
        execution_id: &ExecutionId,
        section_id: &SectionId,
        llm_id: &str,
        instructions: &str,
    ) -> Result<RegenerationHandle, CoordinatorError> {
        self.inner
            .regenerate(execution_id, section_id, ExecutionMode::Single, llm_id, instructions)
            .await
    }

    pub async fn regenerate_from(
        &self,
        execution_id: &ExecutionId,
        section_id: &SectionId,
        llm_id: &str,
        instructions: &str,
    ) -> Result<RegenerationHandle, CoordinatorError> {
        self.inner
            .regenerate(execution_id, section_id, ExecutionMode::From, llm_id, instructions)
            .await
    }

    // ---- approval --------------------------------------------------------------------

    pub async fn approve(&self, execution_id: &ExecutionId) -> Result<ApprovalHandle, CoordinatorError> {
        let inner = &self.inner;
        let execution = inner.execution(execution_id)?;
        ApprovalStateMachine::begin(&execution)?;
        let document_id = execution.document_id.clone();
        let reservation = inner.reserve(&document_id, GuardedOperation::Approve(execution_id.clone()))?;

        let ticket = ApprovalStateMachine::begin(&inner.execution(execution_id)?)?;
        inner
            .service
            .approve_execution(execution_id)
            .await
            .map_err(|e| CoordinatorError::from_service("approve_execution", e))?;
        let round = inner
            .store
            .transition(execution_id, ticket.reverts_to, ExecutionStatus::Approving)?;
        info!(
            document_id = %document_id,
            execution_id = %execution_id,
            "Approval requested"
        );

        let operation = TrackedOperation::Approval {
            reverts_to: ticket.reverts_to,
        };
        reservation.commit(TrackingEntry {
            document_id: document_id.clone(),
            execution_id: execution_id.clone(),
            operation,
            section_id: None,
        });
        let watch = inner.start_watch(
            WatchTarget {
                execution_id: execution_id.clone(),
                document_id: document_id.clone(),
                epoch: round.epoch,
                kind: WatchKind::Approval {
                    reverts_to: ticket.reverts_to,
                },
            },
            ExecutionMode::Full,
            None,
        );
        Ok(ApprovalHandle {
            execution_id: execution_id.clone(),
            document_id,
            reverts_to: ticket.reverts_to,
            watch,
        })
    }

    /// Return an approved execution to the mutable draft state.
    pub async fn disapprove(&self, execution_id: &ExecutionId) -> Result<Execution, CoordinatorError> {
        let inner = &self.inner;
        let execution = inner.execution(execution_id)?;
        ApprovalStateMachine::check_disapprove(&execution)?;
        let _reservation =
            inner.reserve(&execution.document_id, GuardedOperation::Disapprove(execution_id.clone()))?;

        ApprovalStateMachine::check_disapprove(&inner.execution(execution_id)?)?;
        inner
            .service
            .disapprove_execution(execution_id)
            .await
            .map_err(|e| CoordinatorError::from_service("disapprove_execution", e))?;
        let updated = inner
            .store
            .transition(execution_id, ExecutionStatus::Approved, ExecutionStatus::Draft)?;
        info!(
            document_id = %updated.document_id,
            execution_id = %execution_id,
            "Disapproved execution"
        );
        Ok(updated)
    }

    // ---- versions --------------------------------------------------------------------

    /// Copy an execution into a new completed version.
    pub async fn clone_execution(&self, execution_id: &ExecutionId) -> Result<Execution, CoordinatorError> {
        let inner = &self.inner;
        let source = inner.execution(execution_id)?;
        let _reservation =
            inner.reserve(&source.document_id, GuardedOperation::Clone(execution_id.clone()))?;

        let source = inner.execution(execution_id)?;
        let new_id = inner
            .service
            .clone_execution(execution_id)
            .await
            .map_err(|e| CoordinatorError::from_service("clone_execution", e))?;

        let mut copy = Execution::new(
            new_id.clone(),
            source.document_id.clone(),
            format!("{} (copy)", source.name),
            source.llm_id.clone(),
            source.instructions.clone(),
        );
        copy.status = ExecutionStatus::Completed;
        copy.sections = source
            .sections
            .iter()
            .enumerate()
            .map(|(position, output)| {
                SectionOutput::new(
                    SectionOutputId::new(format!("{}:{}", new_id, position)),
                    output.section_id.clone(),
                    output.content.clone(),
                )
            })
            .collect();
        inner.store.insert(copy.clone())?;
        info!(
            document_id = %copy.document_id,
            execution_id = %new_id,
            source = %execution_id,
            "Cloned execution"
        );
        Ok(copy)
    }

    /// Delete a version; returns the new active version.
    pub async fn delete_execution(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Option<ExecutionId>, CoordinatorError> {
        let inner = &self.inner;
        let execution = inner.execution(execution_id)?;
        inner.ensure_not_read_only(&execution)?;
        let document_id = execution.document_id.clone();
        let _reservation = inner.reserve(&document_id, GuardedOperation::Delete(execution_id.clone()))?;

        inner.ensure_not_read_only(&inner.execution(execution_id)?)?;
        inner
            .service
            .delete_execution(execution_id)
            .await
            .map_err(|e| CoordinatorError::from_service("delete_execution", e))?;
        inner.forget(execution_id);
        inner.store.remove(execution_id)?;
        let active = inner.follow_active(&document_id);
        info!(
            document_id = %document_id,
            execution_id = %execution_id,
            active = ?active,
            "Deleted execution"
        );
        Ok(active)
    }

    // ---- section outputs -------------------------------------------------------------

    pub async fn edit_section_output(
        &self,
        execution_id: &ExecutionId,
        section_id: &SectionId,
        content: &str,
    ) -> Result<SectionOutput, CoordinatorError> {
        let inner = &self.inner;
        let (execution, index, _reservation) = inner.prepare_section_edit(execution_id, section_id, "edit")?;
        let mut output = inner
            .service
            .update_section_output(execution_id, section_id, content)
            .await
            .map_err(|e| CoordinatorError::from_service("update_section_output", e))?;
        if output.section_id.is_none() {
            output.section_id = Some(section_id.clone());
        }
        inner
            .store
            .patch_outputs(&execution.id, OutputPatch::Upsert(vec![(index, output.clone())]))?;
        debug!(execution_id = %execution_id, section_id = %section_id, "Edited section output");
        Ok(output)
    }

    pub async fn delete_section_output(
        &self,
        execution_id: &ExecutionId,
        section_id: &SectionId,
    ) -> Result<(), CoordinatorError> {
        let inner = &self.inner;
        let (execution, index, _reservation) =
            inner.prepare_section_edit(execution_id, section_id, "delete section of")?;
        inner
            .service
            .delete_section_output(execution_id, section_id)
            .await
            .map_err(|e| CoordinatorError::from_service("delete_section_output", e))?;
        inner.store.patch_outputs(
            &execution.id,
            OutputPatch::Remove {
                section_id: section_id.clone(),
                document_index: index,
            },
        )?;
        debug!(execution_id = %execution_id, section_id = %section_id, "Deleted section output");
        Ok(())
    }

    // ---- watches ---------------------------------------------------------------------

    /// Completion stream for an execution's current operation.
    ///
    /// Subscribes to the live watch if there is one, starts a watch for an in-flight
    /// execution nobody is watching, and yields the final status right away otherwise.
    pub fn watch_completion(
        &self,
        execution_id: &ExecutionId,
        mode: ExecutionMode,
    ) -> Result<CompletionStream, CoordinatorError> {
        let inner = &self.inner;
        if let Some(handle) = inner.live_watch(execution_id) {
            return Ok(handle.subscribe());
        }
        let execution = inner.execution(execution_id)?;
        if execution.status.is_in_flight() {
            return Ok(inner.resume_watch(&execution, mode).subscribe());
        }
        let status = FinalStatus::from_status(execution.status).unwrap_or(FinalStatus::Completed);
        Ok(CompletionStream::ready(CompletionEvent {
            execution_id: execution.id,
            document_id: execution.document_id,
            kind: WatchKind::Generation,
            status,
            failed_sections: inner.tracker.failed_sections(execution_id),
        }))
    }

    /// Stop watching an execution locally.
    pub fn cancel_watch(&self, execution_id: &ExecutionId) -> bool {
        let removed = self.inner.watches.lock().remove(execution_id);
        removed.is_some_and(|active| active.handle.cancel())
    }

    /// Fetch an execution's status once, outside the polling cadence.
    pub async fn refresh(&self, execution_id: &ExecutionId) -> Result<Execution, CoordinatorError> {
        let inner = &self.inner;
        let execution = inner.execution(execution_id)?;
        if execution.status.is_in_flight() {
            let handle = match inner.live_watch(execution_id) {
                Some(handle) => handle,
                None => inner.resume_watch(&execution, ExecutionMode::Full),
            };
            handle.refresh().await;
            return inner.execution(execution_id);
        }

        let report = inner
            .service
            .get_execution_status(execution_id)
            .await
            .map_err(|e| CoordinatorError::from_service("get_execution_status", e))?;
        apply_generation_report(&inner.store, execution_id, execution.epoch, &report)?;
        inner.execution(execution_id)
    }

    /// Merge the service's execution list for a document into the store.
    pub async fn hydrate(&self, document_id: &DocumentId) -> Result<Vec<Execution>, CoordinatorError> {
        let inner = &self.inner;
        let remote = inner
            .service
            .list_executions(document_id)
            .await
            .map_err(|e| CoordinatorError::from_service("list_executions", e))?;

        let remote_ids: HashSet<ExecutionId> = remote.iter().map(|e| e.id.clone()).collect();
        let mut merged = 0usize;
        let mut reopened: HashMap<ExecutionId, ExecutionStatus> = HashMap::new();
        for execution in remote {
            if &execution.document_id != document_id {
                warn!(
                    document_id = %document_id,
                    execution_id = %execution.id,
                    "Skipping execution listed under another document"
                );
                continue;
            }
            let execution_id = execution.id.clone();
            match inner.store.merge(execution) {
                Ok(outcome) => {
                    if let ObservationOutcome::Advanced { from, .. } = outcome {
                        if from.is_terminal() {
                            reopened.insert(execution_id, from);
                        }
                    }
                    merged += 1
                }
                Err(err) => warn!(execution_id = %execution_id, error = %err, "Skipping execution during hydration"),
            }
        }

        for local in inner.store.list(document_id) {
            if !remote_ids.contains(&local.id) && local.status.is_terminal() {
                inner.forget(&local.id);
                if let Err(err) = inner.store.remove(&local.id) {
                    debug!(execution_id = %local.id, error = %err, "Execution already gone");
                }
            }
        }

        // Executions that turned in flight elsewhere get a watch of their own.
        if let Some(in_flight) = inner.store.in_flight(document_id) {
            if inner.live_watch(&in_flight).is_none() {
                let execution = inner.execution(&in_flight)?;
                match reopened.get(&in_flight) {
                    // Approval requested elsewhere reverts to the status it started from.
                    Some(&from) if execution.status == ExecutionStatus::Approving => {
                        inner.start_watch(
                            WatchTarget {
                                execution_id: execution.id.clone(),
                                document_id: execution.document_id.clone(),
                                epoch: execution.epoch,
                                kind: WatchKind::Approval { reverts_to: from },
                            },
                            ExecutionMode::Full,
                            None,
                        );
                    }
                    _ => {
                        inner.resume_watch(&execution, ExecutionMode::Full);
                    }
                }
            }
        }

        debug!(document_id = %document_id, merged, "Hydrated executions");
        Ok(inner.store.list(document_id))
    }

    /// Cancel every live watch.
    pub fn shutdown(&self) {
        let watches: Vec<_> = self.inner.watches.lock().drain().map(|(_, w)| w.handle).collect();
        for handle in watches {
            handle.cancel();
        }
    }
}

fn params(llm_id: &str, instructions: &str) -> RequestParams {
    RequestParams {
        llm_id: llm_id.to_string(),
        instructions: instructions.to_string(),
        ..RequestParams::default()
    }
}

impl CoordinatorInner {
    fn execution(&self, execution_id: &ExecutionId) -> Result<Execution, CoordinatorError> {
        self.store.get(execution_id).map_err(|err| match err {
            StoreError::ExecutionNotFound(id) => CoordinatorError::ExecutionNotFound(id),
            other => CoordinatorError::Store(other),
        })
    }

    fn ensure_not_read_only(&self, execution: &Execution) -> Result<(), CoordinatorError> {
        if execution.status.is_read_only() {
            return Err(CoordinatorError::ExecutionImmutable {
                execution_id: execution.id.clone(),
                status: execution.status,
            });
        }
        Ok(())
    }

    fn ensure_mutable(&self, execution: &Execution, attempted: &'static str) -> Result<(), CoordinatorError> {
        self.ensure_not_read_only(execution)?;
        if !execution.status.is_mutable() {
            return Err(CoordinatorError::InvalidTransition {
                execution_id: execution.id.clone(),
                from: execution.status,
                attempted,
            });
        }
        Ok(())
    }

    /// Claim the document's slot; re-entry is not an option for this operation.
    fn reserve(
        &self,
        document_id: &DocumentId,
        operation: GuardedOperation,
    ) -> Result<Reservation<'_>, CoordinatorError> {
        match self.guard.admit(&self.store, document_id, &operation)? {
            Admission::Reserved(reservation) => Ok(reservation),
            Admission::Attached(entry) => Err(CoordinatorError::ExecutionInProgress {
                document_id: document_id.clone(),
                in_flight: Some(entry.execution_id),
            }),
        }
    }

    async fn create(
        &self,
        document_id: &DocumentId,
        mode: ExecutionMode,
        params: RequestParams,
    ) -> Result<ExecutionHandle, CoordinatorError> {
        let document = self.documents.document(document_id)?;
        if document.sections.is_empty() {
            return Err(CoordinatorError::NoSectionsConfigured(document_id.clone()));
        }
        let reservation = self.reserve(document_id, GuardedOperation::Create(mode))?;

        let response = self
            .service
            .create_execution(CreateExecutionRequest {
                document_id: document_id.clone(),
                llm_id: params.llm_id.clone(),
                instructions: params.instructions.clone(),
                mode,
                start_section_id: None,
                execution_id: None,
            })
            .await
            .map_err(|e| CoordinatorError::from_service("create_execution", e))?;

        let name = params
            .name
            .unwrap_or_else(|| format!("Version {}", self.store.list(document_id).len() + 1));
        let execution = Execution::new(
            response.execution_id.clone(),
            document_id.clone(),
            name,
            params.llm_id,
            params.instructions,
        );
        self.store.insert(execution)?;
        let round = self.store.transition(
            &response.execution_id,
            ExecutionStatus::Pending,
            ExecutionStatus::Queued,
        )?;
        info!(
            document_id = %document_id,
            execution_id = %response.execution_id,
            job_id = %response.job_id,
            mode = %mode,
            "Dispatched execution"
        );

        reservation.commit(TrackingEntry {
            document_id: document_id.clone(),
            execution_id: response.execution_id.clone(),
            operation: TrackedOperation::Generation(mode),
            section_id: None,
        });
        let watch = self.start_watch(
            WatchTarget {
                execution_id: response.execution_id.clone(),
                document_id: document_id.clone(),
                epoch: round.epoch,
                kind: WatchKind::Generation,
            },
            mode,
            Some(response.job_id.clone()),
        );
        Ok(ExecutionHandle {
            execution_id: response.execution_id,
            document_id: document_id.clone(),
            mode,
            job_id: Some(response.job_id),
            attached: false,
            watch,
        })
    }

    async fn regenerate(
        &self,
        execution_id: &ExecutionId,
        section_id: &SectionId,
        mode: ExecutionMode,
        llm_id: &str,
        instructions: &str,
    ) -> Result<RegenerationHandle, CoordinatorError> {
        let execution = self.execution(execution_id)?;
        self.ensure_not_read_only(&execution)?;
        let document_id = execution.document_id.clone();
        let document = self.documents.document(&document_id)?;
        let section = document
            .section(section_id)
            .ok_or_else(|| CoordinatorError::SectionNotFound {
                document_id: document_id.clone(),
                section_id: section_id.clone(),
            })?;
        if !section.is_regenerable() {
            return Err(CoordinatorError::SectionNotRegenerable {
                section_id: section_id.clone(),
                kind: section.kind,
            });
        }
        let start_index = document.section_index(section_id).unwrap_or(0);

        let operation = GuardedOperation::Regenerate {
            execution_id: execution_id.clone(),
            mode,
        };
        let reservation = match self.guard.admit(&self.store, &document_id, &operation)? {
            Admission::Reserved(reservation) => reservation,
            Admission::Attached(entry) => return Ok(self.attach(entry, mode)),
        };

        let execution = self.execution(execution_id)?;
        self.ensure_mutable(&execution, "regenerate")?;
        let restore_to = execution.status;

        let response = self
            .service
            .create_execution(CreateExecutionRequest {
                document_id: document_id.clone(),
                llm_id: llm_id.to_string(),
                instructions: instructions.to_string(),
                mode,
                start_section_id: Some(section_id.clone()),
                execution_id: Some(execution_id.clone()),
            })
            .await
            .map_err(|e| CoordinatorError::from_service("create_execution", e))?;
        if &response.execution_id != execution_id {
            warn!(
                execution_id = %execution_id,
                returned = %response.execution_id,
                "Service answered a regeneration with another execution id; keeping the target"
            );
        }

        let round = self
            .store
            .transition(execution_id, restore_to, ExecutionStatus::Queued)?;
        info!(
            document_id = %document_id,
            execution_id = %execution_id,
            section_id = %section_id,
            job_id = %response.job_id,
            mode = %mode,
            "Dispatched regeneration"
        );

        self.tracker.begin(RegenerationEntry {
            execution_id: execution_id.clone(),
            mode,
            section_id: section_id.clone(),
            start_index,
            restore_to,
        });
        reservation.commit(TrackingEntry {
            document_id: document_id.clone(),
            execution_id: execution_id.clone(),
            operation: TrackedOperation::Generation(mode),
            section_id: Some(section_id.clone()),
        });
        let watch = self.start_watch(
            WatchTarget {
                execution_id: execution_id.clone(),
                document_id: document_id.clone(),
                epoch: round.epoch,
                kind: WatchKind::Sections {
                    mode,
                    start_index,
                    restore_to,
                },
            },
            mode,
            Some(response.job_id.clone()),
        );
        Ok(ExecutionHandle {
            execution_id: execution_id.clone(),
            document_id,
            mode,
            job_id: Some(response.job_id),
            attached: false,
            watch,
        })
    }

    fn attach(&self, entry: TrackingEntry, mode: ExecutionMode) -> ExecutionHandle {
        let (watch, job_id) = {
            let watches = self.watches.lock();
            match watches.get(&entry.execution_id) {
                Some(active) if !active.handle.is_finished() => {
                    (Some(active.handle.clone()), active.job_id.clone())
                }
                _ => (None, None),
            }
        };
        let watch = match watch {
            Some(watch) => watch,
            None => match self.execution(&entry.execution_id) {
                Ok(execution) => self.resume_watch(&execution, mode),
                Err(_) => self.start_watch(
                    WatchTarget {
                        execution_id: entry.execution_id.clone(),
                        document_id: entry.document_id.clone(),
                        epoch: 0,
                        kind: WatchKind::Generation,
                    },
                    mode,
                    None,
                ),
            },
        };
        ExecutionHandle {
            execution_id: entry.execution_id,
            document_id: entry.document_id,
            mode,
            job_id,
            attached: true,
            watch,
        }
    }

    fn prepare_section_edit(
        &self,
        execution_id: &ExecutionId,
        section_id: &SectionId,
        attempted: &'static str,
    ) -> Result<(Execution, usize, Reservation<'_>), CoordinatorError> {
        let execution = self.execution(execution_id)?;
        self.ensure_not_read_only(&execution)?;
        let document = self.documents.document(&execution.document_id)?;
        let section = document
            .section(section_id)
            .ok_or_else(|| CoordinatorError::SectionNotFound {
                document_id: execution.document_id.clone(),
                section_id: section_id.clone(),
            })?;
        if section.is_read_only() {
            return Err(CoordinatorError::SectionReadOnly(section_id.clone()));
        }
        let index = document.section_index(section_id).unwrap_or(0);
        let reservation = self.reserve(
            &execution.document_id,
            GuardedOperation::EditSection(execution_id.clone()),
        )?;
        let execution = self.execution(execution_id)?;
        self.ensure_mutable(&execution, attempted)?;
        Ok((execution, index, reservation))
    }

    fn live_watch(&self, execution_id: &ExecutionId) -> Option<WatchHandle> {
        self.watches
            .lock()
            .get(execution_id)
            .filter(|active| !active.handle.is_finished())
            .map(|active| active.handle.clone())
    }

    /// Start a watch for an in-flight execution that has none, in its current round.
    fn resume_watch(&self, execution: &Execution, mode: ExecutionMode) -> WatchHandle {
        let tracked = self
            .guard
            .tracking(&execution.document_id)
            .filter(|entry| entry.execution_id == execution.id);
        let kind = match (execution.status, self.tracker.entry(&execution.id)) {
            (ExecutionStatus::Approving, _) => WatchKind::Approval {
                reverts_to: match tracked.map(|entry| entry.operation) {
                    Some(TrackedOperation::Approval { reverts_to }) => reverts_to,
                    _ => ExecutionStatus::Completed,
                },
            },
            (_, Some(entry)) => WatchKind::Sections {
                mode: entry.mode,
                start_index: entry.start_index,
                restore_to: entry.restore_to,
            },
            _ => WatchKind::Generation,
        };
        debug!(execution_id = %execution.id, kind = ?kind, "Resuming watch");
        self.start_watch(
            WatchTarget {
                execution_id: execution.id.clone(),
                document_id: execution.document_id.clone(),
                epoch: execution.epoch,
                kind,
            },
            mode,
            None,
        )
    }

    fn start_watch(&self, target: WatchTarget, mode: ExecutionMode, job_id: Option<JobId>) -> WatchHandle {
        let finalizer: Weak<dyn WatchFinalizer> = self.me.clone();
        let execution_id = target.execution_id.clone();
        let handle = self.poller.spawn(target, finalizer);
        let previous = self.watches.lock().insert(
            execution_id,
            ActiveWatch {
                handle: handle.clone(),
                mode,
                job_id,
            },
        );
        if let Some(previous) = previous {
            previous.handle.cancel();
        }
        handle
    }

    /// Re-select the ledger's focused version after the active version moved on its own.
    fn follow_active(&self, document_id: &DocumentId) -> Option<ExecutionId> {
        let active = self.store.active(document_id).map(|e| e.id);
        self.ledger.follow_active(document_id, active.as_ref());
        active
    }

    /// Drop local bookkeeping for an execution that is going away.
    fn forget(&self, execution_id: &ExecutionId) {
        if let Some(active) = self.watches.lock().remove(execution_id) {
            active.handle.cancel();
        }
        self.tracker.clear(execution_id);
    }
}

impl WatchFinalizer for CoordinatorInner {
    fn finalize(&self, target: &WatchTarget, event: &CompletionEvent) {
        let execution_id = &target.execution_id;
        let document_id = &target.document_id;

        {
            let mut watches = self.watches.lock();
            let owned = watches
                .get(execution_id)
                .is_some_and(|active| active.handle.target() == target);
            if owned {
                if let Some(active) = watches.remove(execution_id) {
                    debug!(execution_id = %execution_id, mode = %active.mode, "Watch finished");
                }
            }
        }

        match &event.status {
            // Unresolved: keep the tracking entries so the document stays blocked
            // until a refresh settles it.
            FinalStatus::Unknown { .. } => {}
            FinalStatus::Removed => {
                self.tracker.clear(execution_id);
                self.guard.release_tracking(document_id, execution_id);
                if let Err(err) = self.store.remove(execution_id) {
                    debug!(execution_id = %execution_id, error = %err, "Execution already removed");
                }
            }
            status => {
                self.guard.release_tracking(document_id, execution_id);
                if target.kind.is_sections() {
                    if *status == FinalStatus::Completed && event.failed_sections.is_empty() {
                        self.tracker.finish(execution_id);
                    } else {
                        self.tracker.fail(execution_id, event.failed_sections.iter().copied());
                    }
                    self.ledger.auto_dismiss(document_id, execution_id);
                }
            }
        }
        if !event.status.is_unknown() {
            self.follow_active(document_id);
        }
    }
}
