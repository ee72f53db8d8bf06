//! Completion Poller
//!
//! One cancellable task per watched operation. Each tick fetches the execution's status
//! from the generation service and applies it to the store as an observation in the round
//! the watch was started for; the store drops stale and regressive responses. When the
//! stored status turns terminal the watch settles and publishes exactly one
//! [`CompletionEvent`].
//!
//! A watch settles once, either by completing or by being cancelled; the `settled` flag is
//! claimed by compare-and-swap so a tick, a manual refresh and a cancel racing each other
//! cannot produce two outcomes. Ticks are serialised, and a response that arrives after the
//! watch settled is discarded. Transport failures are retried on the next tick; after
//! `retry_budget` consecutive failures the watch settles as `Unknown`.

use crate::approval::{ApprovalResolution, ApprovalStateMachine};
use crate::config::PollingConfig;
use crate::error::{CoordinatorError, ServiceError, StoreError};
use crate::execution::{
    ExecutionMode, ExecutionStatus, ExecutionStore, Observation, ObservationOutcome, OutputPatch,
};
use crate::service::{ExecutionStatusReport, GenerationService};
use crate::types::{DocumentId, ExecutionId};
use futures::stream::{self, BoxStream, Stream, StreamExt};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// What a watch is waiting for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchKind {
    /// Whole-document generation (`full`, `full-single`)
    Generation,
    /// Partial regeneration (`single`, `from`) of an existing execution
    Sections {
        mode: ExecutionMode,
        start_index: usize,
        restore_to: ExecutionStatus,
    },
    /// Pending approval
    Approval { reverts_to: ExecutionStatus },
}

impl WatchKind {
    pub fn is_sections(&self) -> bool {
        matches!(self, WatchKind::Sections { .. })
    }
}

/// Operation observed by one watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchTarget {
    pub execution_id: ExecutionId,
    pub document_id: DocumentId,
    /// Store round the operation opened
    pub epoch: u64,
    pub kind: WatchKind,
}

/// Outcome reported by a completion event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalStatus {
    Completed,
    Failed,
    Cancelled,
    Approved,
    /// Approval did not go through; the execution is back in `reverted_to`
    ApprovalRejected { reverted_to: ExecutionStatus },
    /// Execution no longer exists
    Removed,
    /// Retry budget exhausted; the server-side state is unresolved
    Unknown { attempts: u32, last_error: String },
}

impl FinalStatus {
    /// Final status for a terminal stored status.
    pub fn from_status(status: ExecutionStatus) -> Option<Self> {
        match status {
            ExecutionStatus::Completed | ExecutionStatus::Draft => Some(FinalStatus::Completed),
            ExecutionStatus::Approved => Some(FinalStatus::Approved),
            ExecutionStatus::Failed => Some(FinalStatus::Failed),
            ExecutionStatus::Cancelled => Some(FinalStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, FinalStatus::Unknown { .. })
    }
}

/// Terminal event of a watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionEvent {
    pub execution_id: ExecutionId,
    pub document_id: DocumentId,
    pub kind: WatchKind,
    pub status: FinalStatus,
    /// Document indices whose regeneration failed
    pub failed_sections: Vec<usize>,
}

impl CompletionEvent {
    fn new(target: &WatchTarget, status: FinalStatus) -> Self {
        Self {
            execution_id: target.execution_id.clone(),
            document_id: target.document_id.clone(),
            kind: target.kind.clone(),
            status,
            failed_sections: Vec::new(),
        }
    }

    /// Surface an unresolved status as an error.
    pub fn into_result(self) -> Result<CompletionEvent, CoordinatorError> {
        match self.status {
            FinalStatus::Unknown {
                attempts,
                last_error,
            } => Err(CoordinatorError::Unknown {
                execution_id: self.execution_id,
                attempts,
                last_error,
            }),
            _ => Ok(self),
        }
    }
}

/// Lifecycle of a watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchState {
    Watching,
    Terminal(CompletionEvent),
    Cancelled,
}

/// Receives completion events before subscribers do.
pub trait WatchFinalizer: Send + Sync {
    fn finalize(&self, target: &WatchTarget, event: &CompletionEvent);
}

struct WatchShared {
    target: WatchTarget,
    service: Arc<dyn GenerationService>,
    store: Arc<ExecutionStore>,
    finalizer: Weak<dyn WatchFinalizer>,
    retry_budget: u32,
    state_tx: watch::Sender<WatchState>,
    settled: AtomicBool,
    wake: Notify,
    tick_lock: Mutex<()>,
    failures: AtomicU32,
}

impl WatchShared {
    fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }

    fn claim(&self) -> bool {
        self.settled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    async fn tick(&self) {
        let _serial = self.tick_lock.lock().await;
        if self.is_settled() {
            return;
        }
        let result = self.service.get_execution_status(&self.target.execution_id).await;
        if self.is_settled() {
            debug!(execution_id = %self.target.execution_id, "Dropped poll response for settled watch");
            return;
        }

        match result {
            Ok(report) => {
                self.failures.store(0, Ordering::Release);
                match self.apply(report) {
                    Ok(Some(event)) => self.complete(event),
                    Ok(None) => {}
                    Err(StoreError::ExecutionNotFound(_)) => {
                        self.complete(CompletionEvent::new(&self.target, FinalStatus::Removed))
                    }
                    Err(err) => {
                        warn!(execution_id = %self.target.execution_id, error = %err, "Failed to apply poll response")
                    }
                }
            }
            Err(ServiceError::NotFound(message)) => {
                debug!(execution_id = %self.target.execution_id, %message, "Execution disappeared");
                self.complete(CompletionEvent::new(&self.target, FinalStatus::Removed));
            }
            Err(err) => {
                let attempts = self.failures.fetch_add(1, Ordering::AcqRel) + 1;
                if attempts >= self.retry_budget {
                    error!(
                        execution_id = %self.target.execution_id,
                        attempts,
                        error = %err,
                        "Retry budget exhausted while polling"
                    );
                    self.complete(CompletionEvent::new(
                        &self.target,
                        FinalStatus::Unknown {
                            attempts,
                            last_error: err.to_string(),
                        },
                    ));
                } else {
                    warn!(
                        execution_id = %self.target.execution_id,
                        attempt = attempts,
                        budget = self.retry_budget,
                        error = %err,
                        "Status poll failed; retrying on next tick"
                    );
                }
            }
        }
    }

    fn apply(&self, report: ExecutionStatusReport) -> Result<Option<CompletionEvent>, StoreError> {
        let target = &self.target;
        match &target.kind {
            WatchKind::Generation => {
                apply_generation_report(&self.store, &target.execution_id, target.epoch, &report)?;
                let status = self.store.get(&target.execution_id)?.status;
                Ok(FinalStatus::from_status(status).map(|final_status| CompletionEvent::new(target, final_status)))
            }
            WatchKind::Sections {
                mode,
                start_index,
                restore_to,
            } => self.apply_sections(report, *mode, *start_index, *restore_to),
            WatchKind::Approval { reverts_to } => self.apply_approval(report, *reverts_to),
        }
    }

    fn apply_sections(
        &self,
        report: ExecutionStatusReport,
        mode: ExecutionMode,
        start_index: usize,
        restore_to: ExecutionStatus,
    ) -> Result<Option<CompletionEvent>, StoreError> {
        let target = &self.target;
        if report.status.is_in_flight() {
            self.observe(report.status, OutputPatch::Keep)?;
            return Ok(None);
        }

        let affected: Vec<usize> = match mode {
            ExecutionMode::From => (start_index..report.sections.len().max(start_index + 1)).collect(),
            _ => vec![start_index],
        };

        if matches!(report.status, ExecutionStatus::Failed | ExecutionStatus::Cancelled) {
            self.observe(restore_to, OutputPatch::Keep)?;
            let mut event = CompletionEvent::new(
                target,
                FinalStatus::from_status(report.status).unwrap_or(FinalStatus::Failed),
            );
            event.failed_sections = affected;
            return Ok(Some(event));
        }

        let mut upserts = Vec::new();
        let mut failed = Vec::new();
        for index in affected {
            let output = report
                .sections
                .get(index)
                .filter(|section| !section.is_failed())
                .and_then(|section| section.to_output(&target.execution_id, index));
            match output {
                Some(output) => upserts.push((index, output)),
                None => failed.push(index),
            }
        }
        self.observe(restore_to, OutputPatch::Upsert(upserts))?;
        let mut event = CompletionEvent::new(target, FinalStatus::Completed);
        event.failed_sections = failed;
        Ok(Some(event))
    }

    fn apply_approval(
        &self,
        report: ExecutionStatusReport,
        reverts_to: ExecutionStatus,
    ) -> Result<Option<CompletionEvent>, StoreError> {
        match ApprovalStateMachine::resolve(report.status, reverts_to) {
            ApprovalResolution::Pending => Ok(None),
            ApprovalResolution::Approved => {
                self.observe(ExecutionStatus::Approved, OutputPatch::Keep)?;
                Ok(Some(CompletionEvent::new(&self.target, FinalStatus::Approved)))
            }
            ApprovalResolution::Rejected { reverted_to } => {
                self.observe(reverted_to, OutputPatch::Keep)?;
                Ok(Some(CompletionEvent::new(
                    &self.target,
                    FinalStatus::ApprovalRejected { reverted_to },
                )))
            }
        }
    }

    fn observe(&self, status: ExecutionStatus, outputs: OutputPatch) -> Result<ObservationOutcome, StoreError> {
        self.store.apply_observation(
            &self.target.execution_id,
            Observation {
                epoch: self.target.epoch,
                status,
                outputs,
            },
        )
    }

    fn complete(&self, event: CompletionEvent) {
        if !self.claim() {
            return;
        }
        info!(
            execution_id = %event.execution_id,
            document_id = %event.document_id,
            status = ?event.status,
            failed_sections = ?event.failed_sections,
            "Watch completed"
        );
        if let Some(finalizer) = self.finalizer.upgrade() {
            finalizer.finalize(&self.target, &event);
        }
        self.state_tx.send_replace(WatchState::Terminal(event));
        self.wake.notify_one();
    }

    fn cancel(&self) -> bool {
        if !self.claim() {
            return false;
        }
        debug!(execution_id = %self.target.execution_id, "Watch cancelled");
        self.state_tx.send_replace(WatchState::Cancelled);
        self.wake.notify_one();
        true
    }
}

/// Apply a whole-document status report to the store in round `epoch`.
///
/// Unpopulated sections are skipped; a report without any populated section leaves the
/// stored outputs untouched.
pub fn apply_generation_report(
    store: &ExecutionStore,
    execution_id: &ExecutionId,
    epoch: u64,
    report: &ExecutionStatusReport,
) -> Result<ObservationOutcome, StoreError> {
    let outputs = report.outputs(execution_id);
    let patch = if outputs.is_empty() {
        OutputPatch::Keep
    } else {
        OutputPatch::ReplaceAll(outputs)
    };
    store.apply_observation(
        execution_id,
        Observation {
            epoch,
            status: report.status,
            outputs: patch,
        },
    )
}

/// Completion Poller
pub struct CompletionPoller {
    service: Arc<dyn GenerationService>,
    store: Arc<ExecutionStore>,
    config: PollingConfig,
}

impl CompletionPoller {
    pub fn new(service: Arc<dyn GenerationService>, store: Arc<ExecutionStore>, config: PollingConfig) -> Self {
        Self {
            service,
            store,
            config,
        }
    }

    pub fn config(&self) -> &PollingConfig {
        &self.config
    }

    pub fn interval_for(&self, kind: &WatchKind) -> Duration {
        let millis = match kind {
            WatchKind::Generation => self.config.execution_interval_ms,
            WatchKind::Sections { .. } => self.config.section_interval_ms,
            WatchKind::Approval { .. } => self.config.approval_interval_ms,
        };
        Duration::from_millis(millis.max(1))
    }

    /// Start watching; must be called inside a tokio runtime.
    pub fn spawn(&self, target: WatchTarget, finalizer: Weak<dyn WatchFinalizer>) -> WatchHandle {
        let period = self.interval_for(&target.kind);
        let (state_tx, _) = watch::channel(WatchState::Watching);
        debug!(
            execution_id = %target.execution_id,
            kind = ?target.kind,
            interval_ms = period.as_millis() as u64,
            "Starting watch"
        );
        let shared = Arc::new(WatchShared {
            target,
            service: Arc::clone(&self.service),
            store: Arc::clone(&self.store),
            finalizer,
            retry_budget: self.config.retry_budget.max(1),
            state_tx,
            settled: AtomicBool::new(false),
            wake: Notify::new(),
            tick_lock: Mutex::new(()),
            failures: AtomicU32::new(0),
        });
        tokio::spawn(run_watch(Arc::clone(&shared), period));
        WatchHandle { shared }
    }
}

async fn run_watch(shared: Arc<WatchShared>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First tick fires immediately; polls start one period after the request.
    ticker.tick().await;
    while !shared.is_settled() {
        tokio::select! {
            _ = shared.wake.notified() => {}
            _ = ticker.tick() => shared.tick().await,
        }
    }
}

/// Handle to a running watch; clones share the watch.
#[derive(Clone)]
pub struct WatchHandle {
    shared: Arc<WatchShared>,
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("target", &self.shared.target)
            .field("settled", &self.shared.is_settled())
            .finish()
    }
}

impl WatchHandle {
    pub fn execution_id(&self) -> &ExecutionId {
        &self.shared.target.execution_id
    }

    pub fn target(&self) -> &WatchTarget {
        &self.shared.target
    }

    pub fn state(&self) -> WatchState {
        self.shared.state_tx.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.shared.is_settled()
    }

    /// Stop polling. Server-side state is untouched. Returns false if already settled.
    pub fn cancel(&self) -> bool {
        self.shared.cancel()
    }

    /// Poll once now, outside the regular cadence.
    pub async fn refresh(&self) -> WatchState {
        self.shared.tick().await;
        self.state()
    }

    pub fn subscribe(&self) -> CompletionStream {
        CompletionStream::from_receiver(self.shared.state_tx.subscribe())
    }

    /// Wait for the terminal event.
    pub async fn wait(&self) -> Result<CompletionEvent, CoordinatorError> {
        match self.subscribe().next().await {
            Some(event) => event.into_result(),
            None => Err(CoordinatorError::WatchCancelled(self.execution_id().clone())),
        }
    }
}

/// Stream yielding a watch's terminal event once, then ending.
/// Ends without an item if the watch is cancelled.
pub struct CompletionStream {
    inner: BoxStream<'static, CompletionEvent>,
}

impl CompletionStream {
    fn from_receiver(rx: watch::Receiver<WatchState>) -> Self {
        let inner = stream::unfold(Some(rx), |rx| async move {
            let mut rx = rx?;
            loop {
                let state = rx.borrow_and_update().clone();
                match state {
                    WatchState::Terminal(event) => return Some((event, None)),
                    WatchState::Cancelled => return None,
                    WatchState::Watching => {}
                }
                if rx.changed().await.is_err() {
                    return None;
                }
            }
        });
        Self { inner: inner.boxed() }
    }

    /// Stream for an operation that already finished.
    pub fn ready(event: CompletionEvent) -> Self {
        Self {
            inner: stream::once(async move { event }).boxed(),
        }
    }
}

impl Stream for CompletionStream {
    type Item = CompletionEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.poll_next_unpin(cx)
    }
}
