//! Notification Dismissal Ledger
//!
//! Per-document set of executions whose "version is executing" banner the user already
//! acknowledged. Scoped to the focused document and version: switching either clears it.

use crate::types::{DocumentId, ExecutionId};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tracing::debug;

#[derive(Default)]
struct LedgerState {
    focus: Option<(DocumentId, Option<ExecutionId>)>,
    dismissed: HashMap<DocumentId, HashSet<ExecutionId>>,
}

/// Notification Dismissal Ledger
#[derive(Default)]
pub struct NotificationLedger {
    state: Mutex<LedgerState>,
}

impl NotificationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the focused document and version, clearing dismissals if either changed.
    pub fn focus(&self, document_id: &DocumentId, version: Option<&ExecutionId>) {
        let mut state = self.state.lock();
        let next = (document_id.clone(), version.cloned());
        match &state.focus {
            Some((doc, _)) if doc != document_id => {
                state.dismissed.clear();
                debug!(document_id = %document_id, "Cleared dismissals on document switch");
            }
            Some((_, current)) if current.as_ref() != version => {
                state.dismissed.remove(document_id);
                debug!(document_id = %document_id, "Cleared dismissals on version switch");
            }
            _ => {}
        }
        state.focus = Some(next);
    }

    /// The document's active version changed without the user switching (deletion, or a
    /// generation settling). Applies only when `document_id` is the focused document.
    pub fn follow_active(&self, document_id: &DocumentId, version: Option<&ExecutionId>) {
        let focused = matches!(&self.state.lock().focus, Some((doc, _)) if doc == document_id);
        if focused {
            self.focus(document_id, version);
        }
    }

    pub fn should_notify(&self, document_id: &DocumentId, execution_id: &ExecutionId) -> bool {
        !self
            .state
            .lock()
            .dismissed
            .get(document_id)
            .is_some_and(|set| set.contains(execution_id))
    }

    /// Explicit user dismissal.
    pub fn dismiss(&self, document_id: &DocumentId, execution_id: &ExecutionId) {
        self.state
            .lock()
            .dismissed
            .entry(document_id.clone())
            .or_default()
            .insert(execution_id.clone());
    }

    /// Dismissal on behalf of the user once a section-level watch completes.
    pub fn auto_dismiss(&self, document_id: &DocumentId, execution_id: &ExecutionId) {
        debug!(document_id = %document_id, execution_id = %execution_id, "Auto-dismissed banner");
        self.dismiss(document_id, execution_id);
    }

    pub fn dismissed(&self, document_id: &DocumentId) -> Vec<ExecutionId> {
        let mut ids: Vec<_> = self
            .state
            .lock()
            .dismissed
            .get(document_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }
}
