//! Section Regeneration Tracker
//!
//! Maps each in-flight partial regeneration to the execution and section range it affects.
//! A `single` regeneration affects exactly its start index; a `from` regeneration affects
//! the start index and everything after it. Existing content stays on screen while a
//! section regenerates and is only replaced when its new output lands. Sections whose
//! regeneration failed keep an inline failure marker until the next regeneration of the
//! same execution starts.

use crate::execution::{ExecutionMode, ExecutionStatus};
use crate::types::{ExecutionId, SectionId};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::ops::Range;

/// One tracked partial regeneration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegenerationEntry {
    pub execution_id: ExecutionId,
    pub mode: ExecutionMode,
    pub section_id: SectionId,
    /// Position of `section_id` in document order when the regeneration started
    pub start_index: usize,
    /// Status the execution returns to once the regeneration ends
    pub restore_to: ExecutionStatus,
}

impl RegenerationEntry {
    pub fn affects(&self, index: usize) -> bool {
        match self.mode {
            ExecutionMode::From => index >= self.start_index,
            _ => index == self.start_index,
        }
    }

    /// Affected indices for a document with `section_count` sections.
    pub fn affected_range(&self, section_count: usize) -> Range<usize> {
        let start = self.start_index.min(section_count);
        match self.mode {
            ExecutionMode::From => start..section_count,
            _ => start..(self.start_index + 1).min(section_count),
        }
    }
}

/// How a section should be presented
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionDisplay {
    Idle,
    /// Being regenerated; existing content is still shown
    Regenerating,
    /// Last regeneration failed; existing content is shown with a failure marker
    Failed,
}

#[derive(Default)]
struct TrackerState {
    active: HashMap<ExecutionId, RegenerationEntry>,
    failed: HashMap<ExecutionId, BTreeSet<usize>>,
}

/// Section Regeneration Tracker
#[derive(Default)]
pub struct SectionRegenerationTracker {
    state: RwLock<TrackerState>,
}

impl SectionRegenerationTracker {
    /// Current content of a section is never hidden while it regenerates or after its
    /// regeneration failed; it is replaced only when new output lands.
    pub const DISPLAY_EXISTING: bool = true;

    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking; clears failure markers left by earlier regenerations.
    pub fn begin(&self, entry: RegenerationEntry) {
        let mut state = self.state.write();
        state.failed.remove(&entry.execution_id);
        state.active.insert(entry.execution_id.clone(), entry);
    }

    pub fn entry(&self, execution_id: &ExecutionId) -> Option<RegenerationEntry> {
        self.state.read().active.get(execution_id).cloned()
    }

    pub fn is_regenerating(&self, execution_id: &ExecutionId, section_index: usize) -> bool {
        self.state
            .read()
            .active
            .get(execution_id)
            .map(|entry| entry.affects(section_index))
            .unwrap_or(false)
    }

    pub fn section_display(&self, execution_id: &ExecutionId, section_index: usize) -> SectionDisplay {
        let state = self.state.read();
        if state
            .active
            .get(execution_id)
            .is_some_and(|entry| entry.affects(section_index))
        {
            return SectionDisplay::Regenerating;
        }
        if state
            .failed
            .get(execution_id)
            .is_some_and(|failed| failed.contains(&section_index))
        {
            return SectionDisplay::Failed;
        }
        SectionDisplay::Idle
    }

    /// Stop tracking after a successful regeneration.
    pub fn finish(&self, execution_id: &ExecutionId) -> Option<RegenerationEntry> {
        self.state.write().active.remove(execution_id)
    }

    /// Stop tracking and mark `indices` as failed.
    pub fn fail(
        &self,
        execution_id: &ExecutionId,
        indices: impl IntoIterator<Item = usize>,
    ) -> Option<RegenerationEntry> {
        let mut state = self.state.write();
        let entry = state.active.remove(execution_id);
        let failed = state.failed.entry(execution_id.clone()).or_default();
        failed.extend(indices);
        if failed.is_empty() {
            state.failed.remove(execution_id);
        }
        entry
    }

    pub fn failed_sections(&self, execution_id: &ExecutionId) -> Vec<usize> {
        self.state
            .read()
            .failed
            .get(execution_id)
            .map(|failed| failed.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Forget everything about an execution (deleted, or watch abandoned).
    pub fn clear(&self, execution_id: &ExecutionId) {
        let mut state = self.state.write();
        state.active.remove(execution_id);
        state.failed.remove(execution_id);
    }
}
