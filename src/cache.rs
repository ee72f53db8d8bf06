//! Cache Consistency Layer
//!
//! Computed views keyed by what they depend on. The cache subscribes to execution store
//! events and evicts exactly the views each event can affect:
//!
//! | event | evicted |
//! |---|---|
//! | inserted | version list, section list, the execution's content |
//! | status changed | version list; content when the new status is terminal or mutability flipped; section list when in-flight or read-only state flipped |
//! | sections replaced | the execution's content |
//! | removed | version list, section list, the execution's content |
//! | layout changed | section list, content of every execution of the document |
//!
//! Every eviction bumps a per-key counter. A value computed while its key was evicted is
//! discarded instead of stored, so a slow computation never resurrects stale data.

use crate::execution::StoreEvent;
use crate::execution::StoreObserver;
use crate::types::{DocumentId, ExecutionId};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::trace;

/// Identity of a cached view
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ViewKey {
    /// Rendered content of one execution
    Content(ExecutionId),
    /// Version list of a document
    VersionList(DocumentId),
    /// Section configuration of a document (order, kinds, actions available)
    SectionList(DocumentId),
}

/// Views that depend on a store event.
pub fn dependent_views(event: &StoreEvent) -> Vec<ViewKey> {
    match event {
        StoreEvent::Inserted {
            document_id,
            execution_id,
            ..
        }
        | StoreEvent::Removed {
            document_id,
            execution_id,
        } => vec![
            ViewKey::VersionList(document_id.clone()),
            ViewKey::SectionList(document_id.clone()),
            ViewKey::Content(execution_id.clone()),
        ],
        StoreEvent::StatusChanged {
            document_id,
            execution_id,
            from,
            to,
        } => {
            // Content carries the execution's status, so it is stale after any change.
            let mut keys = vec![
                ViewKey::VersionList(document_id.clone()),
                ViewKey::Content(execution_id.clone()),
            ];
            if from.is_in_flight() != to.is_in_flight() || from.is_read_only() != to.is_read_only() {
                keys.push(ViewKey::SectionList(document_id.clone()));
            }
            keys
        }
        StoreEvent::SectionsReplaced { execution_id, .. } => {
            vec![ViewKey::Content(execution_id.clone())]
        }
    }
}

struct CacheState<V> {
    entries: HashMap<ViewKey, V>,
    invalidations: HashMap<ViewKey, u64>,
    /// Content keys cached per document, for layout changes
    content_by_document: HashMap<DocumentId, Vec<ExecutionId>>,
}

impl<V> Default for CacheState<V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            invalidations: HashMap::new(),
            content_by_document: HashMap::new(),
        }
    }
}

/// View cache
pub struct ViewCache<V> {
    state: RwLock<CacheState<V>>,
}

impl<V: Clone> Default for ViewCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> ViewCache<V> {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
        }
    }

    pub fn get(&self, key: &ViewKey) -> Option<V> {
        self.state.read().entries.get(key).cloned()
    }

    pub fn contains(&self, key: &ViewKey) -> bool {
        self.state.read().entries.contains_key(key)
    }

    /// Return the cached view or compute and cache it.
    ///
    /// `document_id` is the document the view belongs to.
    pub fn get_or_compute<E>(
        &self,
        document_id: &DocumentId,
        key: ViewKey,
        compute: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        let generation = {
            let state = self.state.read();
            if let Some(hit) = state.entries.get(&key) {
                return Ok(hit.clone());
            }
            state.invalidations.get(&key).copied().unwrap_or(0)
        };

        let value = compute()?;

        let mut state = self.state.write();
        if state.invalidations.get(&key).copied().unwrap_or(0) == generation {
            if let ViewKey::Content(execution_id) = &key {
                let ids = state
                    .content_by_document
                    .entry(document_id.clone())
                    .or_default();
                if !ids.contains(execution_id) {
                    ids.push(execution_id.clone());
                }
            }
            state.entries.insert(key, value.clone());
        } else {
            trace!(?key, "Discarded view computed across an invalidation");
        }
        Ok(value)
    }

    pub fn invalidate(&self, key: &ViewKey) {
        let mut state = self.state.write();
        Self::invalidate_locked(&mut state, key);
    }

    fn invalidate_locked(state: &mut CacheState<V>, key: &ViewKey) {
        state.entries.remove(key);
        *state.invalidations.entry(key.clone()).or_insert(0) += 1;
        trace!(?key, "Invalidated view");
    }

    /// Number of times a key has been evicted.
    pub fn invalidation_count(&self, key: &ViewKey) -> u64 {
        self.state.read().invalidations.get(key).copied().unwrap_or(0)
    }

    /// Section layout of a document changed.
    pub fn on_layout_changed(&self, document_id: &DocumentId) {
        let mut state = self.state.write();
        let executions = state
            .content_by_document
            .remove(document_id)
            .unwrap_or_default();
        Self::invalidate_locked(&mut state, &ViewKey::SectionList(document_id.clone()));
        for execution_id in executions {
            Self::invalidate_locked(&mut state, &ViewKey::Content(execution_id));
        }
    }

    pub fn apply_event(&self, event: &StoreEvent) {
        let keys = dependent_views(event);
        let mut state = self.state.write();
        for key in &keys {
            Self::invalidate_locked(&mut state, key);
        }
        if let StoreEvent::Removed {
            document_id,
            execution_id,
        } = event
        {
            if let Some(ids) = state.content_by_document.get_mut(document_id) {
                ids.retain(|id| id != execution_id);
            }
        }
    }
}

impl<V: Clone + Send + Sync> StoreObserver for ViewCache<V> {
    fn on_store_event(&self, event: &StoreEvent) {
        self.apply_event(event);
    }
}
