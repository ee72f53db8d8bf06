//! Documents and their section layout.
//!
//! Documents are owned by an external store; the coordinator keeps a registry of the
//! layouts it has been given so it can validate section targets and compute regeneration
//! ranges. Reordering uses optimistic concurrency on a per-document revision: a caller
//! submits the full desired order together with the revision it was based on, and the
//! write is rejected if any other write landed in between.

use crate::error::CoordinatorError;
use crate::types::{DocumentId, SectionId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use tracing::{debug, warn};

/// Kind of a section definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    /// Content produced by the generation service
    Ai,
    /// Content authored by hand
    Manual,
    /// Content pulled from elsewhere; read-only
    Reference,
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SectionKind::Ai => write!(f, "ai"),
            SectionKind::Manual => write!(f, "manual"),
            SectionKind::Reference => write!(f, "reference"),
        }
    }
}

/// Section definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Section {
    pub id: SectionId,
    #[serde(rename = "type")]
    pub kind: SectionKind,
    #[serde(default)]
    pub dependencies: BTreeSet<SectionId>,
    pub order: i32,
    #[serde(default)]
    pub title: String,
}

impl Section {
    pub fn new(id: impl Into<SectionId>, kind: SectionKind, order: i32) -> Self {
        Self {
            id: id.into(),
            kind,
            dependencies: BTreeSet::new(),
            order,
            title: String::new(),
        }
    }

    pub fn is_regenerable(&self) -> bool {
        self.kind == SectionKind::Ai
    }

    pub fn is_read_only(&self) -> bool {
        self.kind == SectionKind::Reference
    }
}

/// Document identity plus its ordered sections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub sections: Vec<Section>,
}

impl Document {
    /// Build a document; sections are kept sorted by `order`.
    pub fn new(id: impl Into<DocumentId>, name: impl Into<String>, mut sections: Vec<Section>) -> Self {
        sections.sort_by_key(|s| s.order);
        Self {
            id: id.into(),
            name: name.into(),
            sections,
        }
    }

    pub fn section(&self, section_id: &SectionId) -> Option<&Section> {
        self.sections.iter().find(|s| &s.id == section_id)
    }

    /// Position of a section in document order.
    pub fn section_index(&self, section_id: &SectionId) -> Option<usize> {
        self.sections.iter().position(|s| &s.id == section_id)
    }

    pub fn section_ids(&self) -> Vec<SectionId> {
        self.sections.iter().map(|s| s.id.clone()).collect()
    }
}

/// Registered document together with the revision of its section layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentLayout {
    pub document: Document,
    pub revision: u64,
}

/// Per-document layout registry
pub struct DocumentRegistry {
    layouts: RwLock<HashMap<DocumentId, DocumentLayout>>,
}

impl Default for DocumentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentRegistry {
    pub fn new() -> Self {
        Self {
            layouts: RwLock::new(HashMap::new()),
        }
    }

    /// Register (or replace with the authoritative copy of) a document.
    ///
    /// Replacing counts as a write: any reorder based on an older snapshot is rejected.
    pub fn register(&self, document: Document) -> u64 {
        let mut layouts = self.layouts.write();
        let mut document = document;
        document.sections.sort_by_key(|s| s.order);
        let revision = layouts
            .get(&document.id)
            .map(|existing| existing.revision + 1)
            .unwrap_or(1);
        debug!(document_id = %document.id, revision, "Registered document layout");
        layouts.insert(document.id.clone(), DocumentLayout { document, revision });
        revision
    }

    pub fn get(&self, document_id: &DocumentId) -> Option<DocumentLayout> {
        self.layouts.read().get(document_id).cloned()
    }

    pub fn document(&self, document_id: &DocumentId) -> Result<Document, CoordinatorError> {
        self.get(document_id)
            .map(|layout| layout.document)
            .ok_or_else(|| CoordinatorError::DocumentNotFound(document_id.clone()))
    }

    /// Apply a full section ordering atomically.
    ///
    /// `order` must be a permutation of the document's current section ids. Returns the
    /// new revision, or `StaleSectionOrder` if the layout changed since `expected_revision`.
    pub fn reorder(
        &self,
        document_id: &DocumentId,
        expected_revision: u64,
        order: &[SectionId],
    ) -> Result<u64, CoordinatorError> {
        let mut layouts = self.layouts.write();
        let layout = layouts
            .get_mut(document_id)
            .ok_or_else(|| CoordinatorError::DocumentNotFound(document_id.clone()))?;

        if layout.revision != expected_revision {
            warn!(
                document_id = %document_id,
                expected_revision,
                current_revision = layout.revision,
                "Rejected section reorder based on a stale layout"
            );
            return Err(CoordinatorError::StaleSectionOrder {
                document_id: document_id.clone(),
                expected_revision,
                current_revision: layout.revision,
            });
        }

        let current: HashSet<&SectionId> = layout.document.sections.iter().map(|s| &s.id).collect();
        let requested: HashSet<&SectionId> = order.iter().collect();
        if requested.len() != order.len() || current != requested {
            return Err(CoordinatorError::InvalidRequest(format!(
                "Section order for document {} must list each of its {} sections exactly once",
                document_id,
                current.len()
            )));
        }

        let mut by_id: HashMap<SectionId, Section> = layout
            .document
            .sections
            .drain(..)
            .map(|s| (s.id.clone(), s))
            .collect();
        for (position, section_id) in order.iter().enumerate() {
            if let Some(mut section) = by_id.remove(section_id) {
                section.order = position as i32;
                layout.document.sections.push(section);
            }
        }
        layout.revision += 1;
        debug!(document_id = %document_id, revision = layout.revision, "Reordered sections");
        Ok(layout.revision)
    }
}
