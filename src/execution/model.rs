//! Execution and section output records.

use crate::execution::status::ExecutionStatus;
use crate::types::{DocumentId, ExecutionId, SectionId, SectionOutputId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Content produced for one section within one execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionOutput {
    pub id: SectionOutputId,
    /// Back-reference to the section definition; older records may omit it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_id: Option<SectionId>,
    pub content: String,
}

impl SectionOutput {
    pub fn new(id: SectionOutputId, section_id: Option<SectionId>, content: impl Into<String>) -> Self {
        Self {
            id,
            section_id,
            content: content.into(),
        }
    }
}

/// A document version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub document_id: DocumentId,
    pub status: ExecutionStatus,
    pub created_at: DateTime<Utc>,
    pub name: String,
    pub llm_id: String,
    pub instructions: String,
    #[serde(default)]
    pub sections: Vec<SectionOutput>,
    /// Round counter; bumped by every mutation-driven status change.
    #[serde(default)]
    pub epoch: u64,
}

/// Change to an execution's section outputs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputPatch {
    Keep,
    /// Authoritative full list (whole-document generation, hydration)
    ReplaceAll(Vec<SectionOutput>),
    /// Replace or insert outputs; the index is the document position used when the
    /// output cannot be matched by `section_id`
    Upsert(Vec<(usize, SectionOutput)>),
    /// Drop the output for a section; the index locates outputs without a back-reference
    Remove {
        section_id: SectionId,
        document_index: usize,
    },
}

impl OutputPatch {
    pub fn is_keep(&self) -> bool {
        matches!(self, OutputPatch::Keep)
    }
}

impl Execution {
    pub fn new(
        id: ExecutionId,
        document_id: DocumentId,
        name: impl Into<String>,
        llm_id: impl Into<String>,
        instructions: impl Into<String>,
    ) -> Self {
        Self {
            id,
            document_id,
            status: ExecutionStatus::Pending,
            created_at: Utc::now(),
            name: name.into(),
            llm_id: llm_id.into(),
            instructions: instructions.into(),
            sections: Vec::new(),
            epoch: 0,
        }
    }

    /// Position of a section's output.
    ///
    /// Matches on the output's `section_id`; outputs without a back-reference are
    /// inferred from `document_index`, the section's position in the document.
    pub fn output_index(&self, section_id: &SectionId, document_index: usize) -> Option<usize> {
        if let Some(idx) = self
            .sections
            .iter()
            .position(|o| o.section_id.as_ref() == Some(section_id))
        {
            return Some(idx);
        }
        self.sections
            .get(document_index)
            .filter(|o| o.section_id.is_none())
            .map(|_| document_index)
    }

    pub fn output_for(&self, section_id: &SectionId, document_index: usize) -> Option<&SectionOutput> {
        self.output_index(section_id, document_index)
            .and_then(|idx| self.sections.get(idx))
    }

    /// Apply a patch; returns the ids of outputs that changed.
    pub fn apply_patch(&mut self, patch: OutputPatch) -> Vec<SectionOutputId> {
        match patch {
            OutputPatch::Keep => Vec::new(),
            OutputPatch::ReplaceAll(outputs) => {
                if outputs == self.sections {
                    return Vec::new();
                }
                let changed = outputs
                    .iter()
                    .filter(|o| !self.sections.contains(o))
                    .map(|o| o.id.clone())
                    .collect();
                self.sections = outputs;
                changed
            }
            OutputPatch::Upsert(outputs) => {
                let mut changed = Vec::new();
                for (document_index, output) in outputs {
                    let existing = match &output.section_id {
                        Some(section_id) => self.output_index(section_id, document_index),
                        None => (document_index < self.sections.len()).then_some(document_index),
                    };
                    match existing {
                        Some(idx) => {
                            if self.sections[idx] != output {
                                changed.push(output.id.clone());
                                self.sections[idx] = output;
                            }
                        }
                        None => {
                            changed.push(output.id.clone());
                            let at = document_index.min(self.sections.len());
                            self.sections.insert(at, output);
                        }
                    }
                }
                changed
            }
            OutputPatch::Remove {
                section_id,
                document_index,
            } => match self.output_index(&section_id, document_index) {
                Some(idx) => vec![self.sections.remove(idx).id],
                None => Vec::new(),
            },
        }
    }
}
