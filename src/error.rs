//! Error types for the execution lifecycle coordinator.

use crate::document::SectionKind;
use crate::execution::ExecutionStatus;
use crate::types::{DocumentId, ExecutionId, SectionId};
use thiserror::Error;

/// Execution store errors
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("Execution not found: {0}")]
    ExecutionNotFound(ExecutionId),

    #[error("Execution already exists: {0}")]
    DuplicateExecution(ExecutionId),

    #[error("Status conflict on {execution_id}: expected {expected}, found {actual}")]
    StatusConflict {
        execution_id: ExecutionId,
        expected: ExecutionStatus,
        actual: ExecutionStatus,
    },

    #[error("Document {document_id} already has execution {existing} in flight (attempted {attempted})")]
    SingleFlightViolation {
        document_id: DocumentId,
        existing: ExecutionId,
        attempted: ExecutionId,
    },
}

/// Errors reported by the generation service or its transport
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Coordinator errors surfaced to callers
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("An execution is already in progress for document {document_id}")]
    ExecutionInProgress {
        document_id: DocumentId,
        in_flight: Option<ExecutionId>,
    },

    #[error("Execution {execution_id} is {status} and cannot be modified; disapprove it first")]
    ExecutionImmutable {
        execution_id: ExecutionId,
        status: ExecutionStatus,
    },

    #[error("Cannot {attempted} execution {execution_id} while it is {from}")]
    InvalidTransition {
        execution_id: ExecutionId,
        from: ExecutionStatus,
        attempted: &'static str,
    },

    #[error("Document {0} has no sections configured")]
    NoSectionsConfigured(DocumentId),

    #[error("Generation service unreachable during {operation}: {source}")]
    TransportFailure {
        operation: &'static str,
        #[source]
        source: ServiceError,
    },

    #[error("Status of execution {execution_id} is unknown after {attempts} failed polls: {last_error}")]
    Unknown {
        execution_id: ExecutionId,
        attempts: u32,
        last_error: String,
    },

    #[error("Watch for execution {0} was cancelled")]
    WatchCancelled(ExecutionId),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(ExecutionId),

    #[error("Document not found: {0}")]
    DocumentNotFound(DocumentId),

    #[error("Section {section_id} not found in document {document_id}")]
    SectionNotFound {
        document_id: DocumentId,
        section_id: SectionId,
    },

    #[error("Section {section_id} is a {kind} section and cannot be regenerated")]
    SectionNotRegenerable {
        section_id: SectionId,
        kind: SectionKind,
    },

    #[error("Section {0} is a reference section and is read-only")]
    SectionReadOnly(SectionId),

    #[error("Section order for document {document_id} changed (expected revision {expected_revision}, current {current_revision}); re-fetch and retry")]
    StaleSectionOrder {
        document_id: DocumentId,
        expected_revision: u64,
        current_revision: u64,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Generation service error during {operation}: {source}")]
    Service {
        operation: &'static str,
        #[source]
        source: ServiceError,
    },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl CoordinatorError {
    /// Attribute a service error to the operation that issued the call.
    pub fn from_service(operation: &'static str, source: ServiceError) -> Self {
        match source {
            ServiceError::Transport(_) => CoordinatorError::TransportFailure { operation, source },
            other => CoordinatorError::Service {
                operation,
                source: other,
            },
        }
    }

    /// Errors the caller can resolve by retrying or refreshing.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CoordinatorError::ExecutionInProgress { .. }
                | CoordinatorError::TransportFailure { .. }
                | CoordinatorError::Unknown { .. }
                | CoordinatorError::StaleSectionOrder { .. }
        )
    }
}

impl From<config::ConfigError> for CoordinatorError {
    fn from(err: config::ConfigError) -> Self {
        CoordinatorError::ConfigError(err.to_string())
    }
}
