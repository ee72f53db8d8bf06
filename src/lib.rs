//! Quire: Document Execution Lifecycle Coordinator
//!
//! Coordinates LLM document generation runs against a remote generation service. Whole-document
//! and per-section generations are dispatched and then watched to completion; results are
//! approved and versioned. At most one mutating operation per document is in flight.

pub mod approval;
pub mod cache;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod document;
pub mod error;
pub mod execution;
pub mod guard;
pub mod ledger;
pub mod logging;
pub mod poller;
pub mod service;
pub mod tracker;
pub mod types;

pub use coordinator::{ApprovalHandle, Coordinator, ExecutionHandle, RegenerationHandle, RequestParams};
pub use error::{CoordinatorError, ServiceError, StoreError};
pub use execution::{Execution, ExecutionMode, ExecutionStatus};
