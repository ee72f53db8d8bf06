//! Executions: status model, records and the authoritative store.

pub mod model;
pub mod status;
pub mod store;

pub use model::{Execution, OutputPatch, SectionOutput};
pub use status::{ExecutionMode, ExecutionStatus};
pub use store::{ExecutionStore, Observation, ObservationOutcome, StoreEvent, StoreObserver};
