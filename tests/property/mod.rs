//! Property-based tests for store and guard invariants

mod single_flight;

use proptest::prelude::*;
use quire::execution::{Execution, ExecutionStatus};

pub const ALL_STATUSES: [ExecutionStatus; 10] = [
    ExecutionStatus::Pending,
    ExecutionStatus::Queued,
    ExecutionStatus::Running,
    ExecutionStatus::Processing,
    ExecutionStatus::Completed,
    ExecutionStatus::Approving,
    ExecutionStatus::Approved,
    ExecutionStatus::Draft,
    ExecutionStatus::Failed,
    ExecutionStatus::Cancelled,
];

pub fn any_status() -> impl Strategy<Value = ExecutionStatus> {
    prop::sample::select(ALL_STATUSES.to_vec())
}

pub fn execution(id: &str, document: &str, status: ExecutionStatus) -> Execution {
    let mut execution = Execution::new(id.into(), document.into(), id, "gpt", "write");
    execution.status = status;
    execution
}
