//! CLI output: error mapping from coordinator errors to stable CLI surface.

use crate::error::CoordinatorError;

/// Map coordinator errors to a string for CLI output, with a hint where one helps.
pub fn map_error(e: &CoordinatorError) -> String {
    match e {
        CoordinatorError::ExecutionInProgress {
            in_flight: Some(execution_id),
            ..
        } => format!("{}\n  hint: run `quire wait {}` first", e, execution_id),
        CoordinatorError::Unknown { execution_id, .. } => {
            format!("{}\n  hint: run `quire status {}` to resolve it", e, execution_id)
        }
        CoordinatorError::ExecutionImmutable { execution_id, .. } => {
            format!("{}\n  hint: `quire disapprove {}`", e, execution_id)
        }
        _ => e.to_string(),
    }
}

/// Process exit code for an error.
pub fn exit_code(e: &CoordinatorError) -> i32 {
    match e {
        CoordinatorError::ExecutionInProgress { .. } => 3,
        CoordinatorError::Unknown { .. } | CoordinatorError::TransportFailure { .. } => 4,
        CoordinatorError::ConfigError(_) => 2,
        _ => 1,
    }
}
