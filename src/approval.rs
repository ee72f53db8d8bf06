//! Approval State Machine
//!
//! Two-phase promotion of an execution: `completed|draft → approving → approved`, with
//! failure reverting to the status approval started from. While approving the execution is
//! read-only exactly like when approved. Disapproval moves `approved → draft`.

use crate::error::CoordinatorError;
use crate::execution::{Execution, ExecutionStatus};
use crate::types::ExecutionId;

/// Approval-relevant phase of an execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalPhase {
    /// Not approved; approval may be requested if the execution is mutable
    Unapproved,
    Approving,
    Approved,
}

/// Accepted approval request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalTicket {
    pub execution_id: ExecutionId,
    /// Status restored if approval fails
    pub reverts_to: ExecutionStatus,
}

/// Interpretation of a polled status during approval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalResolution {
    Pending,
    Approved,
    Rejected { reverted_to: ExecutionStatus },
}

pub struct ApprovalStateMachine;

impl ApprovalStateMachine {
    pub fn phase(status: ExecutionStatus) -> ApprovalPhase {
        match status {
            ExecutionStatus::Approving => ApprovalPhase::Approving,
            ExecutionStatus::Approved => ApprovalPhase::Approved,
            _ => ApprovalPhase::Unapproved,
        }
    }

    /// Validate an approval request.
    pub fn begin(execution: &Execution) -> Result<ApprovalTicket, CoordinatorError> {
        if !execution.status.is_mutable() {
            return Err(CoordinatorError::InvalidTransition {
                execution_id: execution.id.clone(),
                from: execution.status,
                attempted: "approve",
            });
        }
        Ok(ApprovalTicket {
            execution_id: execution.id.clone(),
            reverts_to: execution.status,
        })
    }

    /// Validate a disapproval request.
    pub fn check_disapprove(execution: &Execution) -> Result<(), CoordinatorError> {
        if execution.status != ExecutionStatus::Approved {
            return Err(CoordinatorError::InvalidTransition {
                execution_id: execution.id.clone(),
                from: execution.status,
                attempted: "disapprove",
            });
        }
        Ok(())
    }

    pub fn resolve(observed: ExecutionStatus, reverts_to: ExecutionStatus) -> ApprovalResolution {
        match observed {
            ExecutionStatus::Approving => ApprovalResolution::Pending,
            ExecutionStatus::Approved => ApprovalResolution::Approved,
            _ => ApprovalResolution::Rejected {
                reverted_to: reverts_to,
            },
        }
    }
}
