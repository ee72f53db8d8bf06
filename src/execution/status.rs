//! Execution status and mode definitions.
//!
//! Status forms a forward-only progression within one generation or approval round:
//! `pending → queued → running/processing → completed → approving → approved`, with
//! `failed`/`cancelled` reachable from any in-flight state. Rounds are started only by
//! explicit mutations (see `ExecutionStore::transition`); observed statuses may only
//! advance within the current round.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of an execution (document version)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Created locally, not yet accepted by the generation service
    Pending,
    /// Accepted and waiting for a worker
    Queued,
    /// Worker is generating content
    Running,
    /// Worker is post-processing content (same stage as `Running`)
    Processing,
    /// Generation finished; content is mutable
    Completed,
    /// Approval requested and not yet resolved; content is read-only
    Approving,
    /// Approved; content is read-only until disapproved
    Approved,
    /// Disapproved after approval; mutable exactly like `Completed`
    Draft,
    /// Generation failed
    Failed,
    /// Generation was cancelled
    Cancelled,
}

impl ExecutionStatus {
    /// Statuses that occupy the document's single-flight slot.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            Self::Pending | Self::Queued | Self::Running | Self::Processing | Self::Approving
        )
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_in_flight()
    }

    /// Sections of the execution may be regenerated, edited or deleted.
    pub fn is_mutable(&self) -> bool {
        matches!(self, Self::Completed | Self::Draft)
    }

    /// Approval is pending or reached; no section may change.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::Approving | Self::Approved)
    }

    /// Terminal statuses that end a generation (full or partial) round.
    pub fn ends_generation(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Draft | Self::Approved | Self::Failed | Self::Cancelled
        )
    }

    /// Position along the forward progression; equal stages share a rank.
    fn stage(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Queued => 1,
            Self::Running | Self::Processing => 2,
            Self::Completed | Self::Draft | Self::Failed | Self::Cancelled => 3,
            Self::Approving => 4,
            Self::Approved => 5,
        }
    }

    /// Whether an observed status may replace `self` within the current round.
    ///
    /// Terminal statuses never move on observation alone; only a mutation
    /// (regenerate, approve, disapprove) opens a new round.
    pub fn can_advance_to(&self, next: ExecutionStatus) -> bool {
        match self {
            Self::Pending | Self::Queued | Self::Running | Self::Processing => match next {
                Self::Approving | Self::Approved | Self::Pending => false,
                _ => next.stage() > self.stage() || (next.stage() == 2 && self.stage() == 2),
            },
            Self::Approving => matches!(next, Self::Approved | Self::Completed | Self::Draft),
            Self::Completed
            | Self::Draft
            | Self::Approved
            | Self::Failed
            | Self::Cancelled => false,
        }
    }

    /// Whether the service can have moved `self` to `next` through a new round started by
    /// another client: a regeneration or approval of a mutable version, or a disapproval.
    pub fn can_reopen_as(&self, next: ExecutionStatus) -> bool {
        match self {
            Self::Completed | Self::Draft => matches!(
                next,
                Self::Queued | Self::Running | Self::Processing | Self::Approving | Self::Approved
            ),
            Self::Approved => next == Self::Draft,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Approving => "approving",
            Self::Approved => "approved",
            Self::Draft => "draft",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "queued" => Ok(Self::Queued),
            "running" => Ok(Self::Running),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "approving" => Ok(Self::Approving),
            "approved" => Ok(Self::Approved),
            "draft" => Ok(Self::Draft),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid execution status: {s}")),
        }
    }
}

/// How an execution request produces content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// New version, every section
    #[serde(rename = "full")]
    Full,
    /// New version, first section only; the rest stay unpopulated
    #[serde(rename = "full-single")]
    FullSingle,
    /// Existing version, one section
    #[serde(rename = "single")]
    Single,
    /// Existing version, one section and every section after it
    #[serde(rename = "from")]
    From,
}

impl ExecutionMode {
    pub fn creates_execution(&self) -> bool {
        matches!(self, Self::Full | Self::FullSingle)
    }

    pub fn is_partial(&self) -> bool {
        matches!(self, Self::Single | Self::From)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::FullSingle => "full-single",
            Self::Single => "single",
            Self::From => "from",
        }
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(Self::Full),
            "full-single" => Ok(Self::FullSingle),
            "single" => Ok(Self::Single),
            "from" => Ok(Self::From),
            _ => Err(format!("Invalid execution mode: {s}")),
        }
    }
}
