//! Per-run outcome reporting.

use crate::core::{StackAction, StackStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The final outcome of one stack within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    /// The stack was created or updated successfully.
    Deployed,
    /// The stack was deleted successfully.
    Deleted,
    /// Nothing to do: fingerprint unchanged or stack absent.
    Unchanged,
    /// The stack's operation failed.
    Failed,
    /// The stack never started because a dependency failed, or the run was
    /// cancelled before it was scheduled.
    Skipped,
    /// Cancellation hit while the stack's operation was in flight; its
    /// remote state is unknown until the next run reconciles it.
    Interrupted,
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deployed => write!(f, "deployed"),
            Self::Deleted => write!(f, "deleted"),
            Self::Unchanged => write!(f, "unchanged"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// One stack's line in the run report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackOutcome {
    /// The stack id.
    pub stack_id: String,
    /// Status at the start of the run.
    pub start_status: StackStatus,
    /// Final outcome.
    pub end_status: OutcomeStatus,
    /// Wall-clock duration of the stack's processing, in milliseconds.
    pub duration_ms: u64,
    /// Error detail or skip reason, if any.
    pub error: Option<String>,
}

impl StackOutcome {
    /// Creates an outcome.
    #[must_use]
    pub fn new(
        stack_id: impl Into<String>,
        start_status: StackStatus,
        end_status: OutcomeStatus,
    ) -> Self {
        Self {
            stack_id: stack_id.into(),
            start_status,
            end_status,
            duration_ms: 0,
            error: None,
        }
    }

    /// Sets the duration.
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Sets the error detail or skip reason.
    #[must_use]
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Aggregate result of one orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Unique id for this run.
    pub run_id: String,
    /// The requested action.
    pub action: StackAction,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run finished.
    pub finished_at: DateTime<Utc>,
    /// Per-stack outcomes, in execution order.
    pub outcomes: Vec<StackOutcome>,
}

impl RunReport {
    /// Returns true if no stack ended Failed.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        !self
            .outcomes
            .iter()
            .any(|outcome| outcome.end_status == OutcomeStatus::Failed)
    }

    /// Looks up the outcome for a stack.
    #[must_use]
    pub fn outcome(&self, stack_id: &str) -> Option<&StackOutcome> {
        self.outcomes
            .iter()
            .find(|outcome| outcome.stack_id == stack_id)
    }

    /// The ids of every failed stack.
    #[must_use]
    pub fn failed_stacks(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.end_status == OutcomeStatus::Failed)
            .map(|outcome| outcome.stack_id.as_str())
            .collect()
    }

    /// Total run duration in milliseconds.
    #[must_use]
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}
