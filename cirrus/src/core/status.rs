//! Stack status and action enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle status of a stack as tracked by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackStatus {
    /// Status has not been established yet.
    Unknown,
    /// A create has been decided but not started.
    PendingCreate,
    /// The backend is creating the stack.
    Creating,
    /// An update has been decided but not started.
    PendingUpdate,
    /// The backend is updating the stack.
    Updating,
    /// A delete has been decided but not started.
    PendingDelete,
    /// The backend is deleting the stack.
    Deleting,
    /// The stack exists and its last operation succeeded.
    Deployed,
    /// The stack no longer exists.
    Deleted,
    /// The last operation on the stack failed.
    Failed,
}

impl Default for StackStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => write!(f, "unknown"),
            Self::PendingCreate => write!(f, "pending_create"),
            Self::Creating => write!(f, "creating"),
            Self::PendingUpdate => write!(f, "pending_update"),
            Self::Updating => write!(f, "updating"),
            Self::PendingDelete => write!(f, "pending_delete"),
            Self::Deleting => write!(f, "deleting"),
            Self::Deployed => write!(f, "deployed"),
            Self::Deleted => write!(f, "deleted"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl StackStatus {
    /// Returns true if the status is terminal for a run.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Deployed | Self::Deleted | Self::Failed)
    }

    /// Returns true if the status represents a successful terminal state.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Deployed | Self::Deleted)
    }

    /// Returns true if a backend operation is in flight.
    #[must_use]
    pub fn is_in_progress(&self) -> bool {
        matches!(self, Self::Creating | Self::Updating | Self::Deleting)
    }
}

/// The run-level action requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackAction {
    /// Create or update every stack in the plan.
    Deploy,
    /// Delete every stack in the plan, dependents first.
    Delete,
}

impl fmt::Display for StackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deploy => write!(f, "deploy"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// The per-stack operation the state machine decides on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StackIntent {
    /// The stack does not exist and must be created.
    Create,
    /// The stack exists and its fingerprint changed.
    Update,
    /// The stack must be removed.
    Delete,
    /// Nothing to do (fingerprint unchanged, or deleting a missing stack).
    Noop,
}

impl fmt::Display for StackIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
            Self::Noop => write!(f, "noop"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(StackStatus::PendingCreate.to_string(), "pending_create");
        assert_eq!(StackStatus::Deployed.to_string(), "deployed");
        assert_eq!(StackStatus::Failed.to_string(), "failed");
    }

    #[test]
    fn test_status_is_terminal() {
        assert!(StackStatus::Deployed.is_terminal());
        assert!(StackStatus::Deleted.is_terminal());
        assert!(StackStatus::Failed.is_terminal());
        assert!(!StackStatus::Creating.is_terminal());
        assert!(!StackStatus::Unknown.is_terminal());
    }

    #[test]
    fn test_status_is_success() {
        assert!(StackStatus::Deployed.is_success());
        assert!(!StackStatus::Failed.is_success());
    }

    #[test]
    fn test_status_serialize() {
        let json = serde_json::to_string(&StackStatus::PendingUpdate).unwrap();
        assert_eq!(json, r#""pending_update""#);

        let back: StackStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, StackStatus::PendingUpdate);
    }

    #[test]
    fn test_action_display() {
        assert_eq!(StackAction::Deploy.to_string(), "deploy");
        assert_eq!(StackAction::Delete.to_string(), "delete");
    }

    #[test]
    fn test_intent_display() {
        assert_eq!(StackIntent::Create.to_string(), "create");
        assert_eq!(StackIntent::Noop.to_string(), "noop");
    }
}
