//! Error types for the cirrus orchestrator.
//!
//! The taxonomy separates fatal planning errors (configuration, cycles),
//! which abort a run before any backend call, from per-stack execution
//! errors, which are captured into that stack's state and surfaced in the
//! aggregate report.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::StackStatus;

/// The main error type for cirrus operations.
#[derive(Debug, Error)]
pub enum CirrusError {
    /// A configuration error occurred during resolution.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// A cycle was detected in the stack dependency graph.
    #[error("{0}")]
    Cycle(#[from] CycleError),

    /// A stack status transition was not in the legal table.
    #[error("{0}")]
    InvalidTransition(#[from] InvalidTransitionError),

    /// A backend provisioning call failed.
    #[error("{0}")]
    Backend(#[from] BackendError),

    /// A stack did not reach a terminal status before the polling ceiling.
    #[error("{0}")]
    Timeout(#[from] TimeoutError),

    /// A hook command failed.
    #[error("{0}")]
    Hook(#[from] HookError),

    /// A parameter resolver failed.
    #[error("Resolver '{resolver}' failed: {detail}")]
    Resolver {
        /// The resolver name.
        resolver: String,
        /// The failure detail.
        detail: String,
    },

    /// A reference parameter points at an output the source stack did not
    /// publish this run.
    #[error(
        "Stack '{stack_id}' parameter '{parameter}': output '{output_key}' \
         of stack '{source_stack}' is unavailable"
    )]
    MissingOutput {
        /// The stack whose parameter failed to resolve.
        stack_id: String,
        /// The parameter being resolved.
        parameter: String,
        /// The stack the reference points at.
        source_stack: String,
        /// The output key the reference names.
        output_key: String,
    },

    /// The run was cancelled.
    #[error("Run cancelled: {0}")]
    Cancelled(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CirrusError {
    /// Returns true if this error aborts the whole run before execution.
    ///
    /// Only planning errors qualify; everything else is captured per stack.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Cycle(_))
    }
}

/// Error raised when layered configuration cannot be resolved into specs.
///
/// Always names the offending stack and key so the caller can fix the
/// source document.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("Configuration error for stack '{stack_id}', key '{key}': {message}")]
pub struct ConfigurationError {
    /// The stack whose configuration is invalid.
    pub stack_id: String,
    /// The offending configuration key.
    pub key: String,
    /// Description of the problem.
    pub message: String,
}

impl ConfigurationError {
    /// Creates a new configuration error.
    #[must_use]
    pub fn new(
        stack_id: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stack_id: stack_id.into(),
            key: key.into(),
            message: message.into(),
        }
    }

    /// Creates an error for an unresolved placeholder value.
    #[must_use]
    pub fn unresolved_placeholder(
        stack_id: impl Into<String>,
        key: impl Into<String>,
        raw: &str,
    ) -> Self {
        Self::new(
            stack_id,
            key,
            format!("unresolved placeholder syntax: '{raw}'"),
        )
    }

    /// Creates an error for a dependency on a stack that does not exist.
    #[must_use]
    pub fn unknown_dependency(stack_id: impl Into<String>, dependency: &str) -> Self {
        Self::new(
            stack_id,
            "depends_on",
            format!("unknown dependency '{dependency}'"),
        )
    }
}

/// Error raised when the dependency graph contains a cycle.
///
/// The path lists every member of the cycle, closing on the first node.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("Dependency cycle detected: {}", cycle_path.join(" -> "))]
pub struct CycleError {
    /// The stacks forming the cycle, in edge order.
    pub cycle_path: Vec<String>,
}

impl CycleError {
    /// Creates a new cycle error from the cycle path.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        Self { cycle_path }
    }

    /// Returns the distinct members of the cycle (without the closing node).
    #[must_use]
    pub fn members(&self) -> &[String] {
        if self.cycle_path.len() > 1 {
            &self.cycle_path[..self.cycle_path.len() - 1]
        } else {
            &self.cycle_path
        }
    }
}

/// Error raised when a status transition is not in the legal table.
///
/// Guards against the backend reporting a status the state machine cannot
/// have produced.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("Invalid transition for stack '{stack_id}': {from} -> {to}")]
pub struct InvalidTransitionError {
    /// The stack attempting the transition.
    pub stack_id: String,
    /// The current status.
    pub from: StackStatus,
    /// The attempted next status.
    pub to: StackStatus,
}

impl InvalidTransitionError {
    /// Creates a new invalid transition error.
    #[must_use]
    pub fn new(stack_id: impl Into<String>, from: StackStatus, to: StackStatus) -> Self {
        Self {
            stack_id: stack_id.into(),
            from,
            to,
        }
    }
}

/// Errors returned by the provisioning backend.
///
/// The transient/permanent split drives the orchestrator's retry decision:
/// transient calls are retried with backoff, permanent failures are not.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum BackendError {
    /// A retryable failure (network partition, throttling, expired token).
    #[error("Transient backend error: {0}")]
    Transient(String),

    /// A non-retryable failure (validation rejection, missing template).
    #[error("Permanent backend error: {0}")]
    Permanent(String),
}

impl BackendError {
    /// Returns true if the error may succeed on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// Returns the failure detail.
    #[must_use]
    pub fn detail(&self) -> &str {
        match self {
            Self::Transient(detail) | Self::Permanent(detail) => detail,
        }
    }
}

/// Error raised when terminal-status polling exceeds its ceiling.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("Stack '{stack_id}' did not reach a terminal status within {waited_ms}ms")]
pub struct TimeoutError {
    /// The stack that timed out.
    pub stack_id: String,
    /// How long the orchestrator waited, in milliseconds.
    pub waited_ms: u64,
}

impl TimeoutError {
    /// Creates a new timeout error.
    #[must_use]
    pub fn new(stack_id: impl Into<String>, waited_ms: u64) -> Self {
        Self {
            stack_id: stack_id.into(),
            waited_ms,
        }
    }
}

/// Error raised when a hook command exits non-zero.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("Hook '{action}' ({trigger}) for stack '{stack_id}' exited with code {exit_code}")]
pub struct HookError {
    /// The stack whose hook failed.
    pub stack_id: String,
    /// The hook trigger description (e.g. "before create").
    pub trigger: String,
    /// The opaque hook action.
    pub action: String,
    /// The non-zero exit code.
    pub exit_code: i32,
}

impl HookError {
    /// Creates a new hook error.
    #[must_use]
    pub fn new(
        stack_id: impl Into<String>,
        trigger: impl Into<String>,
        action: impl Into<String>,
        exit_code: i32,
    ) -> Self {
        Self {
            stack_id: stack_id.into(),
            trigger: trigger.into(),
            action: action.into(),
            exit_code,
        }
    }
}
