//! The provisioning backend interface.
//!
//! The backend is an external collaborator: it creates, updates, and
//! deletes named resource groups from opaque templates and reports status
//! transitions. Cirrus only sequences and tracks the calls.

use crate::core::ResolvedParameters;
use crate::errors::BackendError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Outputs exported by a deployed stack.
pub type StackOutputs = BTreeMap<String, String>;

/// A handle to an in-flight backend operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationHandle {
    /// The stack the operation targets.
    pub stack_id: String,
    /// Backend-assigned operation id.
    pub operation_id: String,
}

impl OperationHandle {
    /// Creates a handle with a generated operation id.
    #[must_use]
    pub fn new(stack_id: impl Into<String>) -> Self {
        Self {
            stack_id: stack_id.into(),
            operation_id: Uuid::new_v4().to_string(),
        }
    }
}

/// The observed status of a backend operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OperationStatus {
    /// Still in progress.
    Pending,
    /// Reached a successful terminal state.
    Succeeded,
    /// Reached a failed terminal state.
    Failed {
        /// Backend-reported failure detail.
        detail: String,
    },
}

impl OperationStatus {
    /// Returns true if the operation has finished, successfully or not.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Opaque remote provisioning operations consumed by the orchestrator.
///
/// Every call may fail transiently (retried with backoff) or permanently
/// (failed immediately); implementations signal the difference through
/// [`BackendError`].
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Starts creating or updating a stack from a template and parameters.
    async fn create_or_update(
        &self,
        stack_id: &str,
        template: &str,
        parameters: &ResolvedParameters,
    ) -> Result<OperationHandle, BackendError>;

    /// Starts deleting a stack.
    async fn delete(&self, stack_id: &str) -> Result<OperationHandle, BackendError>;

    /// Polls the status of an in-flight operation.
    async fn poll_status(&self, handle: &OperationHandle) -> Result<OperationStatus, BackendError>;

    /// Fetches the outputs of a deployed stack.
    async fn get_outputs(&self, stack_id: &str) -> Result<StackOutputs, BackendError>;
}
