//! Hook execution around backend operations.
//!
//! Hooks are opaque actions run before or after a stack's create, update,
//! or delete. A non-zero exit from a "before" hook aborts the stack's
//! operation; a non-zero exit from an "after" hook is logged but does not
//! revert the already-applied change.

use async_trait::async_trait;
use tracing::debug;

/// Runs opaque hook actions and reports their exit code.
#[async_trait]
pub trait HookExecutor: Send + Sync {
    /// Runs an action to completion.
    ///
    /// # Errors
    ///
    /// Returns an IO error if the action could not be started at all; a
    /// started action that fails is reported through its exit code.
    async fn run(&self, action: &str) -> std::io::Result<i32>;
}

/// Runs hook actions through a shell.
#[derive(Debug, Clone)]
pub struct ShellHookExecutor {
    shell: String,
}

impl ShellHookExecutor {
    /// Creates an executor using `/bin/sh`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shell: "/bin/sh".to_string(),
        }
    }

    /// Overrides the shell binary.
    #[must_use]
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }
}

impl Default for ShellHookExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HookExecutor for ShellHookExecutor {
    async fn run(&self, action: &str) -> std::io::Result<i32> {
        debug!(%action, "running hook");
        let status = tokio::process::Command::new(&self.shell)
            .arg("-c")
            .arg(action)
            .status()
            .await?;
        // Terminated-by-signal has no code; treat it as failure.
        Ok(status.code().unwrap_or(-1))
    }
}
