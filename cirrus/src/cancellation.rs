//! Run-level cooperative cancellation.
//!
//! The orchestrator consults the token before scheduling each stack and at
//! every poll checkpoint. Stacks that were in flight when the token fired
//! stop at their next checkpoint and are reported Interrupted; their true
//! remote state is unknown until the next run reconciles it.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};

/// A token for cooperative run cancellation.
///
/// Cancellation is idempotent; only the first reason is kept.
#[derive(Debug, Default)]
pub struct CancellationToken {
    cancelled: AtomicBool,
    reason: RwLock<Option<String>>,
}

impl CancellationToken {
    /// Creates a new token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. The first reason wins.
    pub fn cancel(&self, reason: impl Into<String>) {
        if self
            .cancelled
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            *self.reason.write() = Some(reason.into());
        }
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    /// Clears the token so it can arm a later run.
    ///
    /// The orchestrator resets its token when a run completes; a
    /// cancellation therefore applies to the run it interrupted (or the
    /// next one, if armed while idle), not to every run thereafter.
    pub fn reset(&self) {
        *self.reason.write() = None;
        self.cancelled.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_starts_uncancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
        assert!(token.reason().is_none());
    }

    #[test]
    fn test_cancel_records_reason() {
        let token = CancellationToken::new();
        token.cancel("operator interrupt");

        assert!(token.is_cancelled());
        assert_eq!(token.reason().as_deref(), Some("operator interrupt"));
    }

    #[test]
    fn test_first_reason_wins() {
        let token = CancellationToken::new();
        token.cancel("first");
        token.cancel("second");

        assert_eq!(token.reason().as_deref(), Some("first"));
    }

    #[test]
    fn test_reset_rearms_the_token() {
        let token = CancellationToken::new();
        token.cancel("first run");
        token.reset();

        assert!(!token.is_cancelled());
        assert!(token.reason().is_none());

        token.cancel("second run");
        assert_eq!(token.reason().as_deref(), Some("second run"));
    }
}
