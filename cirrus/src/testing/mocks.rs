//! Scriptable in-memory trait implementations.

use crate::backend::{BackendClient, OperationHandle, OperationStatus, StackOutputs};
use crate::core::ResolvedParameters;
use crate::errors::BackendError;
use crate::resolvers::Resolver;
use crate::retry::Clock;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// A clock whose time only advances when something sleeps on it.
///
/// `sleep` returns immediately and adds the requested duration to the
/// clock's elapsed time, so backoff and polling loops run instantly in
/// tests while still observing monotonically increasing instants.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    elapsed: Mutex<Duration>,
}

impl ManualClock {
    /// Creates a clock at elapsed zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    /// Total time slept against this clock.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.base + *self.elapsed.lock()
    }

    async fn sleep(&self, duration: Duration) {
        *self.elapsed.lock() += duration;
    }
}

/// Per-stack script for [`MockBackend`].
#[derive(Debug, Default)]
struct StackScript {
    /// Statuses handed out by `poll_status`, in order; empty means
    /// `Succeeded`.
    statuses: VecDeque<OperationStatus>,
    /// Errors returned by `create_or_update`/`delete` before the call
    /// succeeds, in order.
    call_errors: VecDeque<BackendError>,
    /// Outputs returned by `get_outputs`.
    outputs: StackOutputs,
}

/// An in-memory backend that follows per-stack scripts and records every
/// call it receives.
///
/// Unscripted stacks succeed immediately with empty outputs.
#[derive(Debug, Default)]
pub struct MockBackend {
    scripts: Mutex<HashMap<String, StackScript>>,
    calls: Mutex<Vec<String>>,
    seen_parameters: Mutex<HashMap<String, ResolvedParameters>>,
}

impl MockBackend {
    /// Creates a backend where every call succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts the outputs a stack reports once deployed.
    #[must_use]
    pub fn with_outputs(self, stack_id: &str, pairs: &[(&str, &str)]) -> Self {
        {
            let mut scripts = self.scripts.lock();
            let script = scripts.entry(stack_id.to_string()).or_default();
            script.outputs = pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect();
        }
        self
    }

    /// Scripts the sequence of statuses `poll_status` reports for a stack.
    #[must_use]
    pub fn with_statuses(self, stack_id: &str, statuses: Vec<OperationStatus>) -> Self {
        {
            let mut scripts = self.scripts.lock();
            scripts.entry(stack_id.to_string()).or_default().statuses = statuses.into();
        }
        self
    }

    /// Scripts one error for the stack's next `create_or_update`/`delete`
    /// call; may be chained to script consecutive failures.
    #[must_use]
    pub fn with_call_error(self, stack_id: &str, error: BackendError) -> Self {
        {
            let mut scripts = self.scripts.lock();
            scripts
                .entry(stack_id.to_string())
                .or_default()
                .call_errors
                .push_back(error);
        }
        self
    }

    /// Every recorded call, in order, formatted `op:stack_id`.
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// The stack ids recorded for one operation kind, in call order.
    #[must_use]
    pub fn calls_for(&self, op: &str) -> Vec<String> {
        let prefix = format!("{op}:");
        self.calls
            .lock()
            .iter()
            .filter_map(|call| call.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }

    /// The parameters most recently sent for a stack, if any.
    #[must_use]
    pub fn parameters_for(&self, stack_id: &str) -> Option<ResolvedParameters> {
        self.seen_parameters.lock().get(stack_id).cloned()
    }

    fn record(&self, op: &str, stack_id: &str) {
        self.calls.lock().push(format!("{op}:{stack_id}"));
    }

    fn next_call_error(&self, stack_id: &str) -> Option<BackendError> {
        self.scripts
            .lock()
            .get_mut(stack_id)
            .and_then(|script| script.call_errors.pop_front())
    }
}

#[async_trait]
impl BackendClient for MockBackend {
    async fn create_or_update(
        &self,
        stack_id: &str,
        _template: &str,
        parameters: &ResolvedParameters,
    ) -> Result<OperationHandle, BackendError> {
        self.record("create_or_update", stack_id);
        self.seen_parameters
            .lock()
            .insert(stack_id.to_string(), parameters.clone());
        if let Some(error) = self.next_call_error(stack_id) {
            return Err(error);
        }
        Ok(OperationHandle::new(stack_id))
    }

    async fn delete(&self, stack_id: &str) -> Result<OperationHandle, BackendError> {
        self.record("delete", stack_id);
        if let Some(error) = self.next_call_error(stack_id) {
            return Err(error);
        }
        Ok(OperationHandle::new(stack_id))
    }

    async fn poll_status(&self, handle: &OperationHandle) -> Result<OperationStatus, BackendError> {
        self.record("poll", &handle.stack_id);
        Ok(self
            .scripts
            .lock()
            .get_mut(&handle.stack_id)
            .and_then(|script| script.statuses.pop_front())
            .unwrap_or(OperationStatus::Succeeded))
    }

    async fn get_outputs(&self, stack_id: &str) -> Result<StackOutputs, BackendError> {
        self.record("get_outputs", stack_id);
        Ok(self
            .scripts
            .lock()
            .get(stack_id)
            .map(|script| script.outputs.clone())
            .unwrap_or_default())
    }
}

/// A resolver that returns a settable value and counts its invocations.
#[derive(Debug)]
pub struct CountingResolver {
    value: RwLock<String>,
    calls: AtomicUsize,
}

impl CountingResolver {
    /// Creates a resolver returning `value`.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: RwLock::new(value.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Replaces the returned value; affects later runs, not memoized ones.
    pub fn set_value(&self, value: impl Into<String>) {
        *self.value.write() = value.into();
    }

    /// How many times `resolve` has been invoked.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resolver for CountingResolver {
    async fn resolve(&self, _args: &[String]) -> Result<String, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.value.read().clone())
    }
}
