//! Batch-ordered execution of stack plans against the backend.
//!
//! The orchestrator walks an execution plan strictly batch by batch
//! (reverse order for delete), runs the stacks of a batch concurrently up
//! to a bounded worker pool, and owns every backend call and every state
//! mutation for the lifetime of a run. Deployed stacks feed their outputs
//! back so later batches can resolve reference parameters.

mod report;

#[cfg(test)]
mod integration_tests;

pub use report::{OutcomeStatus, RunReport, StackOutcome};

use crate::backend::{BackendClient, OperationHandle, OperationStatus, StackOutputs};
use crate::cancellation::CancellationToken;
use crate::core::{
    HookOperation, HookPhase, ParameterValue, ResolvedParameters, StackAction, StackIntent,
    StackSpec, StackStatus,
};
use crate::errors::{BackendError, CirrusError, HookError, TimeoutError};
use crate::graph::DependencyGraph;
use crate::hooks::{HookExecutor, ShellHookExecutor};
use crate::resolvers::{ResolverCache, ResolverRegistry};
use crate::retry::{retry_transient, Clock, PollConfig, RetryConfig, SystemClock};
use crate::state::{decide_intent, fingerprint, StateStore};
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Tunables for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Concurrent stacks per batch.
    pub max_concurrency: usize,
    /// Retry policy for individual backend calls.
    pub call_retry: RetryConfig,
    /// Polling policy for awaiting terminal operation status.
    pub poll: PollConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            call_retry: RetryConfig::default(),
            poll: PollConfig::default(),
        }
    }
}

/// Sequences stack operations against the backend.
pub struct Orchestrator {
    backend: Arc<dyn BackendClient>,
    hooks: Arc<dyn HookExecutor>,
    resolvers: Arc<ResolverRegistry>,
    state: Arc<StateStore>,
    clock: Arc<dyn Clock>,
    token: Arc<CancellationToken>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Creates an orchestrator over a backend with default collaborators.
    #[must_use]
    pub fn new(backend: Arc<dyn BackendClient>) -> Self {
        Self {
            backend,
            hooks: Arc::new(ShellHookExecutor::new()),
            resolvers: Arc::new(ResolverRegistry::new()),
            state: Arc::new(StateStore::new()),
            clock: Arc::new(SystemClock),
            token: Arc::new(CancellationToken::new()),
            config: OrchestratorConfig::default(),
        }
    }

    /// Sets the hook executor.
    #[must_use]
    pub fn with_hooks(mut self, hooks: Arc<dyn HookExecutor>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Sets the resolver registry.
    #[must_use]
    pub fn with_resolvers(mut self, resolvers: Arc<ResolverRegistry>) -> Self {
        self.resolvers = resolvers;
        self
    }

    /// Sets the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.token = token;
        self
    }

    /// Sets the run tunables.
    #[must_use]
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// The state store, shared across runs of this orchestrator.
    #[must_use]
    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    /// The cancellation token for this orchestrator.
    ///
    /// Cancellation is run-scoped: `run()` resets the token on completion,
    /// so a fired token stops the current run (or the next one, if armed
    /// while idle) without poisoning later runs.
    #[must_use]
    pub fn cancellation_token(&self) -> &Arc<CancellationToken> {
        &self.token
    }

    /// Executes the graph's plan for the given action.
    ///
    /// Batches run strictly in plan order for deploy and strictly reversed
    /// for delete, so dependents are always deleted before the stacks they
    /// depend on. A failed stack never aborts independent in-flight stacks
    /// but blocks its transitive dependents, which are reported Skipped.
    ///
    /// # Errors
    ///
    /// Returns an error only for internal scheduling faults; every
    /// per-stack error is captured in the report instead.
    pub async fn run(
        &self,
        graph: &DependencyGraph,
        action: StackAction,
    ) -> Result<RunReport, CirrusError> {
        let plan = graph.plan();
        let run_id = Uuid::new_v4().to_string();
        let started_at = Utc::now();
        info!(
            run_id = %run_id,
            %action,
            stacks = plan.stack_count(),
            batches = plan.batches.len(),
            "run started"
        );

        let ctx = Arc::new(RunContext {
            action,
            backend: self.backend.clone(),
            hooks: self.hooks.clone(),
            state: self.state.clone(),
            clock: self.clock.clone(),
            token: self.token.clone(),
            config: self.config.clone(),
            cache: ResolverCache::new(self.resolvers.clone()),
            outputs: RwLock::new(HashMap::new()),
            semaphore: Semaphore::new(self.config.max_concurrency.max(1)),
        });

        let batches = match action {
            StackAction::Deploy => plan.batches.clone(),
            StackAction::Delete => plan.reversed(),
        };

        let mut outcomes: Vec<StackOutcome> = Vec::with_capacity(plan.stack_count());
        // Failed, skipped, and interrupted stacks; blocks direct dependents
        // batch by batch, which makes the blocking transitive.
        let mut unhealthy: BTreeSet<String> = BTreeSet::new();

        for batch in batches {
            let mut handles = Vec::new();
            for stack_id in batch {
                let start_status = ctx.state.status(&stack_id);

                let upstream = match action {
                    StackAction::Deploy => graph.dependencies_of(&stack_id),
                    StackAction::Delete => graph.dependents_of(&stack_id),
                };
                let blockers: Vec<String> = upstream
                    .iter()
                    .filter(|dep| unhealthy.contains(*dep))
                    .cloned()
                    .collect();
                if !blockers.is_empty() {
                    debug!(stack = %stack_id, ?blockers, "stack blocked");
                    unhealthy.insert(stack_id.clone());
                    outcomes.push(
                        StackOutcome::new(&stack_id, start_status, OutcomeStatus::Skipped)
                            .with_error(format!(
                                "blocked by failed dependency: {}",
                                blockers.join(", ")
                            )),
                    );
                    continue;
                }

                if ctx.token.is_cancelled() {
                    let reason = ctx.token.reason().unwrap_or_default();
                    outcomes.push(
                        StackOutcome::new(&stack_id, start_status, OutcomeStatus::Skipped)
                            .with_error(format!("run cancelled: {reason}")),
                    );
                    continue;
                }

                let spec = graph.spec(&stack_id).cloned().ok_or_else(|| {
                    CirrusError::Internal(format!("stack '{stack_id}' missing from graph"))
                })?;
                let ctx = ctx.clone();
                handles.push(tokio::spawn(async move {
                    let _permit = match ctx.semaphore.acquire().await {
                        Ok(permit) => permit,
                        Err(_) => {
                            return StackOutcome::new(
                                &spec.id,
                                ctx.state.status(&spec.id),
                                OutcomeStatus::Failed,
                            )
                            .with_error("worker pool closed")
                        }
                    };
                    execute_stack(&ctx, &spec).await
                }));
            }

            for joined in futures::future::join_all(handles).await {
                let outcome = joined
                    .map_err(|err| CirrusError::Internal(format!("task join error: {err}")))?;
                if !matches!(
                    outcome.end_status,
                    OutcomeStatus::Deployed | OutcomeStatus::Deleted | OutcomeStatus::Unchanged
                ) {
                    unhealthy.insert(outcome.stack_id.clone());
                }
                outcomes.push(outcome);
            }
        }

        // Run-scoped cancellation: a token fired during this run must not
        // bleed into the next one.
        self.token.reset();

        let report = RunReport {
            run_id,
            action,
            started_at,
            finished_at: Utc::now(),
            outcomes,
        };
        info!(
            run_id = %report.run_id,
            succeeded = report.succeeded(),
            failed = report.failed_stacks().len(),
            "run finished"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .finish()
    }
}

/// Everything a spawned stack task needs, shared for one run.
struct RunContext {
    action: StackAction,
    backend: Arc<dyn BackendClient>,
    hooks: Arc<dyn HookExecutor>,
    state: Arc<StateStore>,
    clock: Arc<dyn Clock>,
    token: Arc<CancellationToken>,
    config: OrchestratorConfig,
    cache: ResolverCache,
    outputs: RwLock<HashMap<String, StackOutputs>>,
    semaphore: Semaphore,
}

/// Runs one stack to a final outcome; never returns an error.
async fn execute_stack(ctx: &RunContext, spec: &StackSpec) -> StackOutcome {
    let started = ctx.clock.now();
    let start_status = ctx.state.status(&spec.id);
    debug!(stack = %spec.id, status = %start_status, action = %ctx.action, "stack started");

    let result = match ctx.action {
        StackAction::Deploy => deploy_stack(ctx, spec, start_status).await,
        StackAction::Delete => delete_stack(ctx, spec, start_status).await,
    };
    let duration_ms = ctx.clock.now().saturating_duration_since(started).as_millis() as u64;

    match result {
        Ok(end_status) => {
            info!(stack = %spec.id, outcome = %end_status, duration_ms, "stack finished");
            StackOutcome::new(&spec.id, start_status, end_status).with_duration_ms(duration_ms)
        }
        Err(CirrusError::Cancelled(reason)) => {
            warn!(stack = %spec.id, %reason, "stack interrupted; remote state unknown");
            StackOutcome::new(&spec.id, start_status, OutcomeStatus::Interrupted)
                .with_duration_ms(duration_ms)
                .with_error(format!("cancelled at poll checkpoint: {reason}"))
        }
        Err(err) => {
            warn!(stack = %spec.id, error = %err, "stack failed");
            mark_failed(ctx, &spec.id, &err.to_string());
            StackOutcome::new(&spec.id, start_status, OutcomeStatus::Failed)
                .with_duration_ms(duration_ms)
                .with_error(err.to_string())
        }
    }
}

/// Create or update a stack, or skip it when its fingerprint is unchanged.
async fn deploy_stack(
    ctx: &RunContext,
    spec: &StackSpec,
    start_status: StackStatus,
) -> Result<OutcomeStatus, CirrusError> {
    let parameters = resolve_parameters(ctx, spec).await?;
    let new_fingerprint = fingerprint(&spec.template, &parameters);
    let record = ctx.state.record(&spec.id);
    let changed = record.fingerprint.as_deref() != Some(new_fingerprint.as_str());

    let intent = decide_intent(start_status, StackAction::Deploy, changed);
    let (pending, active, operation) = match intent {
        StackIntent::Create => (
            StackStatus::PendingCreate,
            StackStatus::Creating,
            HookOperation::Create,
        ),
        StackIntent::Update => (
            StackStatus::PendingUpdate,
            StackStatus::Updating,
            HookOperation::Update,
        ),
        StackIntent::Noop | StackIntent::Delete => {
            // Unchanged stacks still publish outputs for dependent
            // references resolved later in the run.
            store_outputs(ctx, &spec.id).await;
            return Ok(OutcomeStatus::Unchanged);
        }
    };

    run_before_hooks(ctx, spec, operation).await?;
    ctx.state.apply_transition(&spec.id, pending)?;
    ctx.state.apply_transition(&spec.id, active)?;

    let handle = retry_transient(&ctx.config.call_retry, &*ctx.clock, || {
        ctx.backend
            .create_or_update(&spec.id, &spec.template, &parameters)
    })
    .await?;

    poll_until_terminal(ctx, &handle).await?;

    ctx.state.apply_transition(&spec.id, StackStatus::Deployed)?;
    ctx.state.set_fingerprint(&spec.id, new_fingerprint);
    store_outputs(ctx, &spec.id).await;
    run_after_hooks(ctx, spec, operation).await;

    Ok(OutcomeStatus::Deployed)
}

/// Delete a stack, a no-op when it is not present.
async fn delete_stack(
    ctx: &RunContext,
    spec: &StackSpec,
    start_status: StackStatus,
) -> Result<OutcomeStatus, CirrusError> {
    let intent = decide_intent(start_status, StackAction::Delete, false);
    if intent != StackIntent::Delete {
        return Ok(OutcomeStatus::Unchanged);
    }

    run_before_hooks(ctx, spec, HookOperation::Delete).await?;
    ctx.state
        .apply_transition(&spec.id, StackStatus::PendingDelete)?;
    ctx.state.apply_transition(&spec.id, StackStatus::Deleting)?;

    let handle = retry_transient(&ctx.config.call_retry, &*ctx.clock, || {
        ctx.backend.delete(&spec.id)
    })
    .await?;

    poll_until_terminal(ctx, &handle).await?;

    ctx.state.apply_transition(&spec.id, StackStatus::Deleted)?;
    run_after_hooks(ctx, spec, HookOperation::Delete).await;

    Ok(OutcomeStatus::Deleted)
}

/// Evaluates every deferred parameter into a concrete string.
async fn resolve_parameters(
    ctx: &RunContext,
    spec: &StackSpec,
) -> Result<ResolvedParameters, CirrusError> {
    let mut resolved = ResolvedParameters::new();
    for (key, value) in &spec.parameters {
        let concrete = match value {
            ParameterValue::Literal { value } => value.clone(),
            ParameterValue::Reference {
                stack_id,
                output_key,
            } => ctx
                .outputs
                .read()
                .get(stack_id)
                .and_then(|outputs| outputs.get(output_key))
                .cloned()
                .ok_or_else(|| CirrusError::MissingOutput {
                    stack_id: spec.id.clone(),
                    parameter: key.clone(),
                    source_stack: stack_id.clone(),
                    output_key: output_key.clone(),
                })?,
            ParameterValue::ResolverCall { resolver, args } => {
                ctx.cache.resolve(resolver, args).await?
            }
        };
        resolved.insert(key.clone(), concrete);
    }
    Ok(resolved)
}

/// Polls an operation until terminal, honoring cancellation and the wait
/// ceiling.
async fn poll_until_terminal(
    ctx: &RunContext,
    handle: &OperationHandle,
) -> Result<(), CirrusError> {
    let started = ctx.clock.now();
    let mut attempt = 0;
    loop {
        if ctx.token.is_cancelled() {
            return Err(CirrusError::Cancelled(
                ctx.token.reason().unwrap_or_default(),
            ));
        }

        let status = retry_transient(&ctx.config.call_retry, &*ctx.clock, || {
            ctx.backend.poll_status(handle)
        })
        .await?;

        match status {
            OperationStatus::Succeeded => return Ok(()),
            OperationStatus::Failed { detail } => {
                return Err(BackendError::Permanent(detail).into());
            }
            OperationStatus::Pending => {}
        }

        let waited = ctx.clock.now().saturating_duration_since(started);
        let delay = ctx.config.poll.backoff.delay_for(attempt);
        if waited + delay > Duration::from_millis(ctx.config.poll.max_wait_ms) {
            return Err(TimeoutError::new(&handle.stack_id, waited.as_millis() as u64).into());
        }
        ctx.clock.sleep(delay).await;
        attempt += 1;
    }
}

/// Fetches and publishes a deployed stack's outputs for later batches.
async fn store_outputs(ctx: &RunContext, stack_id: &str) {
    match retry_transient(&ctx.config.call_retry, &*ctx.clock, || {
        ctx.backend.get_outputs(stack_id)
    })
    .await
    {
        Ok(outputs) => {
            ctx.outputs.write().insert(stack_id.to_string(), outputs);
        }
        Err(err) => {
            // Dependent references will fail with a descriptive error.
            warn!(stack = stack_id, error = %err, "could not fetch stack outputs");
        }
    }
}

/// Runs "before" hooks; a failure aborts the stack's operation.
async fn run_before_hooks(
    ctx: &RunContext,
    spec: &StackSpec,
    operation: HookOperation,
) -> Result<(), CirrusError> {
    for hook in spec.hooks_for(HookPhase::Before, operation) {
        let code = ctx.hooks.run(&hook.action).await.map_err(|err| {
            CirrusError::Internal(format!("hook '{}' failed to start: {err}", hook.action))
        })?;
        if code != 0 {
            return Err(HookError::new(&spec.id, hook.trigger(), &hook.action, code).into());
        }
    }
    Ok(())
}

/// Runs "after" hooks; failures are logged, never reverted.
async fn run_after_hooks(ctx: &RunContext, spec: &StackSpec, operation: HookOperation) {
    for hook in spec.hooks_for(HookPhase::After, operation) {
        match ctx.hooks.run(&hook.action).await {
            Ok(0) => {}
            Ok(code) => warn!(
                stack = %spec.id,
                action = %hook.action,
                code,
                "after hook exited non-zero"
            ),
            Err(err) => warn!(
                stack = %spec.id,
                action = %hook.action,
                error = %err,
                "after hook failed to start"
            ),
        }
    }
}

/// Moves an in-progress stack to Failed and records the error detail.
fn mark_failed(ctx: &RunContext, stack_id: &str, detail: &str) {
    if ctx.state.status(stack_id).is_in_progress() {
        if let Err(err) = ctx.state.apply_transition(stack_id, StackStatus::Failed) {
            warn!(stack = stack_id, error = %err, "could not mark stack failed");
        }
    }
    ctx.state.set_error(stack_id, detail);
}
