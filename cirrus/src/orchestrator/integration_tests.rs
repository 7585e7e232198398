//! End-to-end orchestrator runs against scripted backends.

use super::*;
use crate::core::HookSpec;
use crate::errors::BackendError;
use crate::retry::BackoffConfig;
use crate::testing::{graph_of, three_tier_specs, CountingResolver, ManualClock, MockBackend};
use pretty_assertions::assert_eq;
use std::sync::Arc;

fn fast_config() -> OrchestratorConfig {
    let backoff = BackoffConfig {
        base_delay_ms: 1,
        multiplier: 2,
        max_delay_ms: 10,
        jitter: false,
    };
    OrchestratorConfig {
        max_concurrency: 4,
        call_retry: RetryConfig {
            max_attempts: 3,
            backoff: backoff.clone(),
        },
        poll: PollConfig {
            backoff,
            max_wait_ms: 60_000,
        },
    }
}

fn orchestrator(backend: Arc<MockBackend>) -> Orchestrator {
    Orchestrator::new(backend)
        .with_clock(Arc::new(ManualClock::new()))
        .with_config(fast_config())
}

#[tokio::test]
async fn test_three_tier_deploy_wires_outputs_through() {
    let backend = Arc::new(
        MockBackend::new()
            .with_outputs("vpc", &[("vpc_id", "vpc-123")])
            .with_outputs("db", &[("endpoint", "db.internal:5432")]),
    );
    let orch = orchestrator(backend.clone());
    let graph = graph_of(three_tier_specs());

    let report = orch.run(&graph, StackAction::Deploy).await.unwrap();

    assert!(report.succeeded());
    for id in ["vpc", "db", "app"] {
        assert_eq!(report.outcome(id).unwrap().end_status, OutcomeStatus::Deployed);
        assert_eq!(orch.state().status(id), StackStatus::Deployed);
    }
    assert_eq!(
        backend.calls_for("create_or_update"),
        vec!["vpc", "db", "app"]
    );
    assert_eq!(
        backend.parameters_for("db").unwrap().get("vpc_id"),
        Some(&"vpc-123".to_string())
    );
    assert_eq!(
        backend.parameters_for("app").unwrap().get("db_endpoint"),
        Some(&"db.internal:5432".to_string())
    );
}

#[tokio::test]
async fn test_failed_stack_blocks_transitive_dependents() {
    let backend = Arc::new(
        MockBackend::new()
            .with_outputs("vpc", &[("vpc_id", "vpc-123")])
            .with_statuses(
                "db",
                vec![OperationStatus::Failed {
                    detail: "quota exceeded".to_string(),
                }],
            ),
    );
    let orch = orchestrator(backend.clone());
    let graph = graph_of(three_tier_specs());

    let report = orch.run(&graph, StackAction::Deploy).await.unwrap();

    assert!(!report.succeeded());
    assert_eq!(report.outcome("vpc").unwrap().end_status, OutcomeStatus::Deployed);
    assert_eq!(report.outcome("db").unwrap().end_status, OutcomeStatus::Failed);
    let app = report.outcome("app").unwrap();
    assert_eq!(app.end_status, OutcomeStatus::Skipped);
    assert_eq!(
        app.error.as_deref(),
        Some("blocked by failed dependency: db")
    );
    assert_eq!(report.failed_stacks(), vec!["db"]);
    assert_eq!(orch.state().status("db"), StackStatus::Failed);
    // The skipped stack was never sent to the backend.
    assert!(!backend.calls().iter().any(|c| c.ends_with(":app")));
}

#[tokio::test]
async fn test_rerun_without_changes_is_noop() {
    let backend = Arc::new(
        MockBackend::new()
            .with_outputs("vpc", &[("vpc_id", "vpc-123")])
            .with_outputs("db", &[("endpoint", "db.internal:5432")]),
    );
    let orch = orchestrator(backend.clone());
    let graph = graph_of(three_tier_specs());

    let first = orch.run(&graph, StackAction::Deploy).await.unwrap();
    assert!(first.succeeded());

    let second = orch.run(&graph, StackAction::Deploy).await.unwrap();
    assert!(second.succeeded());
    for id in ["vpc", "db", "app"] {
        assert_eq!(
            second.outcome(id).unwrap().end_status,
            OutcomeStatus::Unchanged
        );
    }
    // One create per stack across both runs.
    assert_eq!(backend.calls_for("create_or_update").len(), 3);
}

#[tokio::test]
async fn test_changed_resolver_value_redeploys_only_affected_stack() {
    let ami = Arc::new(CountingResolver::new("ami-1"));
    let backend = Arc::new(MockBackend::new().with_outputs("svc", &[("url", "http://svc")]));
    let resolvers =
        Arc::new(ResolverRegistry::new().with_resolver("latest_ami", ami.clone()));
    let orch = orchestrator(backend.clone()).with_resolvers(resolvers);
    let graph = graph_of(vec![
        StackSpec::new("svc", "templates/svc.json").with_parameter(
            "ami",
            ParameterValue::resolver_call("latest_ami", Vec::<String>::new()),
        ),
        StackSpec::new("web", "templates/web.json")
            .with_parameter("svc_url", ParameterValue::reference("svc", "url")),
    ]);

    orch.run(&graph, StackAction::Deploy).await.unwrap();
    ami.set_value("ami-2");
    let report = orch.run(&graph, StackAction::Deploy).await.unwrap();

    assert_eq!(report.outcome("svc").unwrap().end_status, OutcomeStatus::Deployed);
    // Outputs did not change, so the dependent's fingerprint is stable.
    assert_eq!(report.outcome("web").unwrap().end_status, OutcomeStatus::Unchanged);
    assert_eq!(backend.calls_for("create_or_update"), vec!["svc", "web", "svc"]);
    assert_eq!(
        backend.parameters_for("svc").unwrap().get("ami"),
        Some(&"ami-2".to_string())
    );
}

#[tokio::test]
async fn test_resolver_invoked_once_per_run() {
    let region = Arc::new(CountingResolver::new("eu-west-1"));
    let backend = Arc::new(MockBackend::new());
    let resolvers = Arc::new(ResolverRegistry::new().with_resolver("region", region.clone()));
    let orch = orchestrator(backend).with_resolvers(resolvers);
    let call = ParameterValue::resolver_call("region", Vec::<String>::new());
    let graph = graph_of(vec![
        StackSpec::new("a", "t.json").with_parameter("region", call.clone()),
        StackSpec::new("b", "t.json").with_parameter("region", call),
    ]);

    let report = orch.run(&graph, StackAction::Deploy).await.unwrap();

    assert!(report.succeeded());
    assert_eq!(region.calls(), 1);
}

#[tokio::test]
async fn test_delete_runs_in_reverse_dependency_order() {
    let backend = Arc::new(
        MockBackend::new()
            .with_outputs("vpc", &[("vpc_id", "vpc-123")])
            .with_outputs("db", &[("endpoint", "db.internal:5432")]),
    );
    let orch = orchestrator(backend.clone());
    let graph = graph_of(three_tier_specs());

    orch.run(&graph, StackAction::Deploy).await.unwrap();
    let report = orch.run(&graph, StackAction::Delete).await.unwrap();

    assert!(report.succeeded());
    assert_eq!(backend.calls_for("delete"), vec!["app", "db", "vpc"]);
    for id in ["vpc", "db", "app"] {
        assert_eq!(report.outcome(id).unwrap().end_status, OutcomeStatus::Deleted);
        assert_eq!(orch.state().status(id), StackStatus::Deleted);
    }
}

#[tokio::test]
async fn test_delete_of_absent_stacks_is_noop() {
    let backend = Arc::new(MockBackend::new());
    let orch = orchestrator(backend.clone());
    let graph = graph_of(three_tier_specs());

    let report = orch.run(&graph, StackAction::Delete).await.unwrap();

    assert!(report.succeeded());
    for outcome in &report.outcomes {
        assert_eq!(outcome.end_status, OutcomeStatus::Unchanged);
    }
    assert!(backend.calls_for("delete").is_empty());
}

#[tokio::test]
async fn test_cancelled_run_skips_pending_stacks() {
    let backend = Arc::new(MockBackend::new());
    let orch = orchestrator(backend.clone());
    orch.cancellation_token().cancel("operator abort");
    let graph = graph_of(three_tier_specs());

    let report = orch.run(&graph, StackAction::Deploy).await.unwrap();

    for outcome in &report.outcomes {
        assert_eq!(outcome.end_status, OutcomeStatus::Skipped);
        assert_eq!(
            outcome.error.as_deref(),
            Some("run cancelled: operator abort")
        );
    }
    assert!(backend.calls().is_empty());
}

/// Backend that cancels the shared token from inside its first
/// `poll_status`, so the next poll checkpoint observes it
/// deterministically; later calls behave normally.
struct CancellingBackend {
    inner: MockBackend,
    token: Arc<CancellationToken>,
    fired: std::sync::atomic::AtomicBool,
}

#[async_trait::async_trait]
impl BackendClient for CancellingBackend {
    async fn create_or_update(
        &self,
        stack_id: &str,
        template: &str,
        parameters: &ResolvedParameters,
    ) -> Result<OperationHandle, BackendError> {
        self.inner
            .create_or_update(stack_id, template, parameters)
            .await
    }

    async fn delete(&self, stack_id: &str) -> Result<OperationHandle, BackendError> {
        self.inner.delete(stack_id).await
    }

    async fn poll_status(&self, handle: &OperationHandle) -> Result<OperationStatus, BackendError> {
        if !self.fired.swap(true, std::sync::atomic::Ordering::SeqCst) {
            self.token.cancel("shutdown requested");
            let _ = self.inner.poll_status(handle).await;
            return Ok(OperationStatus::Pending);
        }
        self.inner.poll_status(handle).await
    }

    async fn get_outputs(&self, stack_id: &str) -> Result<StackOutputs, BackendError> {
        self.inner.get_outputs(stack_id).await
    }
}

#[tokio::test]
async fn test_cancellation_interrupts_in_flight_stack() {
    let token = Arc::new(CancellationToken::new());
    let backend = Arc::new(CancellingBackend {
        inner: MockBackend::new(),
        token: token.clone(),
        fired: std::sync::atomic::AtomicBool::new(false),
    });
    let orch = Orchestrator::new(backend)
        .with_clock(Arc::new(ManualClock::new()))
        .with_config(fast_config())
        .with_cancellation(token);
    let graph = graph_of(vec![StackSpec::new("svc", "t.json")]);

    let report = orch.run(&graph, StackAction::Deploy).await.unwrap();

    let outcome = report.outcome("svc").unwrap();
    assert_eq!(outcome.end_status, OutcomeStatus::Interrupted);
    assert!(outcome
        .error
        .as_deref()
        .unwrap()
        .contains("shutdown requested"));
    // Remote state is unknown; the store keeps the in-progress status.
    assert_eq!(orch.state().status("svc"), StackStatus::Creating);
}

#[tokio::test]
async fn test_interrupted_stack_reconciles_on_rerun() {
    let token = Arc::new(CancellationToken::new());
    let backend = Arc::new(CancellingBackend {
        inner: MockBackend::new(),
        token: token.clone(),
        fired: std::sync::atomic::AtomicBool::new(false),
    });
    let orch = Orchestrator::new(backend.clone())
        .with_clock(Arc::new(ManualClock::new()))
        .with_config(fast_config())
        .with_cancellation(token.clone());
    let graph = graph_of(vec![StackSpec::new("svc", "t.json")]);

    let first = orch.run(&graph, StackAction::Deploy).await.unwrap();
    assert_eq!(
        first.outcome("svc").unwrap().end_status,
        OutcomeStatus::Interrupted
    );
    assert_eq!(orch.state().status("svc"), StackStatus::Creating);

    // The completed run cleared its token, so the next run proceeds and
    // redoes the interrupted operation instead of reporting Unchanged.
    assert!(!token.is_cancelled());
    let second = orch.run(&graph, StackAction::Deploy).await.unwrap();

    assert_eq!(
        second.outcome("svc").unwrap().end_status,
        OutcomeStatus::Deployed
    );
    assert_eq!(orch.state().status("svc"), StackStatus::Deployed);
    assert_eq!(backend.inner.calls_for("create_or_update"), vec!["svc", "svc"]);
}

struct ScriptedHooks {
    exit_code: i32,
    ran: parking_lot::Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl crate::hooks::HookExecutor for ScriptedHooks {
    async fn run(&self, action: &str) -> std::io::Result<i32> {
        self.ran.lock().push(action.to_string());
        Ok(self.exit_code)
    }
}

#[tokio::test]
async fn test_failed_before_hook_aborts_without_state_transition() {
    let hooks = Arc::new(ScriptedHooks {
        exit_code: 2,
        ran: parking_lot::Mutex::new(Vec::new()),
    });
    let backend = Arc::new(MockBackend::new());
    let orch = orchestrator(backend.clone()).with_hooks(hooks.clone());
    let graph = graph_of(vec![StackSpec::new("svc", "t.json").with_hook(HookSpec::new(
        HookPhase::Before,
        HookOperation::Create,
        "scripts/preflight.sh",
    ))]);

    let report = orch.run(&graph, StackAction::Deploy).await.unwrap();

    let outcome = report.outcome("svc").unwrap();
    assert_eq!(outcome.end_status, OutcomeStatus::Failed);
    assert!(outcome.error.as_deref().unwrap().contains("exited with code 2"));
    // The stack never left its starting status and the backend was not hit.
    assert_eq!(orch.state().status("svc"), StackStatus::Unknown);
    assert!(backend.calls().is_empty());
    assert_eq!(hooks.ran.lock().clone(), vec!["scripts/preflight.sh"]);
}

#[tokio::test]
async fn test_hooks_run_around_successful_operation() {
    let hooks = Arc::new(ScriptedHooks {
        exit_code: 0,
        ran: parking_lot::Mutex::new(Vec::new()),
    });
    let backend = Arc::new(MockBackend::new());
    let orch = orchestrator(backend).with_hooks(hooks.clone());
    let graph = graph_of(vec![StackSpec::new("svc", "t.json")
        .with_hook(HookSpec::new(
            HookPhase::Before,
            HookOperation::Create,
            "scripts/pre.sh",
        ))
        .with_hook(HookSpec::new(
            HookPhase::After,
            HookOperation::Create,
            "scripts/post.sh",
        ))]);

    let report = orch.run(&graph, StackAction::Deploy).await.unwrap();

    assert!(report.succeeded());
    assert_eq!(
        hooks.ran.lock().clone(),
        vec!["scripts/pre.sh", "scripts/post.sh"]
    );
}

#[tokio::test]
async fn test_transient_call_error_is_retried() {
    let backend = Arc::new(
        MockBackend::new()
            .with_call_error("svc", BackendError::Transient("throttled".to_string())),
    );
    let orch = orchestrator(backend.clone());
    let graph = graph_of(vec![StackSpec::new("svc", "t.json")]);

    let report = orch.run(&graph, StackAction::Deploy).await.unwrap();

    assert!(report.succeeded());
    assert_eq!(backend.calls_for("create_or_update"), vec!["svc", "svc"]);
}

#[tokio::test]
async fn test_permanent_call_error_fails_immediately() {
    let backend = Arc::new(
        MockBackend::new()
            .with_call_error("svc", BackendError::Permanent("template rejected".to_string())),
    );
    let orch = orchestrator(backend.clone());
    let graph = graph_of(vec![StackSpec::new("svc", "t.json")]);

    let report = orch.run(&graph, StackAction::Deploy).await.unwrap();

    let outcome = report.outcome("svc").unwrap();
    assert_eq!(outcome.end_status, OutcomeStatus::Failed);
    assert!(outcome.error.as_deref().unwrap().contains("template rejected"));
    assert_eq!(backend.calls_for("create_or_update"), vec!["svc"]);
    assert_eq!(orch.state().status("svc"), StackStatus::Failed);
}

#[tokio::test]
async fn test_polling_ceiling_times_out() {
    let backend = Arc::new(MockBackend::new().with_statuses(
        "svc",
        vec![OperationStatus::Pending; 100],
    ));
    let mut config = fast_config();
    config.poll.max_wait_ms = 5;
    let orch = Orchestrator::new(backend)
        .with_clock(Arc::new(ManualClock::new()))
        .with_config(config);
    let graph = graph_of(vec![StackSpec::new("svc", "t.json")]);

    let report = orch.run(&graph, StackAction::Deploy).await.unwrap();

    let outcome = report.outcome("svc").unwrap();
    assert_eq!(outcome.end_status, OutcomeStatus::Failed);
    assert!(outcome
        .error
        .as_deref()
        .unwrap()
        .contains("did not reach a terminal status"));
    assert_eq!(orch.state().status("svc"), StackStatus::Failed);
}

#[tokio::test]
async fn test_missing_reference_output_fails_dependent() {
    // vpc exports nothing, so db's reference cannot resolve.
    let backend = Arc::new(MockBackend::new());
    let orch = orchestrator(backend.clone());
    let graph = graph_of(three_tier_specs());

    let report = orch.run(&graph, StackAction::Deploy).await.unwrap();

    assert_eq!(report.outcome("vpc").unwrap().end_status, OutcomeStatus::Deployed);
    let db = report.outcome("db").unwrap();
    assert_eq!(db.end_status, OutcomeStatus::Failed);
    assert!(db
        .error
        .as_deref()
        .unwrap()
        .contains("output 'vpc_id' of stack 'vpc'"));
    assert_eq!(
        report.outcome("app").unwrap().end_status,
        OutcomeStatus::Skipped
    );
}
