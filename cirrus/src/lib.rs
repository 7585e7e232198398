//! # Cirrus
//!
//! A declarative multi-account stack orchestrator.
//!
//! Cirrus turns a layered configuration of infrastructure stacks into an
//! executable plan and drives it against an abstract provisioning backend:
//!
//! - **Layered configuration**: global, per-group, and per-stack overlays
//!   merged rightmost-wins into immutable stack specs
//! - **Dependency planning**: cycle rejection and coarsest-batch layering
//!   so independent stacks run concurrently
//! - **Lifecycle tracking**: a legal-transition state machine with
//!   fingerprint-based change detection for idempotent re-runs
//! - **Deferred parameters**: cross-stack output references and pluggable
//!   resolvers, memoized per run
//! - **Cooperative cancellation**: in-flight operations stop at poll
//!   checkpoints, pending stacks are skipped
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use cirrus::prelude::*;
//!
//! let config = ConfigResolver::new().resolve(&raw)?;
//! let graph = DependencyGraph::build(&config)?;
//!
//! let orchestrator = Orchestrator::new(backend)
//!     .with_resolvers(resolvers);
//! let report = orchestrator.run(&graph, StackAction::Deploy).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod backend;
pub mod cancellation;
pub mod config;
pub mod core;
pub mod errors;
pub mod graph;
pub mod hooks;
pub mod observability;
pub mod orchestrator;
pub mod resolvers;
pub mod retry;
pub mod state;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::backend::{
        BackendClient, OperationHandle, OperationStatus, StackOutputs,
    };
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{
        ConfigResolver, MergePolicies, MergePolicy, RawConfig, RawGroup,
        RawStack, ResolvedConfig,
    };
    pub use crate::core::{
        HookOperation, HookPhase, HookSpec, ParameterValue,
        ResolvedParameters, StackAction, StackGroup, StackSpec, StackStatus,
    };
    pub use crate::errors::{BackendError, CirrusError, ConfigurationError, CycleError};
    pub use crate::graph::{DependencyGraph, ExecutionPlan};
    pub use crate::hooks::{HookExecutor, ShellHookExecutor};
    pub use crate::orchestrator::{
        Orchestrator, OrchestratorConfig, OutcomeStatus, RunReport,
        StackOutcome,
    };
    pub use crate::resolvers::{Resolver, ResolverRegistry};
    pub use crate::retry::{BackoffConfig, Clock, PollConfig, RetryConfig, SystemClock};
    pub use crate::state::{fingerprint, StackRecord, StateStore};
}
