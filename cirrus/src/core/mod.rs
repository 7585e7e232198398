//! Core data model: stack specifications, statuses, and parameter values.

mod params;
mod spec;
mod status;

pub use params::{InvalidPlaceholder, ParameterValue, ResolvedParameters};
pub use spec::{HookOperation, HookPhase, HookSpec, StackGroup, StackSpec};
pub use status::{StackAction, StackIntent, StackStatus};
