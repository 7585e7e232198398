//! Stack and stack-group specifications.

use crate::core::params::ParameterValue;
use crate::errors::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// When a hook fires relative to the backend operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPhase {
    /// Before the backend call; a non-zero exit aborts the stack.
    Before,
    /// After a successful backend call; a non-zero exit only warns.
    After,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Before => write!(f, "before"),
            Self::After => write!(f, "after"),
        }
    }
}

/// The backend operation a hook is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookOperation {
    /// Stack creation.
    Create,
    /// Stack update.
    Update,
    /// Stack deletion.
    Delete,
}

impl fmt::Display for HookOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "create"),
            Self::Update => write!(f, "update"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

/// A single hook definition on a stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookSpec {
    /// When the hook fires.
    pub phase: HookPhase,
    /// The operation it is attached to.
    pub operation: HookOperation,
    /// The opaque action handed to the hook executor.
    pub action: String,
}

impl HookSpec {
    /// Creates a new hook definition.
    #[must_use]
    pub fn new(phase: HookPhase, operation: HookOperation, action: impl Into<String>) -> Self {
        Self {
            phase,
            operation,
            action: action.into(),
        }
    }

    /// Returns true if the hook applies to the given phase and operation.
    #[must_use]
    pub fn applies_to(&self, phase: HookPhase, operation: HookOperation) -> bool {
        self.phase == phase && self.operation == operation
    }

    /// Human-readable trigger description, e.g. "before create".
    #[must_use]
    pub fn trigger(&self) -> String {
        format!("{} {}", self.phase, self.operation)
    }
}

/// A fully resolved specification for a single stack.
///
/// Produced by the config resolver; immutable afterwards. Parameter values
/// may still be late-bound; the orchestrator evaluates those in dependency
/// order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackSpec {
    /// Unique stack identifier.
    pub id: String,
    /// The stack group this stack belongs to.
    pub group: String,
    /// Opaque template reference handed to the backend.
    pub template: String,
    /// Explicitly declared dependency stack ids.
    pub dependencies: BTreeSet<String>,
    /// Parameter mapping; values may be literals or late-bound.
    pub parameters: BTreeMap<String, ParameterValue>,
    /// Ordered hook definitions.
    pub hooks: Vec<HookSpec>,
    /// Unrecognized configuration keys, preserved for forward compatibility.
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl StackSpec {
    /// Creates a new stack specification.
    #[must_use]
    pub fn new(id: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            group: String::new(),
            template: template.into(),
            dependencies: BTreeSet::new(),
            parameters: BTreeMap::new(),
            hooks: Vec::new(),
            extra: BTreeMap::new(),
        }
    }

    /// Sets the stack group name.
    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// Adds a declared dependency.
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        self.dependencies.insert(dep.into());
        self
    }

    /// Sets the declared dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    /// Adds a parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: ParameterValue) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Adds a hook.
    #[must_use]
    pub fn with_hook(mut self, hook: HookSpec) -> Self {
        self.hooks.push(hook);
        self
    }

    /// All dependencies: declared plus implicit from reference parameters.
    #[must_use]
    pub fn all_dependencies(&self) -> BTreeSet<String> {
        let mut deps = self.dependencies.clone();
        for value in self.parameters.values() {
            if let Some(stack_id) = value.referenced_stack() {
                deps.insert(stack_id.to_string());
            }
        }
        deps
    }

    /// Hooks matching a phase and operation, in declaration order.
    #[must_use]
    pub fn hooks_for(&self, phase: HookPhase, operation: HookOperation) -> Vec<&HookSpec> {
        self.hooks
            .iter()
            .filter(|hook| hook.applies_to(phase, operation))
            .collect()
    }

    /// Validates the specification.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack depends on itself, directly or through
    /// one of its own reference parameters.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.all_dependencies().contains(&self.id) {
            return Err(ConfigurationError::new(
                &self.id,
                "depends_on",
                "stack cannot depend on itself",
            ));
        }
        Ok(())
    }
}

/// A named collection of stacks sharing a configuration overlay.
///
/// Immutable after resolution. The `sequential` flag forces the group's
/// members into declaration order even without explicit dependencies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackGroup {
    /// The group name.
    pub name: String,
    /// Member stack ids, in declaration order.
    pub stack_ids: Vec<String>,
    /// Whether members must deploy one at a time, in order.
    pub sequential: bool,
}

impl StackGroup {
    /// Creates a new stack group.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stack_ids: Vec::new(),
            sequential: false,
        }
    }

    /// Sets the member stacks.
    #[must_use]
    pub fn with_stacks(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.stack_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Marks the group as sequential.
    #[must_use]
    pub fn sequential(mut self) -> Self {
        self.sequential = true;
        self
    }
}
