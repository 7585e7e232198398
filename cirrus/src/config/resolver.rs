//! Layered configuration resolution into stack specifications.
//!
//! The resolver is a pure transform: global, group, and stack overlays are
//! deep-merged (rightmost wins), reserved keys are extracted into typed
//! fields, and placeholder strings are parsed into tagged parameter values.
//! Nothing is evaluated here; references and resolver calls stay deferred
//! so the orchestrator can satisfy them in dependency order.

use crate::config::merge::{merge_layers, MergePolicies};
use crate::core::{
    HookOperation, HookPhase, HookSpec, ParameterValue, StackGroup, StackSpec,
};
use crate::errors::ConfigurationError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Reserved configuration keys consumed by the resolver.
const RESERVED_KEYS: &[&str] = &["template", "depends_on", "parameters", "hooks", "sequential"];

/// Raw configuration input: a base document plus per-group layers.
///
/// The exact on-disk syntax is the caller's concern; cirrus only requires
/// the layered document tree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawConfig {
    /// Global configuration overlay applied to every stack.
    #[serde(default)]
    pub base: Value,
    /// The declared stack groups.
    #[serde(default)]
    pub groups: Vec<RawGroup>,
}

/// A raw stack group: a name, a group-level overlay, and member stacks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawGroup {
    /// The group name.
    pub name: String,
    /// Group-level configuration overlay.
    #[serde(default)]
    pub overlay: Value,
    /// Member stacks in declaration order.
    #[serde(default)]
    pub stacks: Vec<RawStack>,
}

/// A raw stack declaration: an id and a stack-level overlay.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawStack {
    /// The stack id, unique within the group.
    pub id: String,
    /// Stack-level configuration overlay.
    #[serde(default)]
    pub overlay: Value,
}

/// Output of configuration resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedConfig {
    /// The resolved stack groups, in declaration order.
    pub groups: Vec<StackGroup>,
    /// One spec per declared stack, in declaration order.
    pub stacks: Vec<StackSpec>,
}

impl ResolvedConfig {
    /// Looks up a stack spec by id.
    #[must_use]
    pub fn stack(&self, id: &str) -> Option<&StackSpec> {
        self.stacks.iter().find(|spec| spec.id == id)
    }
}

/// Merges layered configuration into immutable stack specifications.
#[derive(Debug, Clone, Default)]
pub struct ConfigResolver {
    policies: MergePolicies,
}

impl ConfigResolver {
    /// Creates a resolver with default merge policies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the sequence merge policies.
    #[must_use]
    pub fn with_policies(mut self, policies: MergePolicies) -> Self {
        self.policies = policies;
        self
    }

    /// Resolves the raw configuration into groups and stack specs.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] naming the offending stack and key
    /// for duplicate ids, missing templates, malformed reserved keys, or
    /// unrecognized placeholder syntax.
    pub fn resolve(&self, raw: &RawConfig) -> Result<ResolvedConfig, ConfigurationError> {
        let mut groups = Vec::with_capacity(raw.groups.len());
        let mut stacks: Vec<StackSpec> = Vec::new();

        for raw_group in &raw.groups {
            let sequential = raw_group
                .overlay
                .get("sequential")
                .and_then(Value::as_bool)
                .unwrap_or(false);

            let mut group = StackGroup::new(&raw_group.name);
            if sequential {
                group = group.sequential();
            }

            for raw_stack in &raw_group.stacks {
                if stacks.iter().any(|spec| spec.id == raw_stack.id) {
                    return Err(ConfigurationError::new(
                        &raw_stack.id,
                        "id",
                        "duplicate stack id",
                    ));
                }

                let merged = merge_layers(
                    [
                        raw.base.clone(),
                        raw_group.overlay.clone(),
                        raw_stack.overlay.clone(),
                    ],
                    &self.policies,
                );
                debug!(stack = %raw_stack.id, group = %raw_group.name, "resolved stack layers");

                let spec = self.build_spec(&raw_stack.id, &raw_group.name, merged)?;
                spec.validate()?;
                group.stack_ids.push(spec.id.clone());
                stacks.push(spec);
            }

            groups.push(group);
        }

        Ok(ResolvedConfig { groups, stacks })
    }

    /// Extracts reserved keys from a merged document into a spec.
    fn build_spec(
        &self,
        id: &str,
        group: &str,
        merged: Value,
    ) -> Result<StackSpec, ConfigurationError> {
        let Value::Object(doc) = merged else {
            return Err(ConfigurationError::new(
                id,
                "",
                "stack configuration must be a mapping",
            ));
        };

        let template = doc
            .get("template")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ConfigurationError::new(id, "template", "missing or not a string")
            })?
            .to_string();

        let mut spec = StackSpec::new(id, template).with_group(group);

        if let Some(deps) = doc.get("depends_on") {
            let list = deps.as_array().ok_or_else(|| {
                ConfigurationError::new(id, "depends_on", "must be a sequence of stack ids")
            })?;
            for dep in list {
                let dep = dep.as_str().ok_or_else(|| {
                    ConfigurationError::new(id, "depends_on", "dependency ids must be strings")
                })?;
                spec.dependencies.insert(dep.to_string());
            }
        }

        if let Some(params) = doc.get("parameters") {
            let map = params.as_object().ok_or_else(|| {
                ConfigurationError::new(id, "parameters", "must be a mapping")
            })?;
            for (key, value) in map {
                spec.parameters
                    .insert(key.clone(), parse_parameter(id, key, value)?);
            }
        }

        if let Some(hooks) = doc.get("hooks") {
            spec.hooks = parse_hooks(id, hooks)?;
        }

        spec.extra = doc
            .into_iter()
            .filter(|(key, _)| !RESERVED_KEYS.contains(&key.as_str()))
            .collect();

        Ok(spec)
    }
}

/// Parses one parameter value, accepting scalars and placeholder strings.
fn parse_parameter(
    stack_id: &str,
    key: &str,
    value: &Value,
) -> Result<ParameterValue, ConfigurationError> {
    let full_key = format!("parameters.{key}");
    match value {
        Value::String(raw) => ParameterValue::parse(raw).map_err(|err| {
            ConfigurationError::unresolved_placeholder(stack_id, &full_key, &err.raw)
        }),
        Value::Number(n) => Ok(ParameterValue::literal(n.to_string())),
        Value::Bool(b) => Ok(ParameterValue::literal(b.to_string())),
        _ => Err(ConfigurationError::new(
            stack_id,
            full_key,
            "parameter values must be scalars",
        )),
    }
}

/// Parses the `hooks` mapping: trigger key to ordered action list.
fn parse_hooks(stack_id: &str, hooks: &Value) -> Result<Vec<HookSpec>, ConfigurationError> {
    let map = hooks.as_object().ok_or_else(|| {
        ConfigurationError::new(stack_id, "hooks", "must be a mapping of trigger to actions")
    })?;

    let mut parsed = Vec::new();
    for (trigger, actions) in map {
        let (phase, operation) = parse_trigger(stack_id, trigger)?;
        let list = actions.as_array().ok_or_else(|| {
            ConfigurationError::new(
                stack_id,
                format!("hooks.{trigger}"),
                "must be a sequence of actions",
            )
        })?;
        for action in list {
            let action = action.as_str().ok_or_else(|| {
                ConfigurationError::new(
                    stack_id,
                    format!("hooks.{trigger}"),
                    "hook actions must be strings",
                )
            })?;
            parsed.push(HookSpec::new(phase, operation, action));
        }
    }
    Ok(parsed)
}

/// Parses a trigger key like `before_create` or `after_delete`.
fn parse_trigger(
    stack_id: &str,
    trigger: &str,
) -> Result<(HookPhase, HookOperation), ConfigurationError> {
    let invalid = || {
        ConfigurationError::new(
            stack_id,
            format!("hooks.{trigger}"),
            "unknown hook trigger; expected <before|after>_<create|update|delete>",
        )
    };

    let (phase, operation) = trigger.split_once('_').ok_or_else(invalid)?;
    let phase = match phase {
        "before" => HookPhase::Before,
        "after" => HookPhase::After,
        _ => return Err(invalid()),
    };
    let operation = match operation {
        "create" => HookOperation::Create,
        "update" => HookOperation::Update,
        "delete" => HookOperation::Delete,
        _ => return Err(invalid()),
    };
    Ok((phase, operation))
}
