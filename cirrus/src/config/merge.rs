//! Deep merging of layered configuration documents.
//!
//! Layers merge deeply, rightmost wins per key. Sequence-valued keys follow
//! an explicit per-key policy: `Override` (default) replaces the whole
//! sequence, `Append` concatenates the overlay after the base.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// How a sequence-valued key merges across layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    /// The overlay sequence replaces the base sequence.
    #[default]
    Override,
    /// The overlay sequence is appended after the base sequence.
    Append,
}

/// Per-key merge policies, keyed by dotted path from the document root.
#[derive(Debug, Clone, Default)]
pub struct MergePolicies {
    policies: HashMap<String, MergePolicy>,
    default: MergePolicy,
}

impl MergePolicies {
    /// Creates an empty policy table with `Override` as the default.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default policy for keys without an explicit entry.
    #[must_use]
    pub fn with_default(mut self, policy: MergePolicy) -> Self {
        self.default = policy;
        self
    }

    /// Sets the policy for a dotted key path (e.g. `"hooks.before_create"`).
    #[must_use]
    pub fn with_policy(mut self, path: impl Into<String>, policy: MergePolicy) -> Self {
        self.policies.insert(path.into(), policy);
        self
    }

    /// Returns the policy for a dotted key path.
    #[must_use]
    pub fn policy_for(&self, path: &str) -> MergePolicy {
        self.policies.get(path).copied().unwrap_or(self.default)
    }
}

/// Merges an overlay document into a base document.
///
/// Objects merge per key recursively; arrays follow the policy for their
/// path; scalars and mismatched types are replaced by the overlay.
#[must_use]
pub fn merge_values(base: Value, overlay: Value, policies: &MergePolicies) -> Value {
    merge_at(base, overlay, policies, &mut Vec::new())
}

/// Merges a sequence of layers left to right.
#[must_use]
pub fn merge_layers(layers: impl IntoIterator<Item = Value>, policies: &MergePolicies) -> Value {
    layers
        .into_iter()
        .fold(Value::Object(serde_json::Map::new()), |acc, layer| {
            merge_values(acc, layer, policies)
        })
}

fn merge_at(base: Value, overlay: Value, policies: &MergePolicies, path: &mut Vec<String>) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                path.push(key.clone());
                let merged = match base_map.remove(&key) {
                    Some(base_value) => merge_at(base_value, overlay_value, policies, path),
                    None => overlay_value,
                };
                path.pop();
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (Value::Array(mut base_seq), Value::Array(overlay_seq)) => {
            match policies.policy_for(&path.join(".")) {
                MergePolicy::Override => Value::Array(overlay_seq),
                MergePolicy::Append => {
                    base_seq.extend(overlay_seq);
                    Value::Array(base_seq)
                }
            }
        }
        // Type mismatch or scalar: rightmost wins.
        (_, overlay) => overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_scalar_rightmost_wins() {
        let merged = merge_values(json!({"a": 1}), json!({"a": 2}), &MergePolicies::new());
        assert_eq!(merged, json!({"a": 2}));
    }

    #[test]
    fn test_deep_object_merge() {
        let base = json!({"parameters": {"cidr": "10.0.0.0/16", "env": "dev"}});
        let overlay = json!({"parameters": {"env": "prod"}});
        let merged = merge_values(base, overlay, &MergePolicies::new());

        assert_eq!(
            merged,
            json!({"parameters": {"cidr": "10.0.0.0/16", "env": "prod"}})
        );
    }

    #[test]
    fn test_unknown_keys_preserved() {
        let base = json!({"custom_tag": "team-a"});
        let overlay = json!({"template": "vpc.yaml"});
        let merged = merge_values(base, overlay, &MergePolicies::new());

        assert_eq!(merged["custom_tag"], "team-a");
        assert_eq!(merged["template"], "vpc.yaml");
    }

    #[test]
    fn test_sequence_override_default() {
        let merged = merge_values(
            json!({"subnets": ["a", "b"]}),
            json!({"subnets": ["c"]}),
            &MergePolicies::new(),
        );
        assert_eq!(merged, json!({"subnets": ["c"]}));
    }

    #[test]
    fn test_sequence_append_by_policy() {
        let policies =
            MergePolicies::new().with_policy("hooks.before_create", MergePolicy::Append);
        let merged = merge_values(
            json!({"hooks": {"before_create": ["lint"]}}),
            json!({"hooks": {"before_create": ["backup"]}}),
            &policies,
        );
        assert_eq!(merged["hooks"]["before_create"], json!(["lint", "backup"]));
    }

    #[test]
    fn test_merge_layers_order() {
        let merged = merge_layers(
            [
                json!({"region": "us-east-1", "env": "dev"}),
                json!({"env": "staging"}),
                json!({"env": "prod"}),
            ],
            &MergePolicies::new(),
        );
        assert_eq!(merged, json!({"region": "us-east-1", "env": "prod"}));
    }

    #[test]
    fn test_type_mismatch_replaced() {
        let merged = merge_values(
            json!({"value": {"nested": true}}),
            json!({"value": "flat"}),
            &MergePolicies::new(),
        );
        assert_eq!(merged["value"], "flat");
    }
}
