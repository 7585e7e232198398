//! Parameter values and placeholder parsing.
//!
//! Stack parameters are either immediate literals or late-bound values that
//! the orchestrator resolves in dependency order: references to another
//! stack's outputs, or calls to a registered resolver plugin. Configuration
//! loading only parses the tagged variant; evaluation happens during the run.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

/// Fully resolved parameters, ordered for canonical fingerprinting.
pub type ResolvedParameters = BTreeMap<String, String>;

/// A single stack parameter value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParameterValue {
    /// An immediate string value.
    Literal {
        /// The value.
        value: String,
    },
    /// Another stack's output, available once that stack is deployed.
    Reference {
        /// The stack whose output is referenced.
        stack_id: String,
        /// The output key on that stack.
        output_key: String,
    },
    /// A call to a registered resolver plugin, memoized per run.
    ResolverCall {
        /// The resolver name.
        resolver: String,
        /// Positional arguments for the resolver.
        args: Vec<String>,
    },
}

impl ParameterValue {
    /// Creates a literal value.
    #[must_use]
    pub fn literal(value: impl Into<String>) -> Self {
        Self::Literal {
            value: value.into(),
        }
    }

    /// Creates a reference to another stack's output.
    #[must_use]
    pub fn reference(stack_id: impl Into<String>, output_key: impl Into<String>) -> Self {
        Self::Reference {
            stack_id: stack_id.into(),
            output_key: output_key.into(),
        }
    }

    /// Creates a resolver call.
    #[must_use]
    pub fn resolver_call(
        resolver: impl Into<String>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self::ResolverCall {
            resolver: resolver.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns true if the value needs late resolution.
    #[must_use]
    pub fn is_deferred(&self) -> bool {
        !matches!(self, Self::Literal { .. })
    }

    /// Returns the referenced stack id, if this is a reference.
    #[must_use]
    pub fn referenced_stack(&self) -> Option<&str> {
        match self {
            Self::Reference { stack_id, .. } => Some(stack_id),
            _ => None,
        }
    }

    /// Parses a raw string into a parameter value.
    ///
    /// Strings shaped like `{{ ... }}` are placeholders:
    /// `{{ ref:stack.output }}` becomes a [`ParameterValue::Reference`] and
    /// `{{ resolve:name arg... }}` becomes a [`ParameterValue::ResolverCall`].
    /// Anything else in placeholder shape is rejected; plain strings are
    /// literals.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPlaceholder`] when the string is placeholder-shaped
    /// but matches no recognized form.
    pub fn parse(raw: &str) -> Result<Self, InvalidPlaceholder> {
        let Some(inner) = placeholder_inner(raw) else {
            return Ok(Self::literal(raw));
        };

        if let Some(caps) = ref_pattern().captures(inner) {
            return Ok(Self::Reference {
                stack_id: caps[1].to_string(),
                output_key: caps[2].to_string(),
            });
        }

        if let Some(caps) = resolve_pattern().captures(inner) {
            let args = caps
                .get(2)
                .map(|m| {
                    m.as_str()
                        .split_whitespace()
                        .map(ToString::to_string)
                        .collect()
                })
                .unwrap_or_default();
            return Ok(Self::ResolverCall {
                resolver: caps[1].to_string(),
                args,
            });
        }

        Err(InvalidPlaceholder {
            raw: raw.to_string(),
        })
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal { value } => write!(f, "{value}"),
            Self::Reference {
                stack_id,
                output_key,
            } => write!(f, "{{{{ ref:{stack_id}.{output_key} }}}}"),
            Self::ResolverCall { resolver, args } => {
                if args.is_empty() {
                    write!(f, "{{{{ resolve:{resolver} }}}}")
                } else {
                    write!(f, "{{{{ resolve:{resolver} {} }}}}", args.join(" "))
                }
            }
        }
    }
}

/// Error for a placeholder-shaped string that matches no known form.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid placeholder: '{raw}'")]
pub struct InvalidPlaceholder {
    /// The raw string as written in configuration.
    pub raw: String,
}

/// Returns the trimmed inner text if `raw` is placeholder-shaped.
fn placeholder_inner(raw: &str) -> Option<&str> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"^\{\{\s*(.+?)\s*\}\}$").unwrap()
    });
    pattern
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

fn ref_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"^ref:([A-Za-z0-9_-]+)\.([A-Za-z0-9_.-]+)$").unwrap()
    })
}

fn resolve_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"^resolve:([A-Za-z0-9_-]+)(?:\s+(.+))?$").unwrap()
    })
}
