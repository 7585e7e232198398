//! Layered configuration handling.
//!
//! Configuration arrives as a tree of overlays (global, per group, per
//! stack) and leaves as immutable [`crate::core::StackSpec`]s. See
//! [`merge`] for the layering semantics and [`resolver`] for reserved-key
//! extraction.

mod merge;
mod resolver;

pub use merge::{merge_layers, merge_values, MergePolicies, MergePolicy};
pub use resolver::{ConfigResolver, RawConfig, RawGroup, RawStack, ResolvedConfig};
