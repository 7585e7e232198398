//! Shared graph fixtures.

use crate::config::ResolvedConfig;
use crate::core::{ParameterValue, StackSpec};
use crate::graph::DependencyGraph;

/// Builds a graph from bare specs with no group structure.
///
/// # Panics
///
/// Panics when the specs do not form a valid acyclic graph; fixtures are
/// expected to be well-formed.
#[must_use]
pub fn graph_of(stacks: Vec<StackSpec>) -> DependencyGraph {
    let config = ResolvedConfig {
        groups: Vec::new(),
        stacks,
    };
    DependencyGraph::build(&config).expect("fixture graph must be valid")
}

/// The canonical three-tier scenario: `app` depends on `db` depends on
/// `vpc`, with outputs wired through reference parameters.
#[must_use]
pub fn three_tier_specs() -> Vec<StackSpec> {
    vec![
        StackSpec::new("vpc", "templates/network.json"),
        StackSpec::new("db", "templates/database.json")
            .with_parameter("vpc_id", ParameterValue::reference("vpc", "vpc_id")),
        StackSpec::new("app", "templates/app.json")
            .with_parameter("db_endpoint", ParameterValue::reference("db", "endpoint")),
    ]
}
