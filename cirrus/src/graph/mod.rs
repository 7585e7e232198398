//! Stack dependency graph and execution planning.
//!
//! Builds a DAG from declared dependencies plus implicit dependencies from
//! reference parameters, validates it (unknown dependencies, cycles), and
//! layers it into the coarsest batches safe for concurrent execution.

use crate::config::ResolvedConfig;
use crate::core::{StackGroup, StackSpec};
use crate::errors::{CirrusError, ConfigurationError, CycleError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::debug;

/// An ordered list of batches; stacks within a batch share no edges.
///
/// Invariant: for every edge (A depends on B), B's batch index is strictly
/// less than A's.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Batches in deploy order; each batch is sorted lexicographically.
    pub batches: Vec<Vec<String>>,
}

impl ExecutionPlan {
    /// Returns the batch index of a stack, if it is in the plan.
    #[must_use]
    pub fn batch_index(&self, stack_id: &str) -> Option<usize> {
        self.batches
            .iter()
            .position(|batch| batch.iter().any(|id| id == stack_id))
    }

    /// Returns the batches in delete order (reverse of deploy order).
    #[must_use]
    pub fn reversed(&self) -> Vec<Vec<String>> {
        self.batches.iter().rev().cloned().collect()
    }

    /// Total number of stacks in the plan.
    #[must_use]
    pub fn stack_count(&self) -> usize {
        self.batches.iter().map(Vec::len).sum()
    }

    /// Returns true if the plan contains no stacks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

/// A validated directed acyclic graph of stacks.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    specs: BTreeMap<String, StackSpec>,
    /// stack id -> the stacks it depends on (incl. sequential-group edges).
    dependencies: BTreeMap<String, BTreeSet<String>>,
    /// stack id -> the stacks that depend on it.
    dependents: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    /// Builds and validates the graph from resolved configuration.
    ///
    /// Sequential groups contribute an edge between each pair of
    /// consecutive members, which degrades their batches to singletons.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError`] for a dependency on an unknown stack
    /// and [`CycleError`] (with the full cycle path) for a cycle.
    pub fn build(config: &ResolvedConfig) -> Result<Self, CirrusError> {
        let specs: BTreeMap<String, StackSpec> = config
            .stacks
            .iter()
            .map(|spec| (spec.id.clone(), spec.clone()))
            .collect();

        let mut dependencies: BTreeMap<String, BTreeSet<String>> = specs
            .keys()
            .map(|id| (id.clone(), BTreeSet::new()))
            .collect();

        for spec in specs.values() {
            for dep in spec.all_dependencies() {
                if !specs.contains_key(&dep) {
                    return Err(ConfigurationError::unknown_dependency(&spec.id, &dep).into());
                }
                if let Some(deps) = dependencies.get_mut(&spec.id) {
                    deps.insert(dep);
                }
            }
        }

        for group in &config.groups {
            if group.sequential {
                add_sequential_edges(&mut dependencies, group);
            }
        }

        let mut dependents: BTreeMap<String, BTreeSet<String>> = specs
            .keys()
            .map(|id| (id.clone(), BTreeSet::new()))
            .collect();
        for (id, deps) in &dependencies {
            for dep in deps {
                if let Some(set) = dependents.get_mut(dep) {
                    set.insert(id.clone());
                }
            }
        }

        let graph = Self {
            specs,
            dependencies,
            dependents,
        };
        graph.detect_cycle()?;
        Ok(graph)
    }

    /// Returns the spec for a stack id.
    #[must_use]
    pub fn spec(&self, stack_id: &str) -> Option<&StackSpec> {
        self.specs.get(stack_id)
    }

    /// Returns the direct dependencies of a stack.
    #[must_use]
    pub fn dependencies_of(&self, stack_id: &str) -> BTreeSet<String> {
        self.dependencies.get(stack_id).cloned().unwrap_or_default()
    }

    /// Returns the direct dependents of a stack.
    #[must_use]
    pub fn dependents_of(&self, stack_id: &str) -> BTreeSet<String> {
        self.dependents.get(stack_id).cloned().unwrap_or_default()
    }

    /// Returns every transitive dependent of a stack.
    #[must_use]
    pub fn transitive_dependents(&self, stack_id: &str) -> BTreeSet<String> {
        self.reachable(stack_id, &self.dependents)
    }

    /// Returns every transitive dependency of a stack.
    #[must_use]
    pub fn transitive_dependencies(&self, stack_id: &str) -> BTreeSet<String> {
        self.reachable(stack_id, &self.dependencies)
    }

    /// Number of stacks in the graph.
    #[must_use]
    pub fn stack_count(&self) -> usize {
        self.specs.len()
    }

    /// Computes the coarsest batching of the graph.
    ///
    /// batch\[0\] holds all stacks with no dependencies; batch\[i\] holds
    /// stacks whose dependencies all lie in earlier batches. Batches are
    /// sorted lexicographically for deterministic output.
    #[must_use]
    pub fn plan(&self) -> ExecutionPlan {
        let mut unplaced: BTreeSet<String> = self.specs.keys().cloned().collect();
        let mut placed: BTreeSet<String> = BTreeSet::new();
        let mut batches = Vec::new();

        while !unplaced.is_empty() {
            // Acyclicity guarantees progress on every pass.
            let ready: Vec<String> = unplaced
                .iter()
                .filter(|id| {
                    self.dependencies[*id]
                        .iter()
                        .all(|dep| placed.contains(dep))
                })
                .cloned()
                .collect();

            debug_assert!(!ready.is_empty(), "validated graph stalled while batching");
            for id in &ready {
                unplaced.remove(id);
                placed.insert(id.clone());
            }
            batches.push(ready);
        }

        debug!(batches = batches.len(), stacks = placed.len(), "computed execution plan");
        ExecutionPlan { batches }
    }

    /// Three-color depth-first cycle detection.
    ///
    /// White = unvisited, gray = on the current path, black = finished. A
    /// gray neighbor is a back edge; the cycle is the path segment from
    /// that neighbor, closed on itself.
    fn detect_cycle(&self) -> Result<(), CycleError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Color {
            White,
            Gray,
            Black,
        }

        let mut colors: BTreeMap<&str, Color> = self
            .specs
            .keys()
            .map(|id| (id.as_str(), Color::White))
            .collect();

        fn visit<'a>(
            node: &'a str,
            dependencies: &'a BTreeMap<String, BTreeSet<String>>,
            colors: &mut BTreeMap<&'a str, Color>,
            path: &mut Vec<&'a str>,
        ) -> Option<Vec<String>> {
            colors.insert(node, Color::Gray);
            path.push(node);

            if let Some(deps) = dependencies.get(node) {
                for dep in deps {
                    match colors.get(dep.as_str()).copied() {
                        Some(Color::Gray) => {
                            // Back edge: slice the path from the first
                            // occurrence of `dep` and close the loop.
                            let start =
                                path.iter().position(|id| *id == dep.as_str()).unwrap_or(0);
                            let mut cycle: Vec<String> =
                                path[start..].iter().map(ToString::to_string).collect();
                            cycle.push(dep.clone());
                            return Some(cycle);
                        }
                        Some(Color::White) => {
                            if let Some(cycle) = visit(dep, dependencies, colors, path) {
                                return Some(cycle);
                            }
                        }
                        _ => {}
                    }
                }
            }

            path.pop();
            colors.insert(node, Color::Black);
            None
        }

        for id in self.specs.keys() {
            if colors.get(id.as_str()) == Some(&Color::White) {
                let mut path = Vec::new();
                if let Some(cycle) = visit(id, &self.dependencies, &mut colors, &mut path) {
                    return Err(CycleError::new(cycle));
                }
            }
        }
        Ok(())
    }

    fn reachable(
        &self,
        start: &str,
        edges: &BTreeMap<String, BTreeSet<String>>,
    ) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<String> = edges
            .get(start)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();

        while let Some(id) = queue.pop_front() {
            if seen.insert(id.clone()) {
                if let Some(next) = edges.get(&id) {
                    queue.extend(next.iter().cloned());
                }
            }
        }
        seen
    }
}

/// Chains consecutive members of a sequential group.
fn add_sequential_edges(
    dependencies: &mut BTreeMap<String, BTreeSet<String>>,
    group: &StackGroup,
) {
    for window in group.stack_ids.windows(2) {
        if let [prev, next] = window {
            if let Some(deps) = dependencies.get_mut(next) {
                deps.insert(prev.clone());
            }
        }
    }
}
