//! Immutable, validated stage graph.

use super::StageSpec;
use std::collections::HashMap;

/// A directed acyclic graph of stages in topological order.
///
/// Built by [`super::PipelineBuilder`]; every dependency resolves and the
/// graph has no cycles. Stage positions are topological indices, so a
/// stage's dependencies always have smaller indices than the stage itself.
#[derive(Debug, Clone)]
pub struct StageGraph {
    /// The pipeline name.
    name: String,
    /// Stage specifications in topological order.
    stages: Vec<StageSpec>,
    /// Stage id to topological index.
    index: HashMap<String, usize>,
    /// Dependencies per stage, as topological indices.
    dependencies: Vec<Vec<usize>>,
    /// Direct dependents per stage, as topological indices in ascending order.
    dependents: Vec<Vec<usize>>,
}

impl StageGraph {
    /// Assembles the graph from definitions and a validated topological order.
    pub(crate) fn from_ordered(
        name: String,
        definitions: Vec<StageSpec>,
        order: &[usize],
        definition_deps: &[Vec<usize>],
    ) -> Self {
        let mut position = vec![0usize; definitions.len()];
        for (topo, &def) in order.iter().enumerate() {
            position[def] = topo;
        }

        let mut slots: Vec<Option<StageSpec>> = definitions.into_iter().map(Some).collect();
        let stages: Vec<StageSpec> = order.iter().filter_map(|&def| slots[def].take()).collect();

        let dependencies: Vec<Vec<usize>> = order
            .iter()
            .map(|&def| definition_deps[def].iter().map(|&d| position[d]).collect())
            .collect();

        let mut dependents = vec![Vec::new(); stages.len()];
        for (stage, deps) in dependencies.iter().enumerate() {
            for &dep in deps {
                dependents[dep].push(stage);
            }
        }

        let index = stages
            .iter()
            .enumerate()
            .map(|(i, spec)| (spec.id.clone(), i))
            .collect();

        Self {
            name,
            stages,
            index,
            dependencies,
            dependents,
        }
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Returns the stage ids in execution (topological) order.
    #[must_use]
    pub fn execution_order(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.id.as_str()).collect()
    }

    /// Returns a stage specification by id.
    #[must_use]
    pub fn stage(&self, id: &str) -> Option<&StageSpec> {
        self.index.get(id).map(|&i| &self.stages[i])
    }

    /// Returns the ids a stage depends on, in declaration order.
    #[must_use]
    pub fn dependencies_of(&self, id: &str) -> Vec<&str> {
        self.index.get(id).map_or_else(Vec::new, |&i| {
            self.dependencies[i]
                .iter()
                .map(|&d| self.stages[d].id.as_str())
                .collect()
        })
    }

    /// Returns the ids that directly depend on a stage.
    #[must_use]
    pub fn dependents_of(&self, id: &str) -> Vec<&str> {
        self.index.get(id).map_or_else(Vec::new, |&i| {
            self.dependents[i]
                .iter()
                .map(|&d| self.stages[d].id.as_str())
                .collect()
        })
    }

    pub(crate) fn spec_at(&self, i: usize) -> &StageSpec {
        &self.stages[i]
    }

    pub(crate) fn dependency_count(&self, i: usize) -> usize {
        self.dependencies[i].len()
    }

    pub(crate) fn dependents_at(&self, i: usize) -> &[usize] {
        &self.dependents[i]
    }
}
