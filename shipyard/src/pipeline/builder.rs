//! Pipeline builder with validation.
//!
//! Stages may reference dependencies defined later in the list; all
//! validation happens in [`PipelineBuilder::build`].

use super::{StageGraph, StageSpec};
use crate::errors::{
    ConfigurationError, CycleDetectedError, DuplicateStageError, UnknownDependencyError,
};
use crate::stages::Stage;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

/// Builder for creating validated stage graphs.
#[derive(Debug, Clone)]
pub struct PipelineBuilder {
    /// The pipeline name.
    name: String,
    /// Stage definitions in definition order.
    stages: Vec<StageSpec>,
}

impl PipelineBuilder {
    /// Creates a new pipeline builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Adds a stage to the pipeline.
    #[must_use]
    pub fn stage(mut self, id: impl Into<String>, runner: Arc<dyn Stage>, dependencies: &[&str]) -> Self {
        self.add_stage_spec(StageSpec::new(id, runner).with_dependencies(dependencies.iter().copied()));
        self
    }

    /// Adds a stage with a specification.
    pub fn add_stage_spec(&mut self, spec: StageSpec) {
        self.stages.push(spec);
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

    /// Validates the definitions and builds the graph.
    ///
    /// # Errors
    ///
    /// - `EmptyPipeline` when no stage is defined
    /// - `DuplicateStage` when two stages share an id
    /// - `UnknownDependency` when a dependency id is not defined
    /// - `CycleDetected` when the dependencies form a cycle
    pub fn build(self) -> Result<StageGraph, ConfigurationError> {
        if self.stages.is_empty() {
            return Err(ConfigurationError::EmptyPipeline { pipeline: self.name });
        }

        let mut index: HashMap<&str, usize> = HashMap::with_capacity(self.stages.len());
        for (i, spec) in self.stages.iter().enumerate() {
            if index.insert(spec.id.as_str(), i).is_some() {
                return Err(DuplicateStageError::new(&spec.id).into());
            }
        }

        let mut deps: Vec<Vec<usize>> = Vec::with_capacity(self.stages.len());
        for spec in &self.stages {
            let mut resolved = Vec::with_capacity(spec.dependencies.len());
            for dep in &spec.dependencies {
                match index.get(dep.as_str()) {
                    Some(&d) => resolved.push(d),
                    None => return Err(UnknownDependencyError::new(&spec.id, dep).into()),
                }
            }
            deps.push(resolved);
        }

        let order = topological_order(&deps).map_err(|remaining| {
            let cycle = find_cycle(&deps, &remaining)
                .into_iter()
                .map(|i| self.stages[i].id.clone())
                .collect();
            CycleDetectedError::new(cycle)
        })?;

        debug!(
            pipeline = %self.name,
            order = ?order.iter().map(|&i| self.stages[i].id.as_str()).collect::<Vec<_>>(),
            "Built stage graph"
        );

        Ok(StageGraph::from_ordered(self.name, self.stages, &order, &deps))
    }
}

/// Kahn's algorithm; among ready stages the earliest-defined runs first.
///
/// Returns the definition indices in topological order, or the indices left
/// unordered when the graph has a cycle.
fn topological_order(deps: &[Vec<usize>]) -> Result<Vec<usize>, Vec<usize>> {
    let n = deps.len();
    let mut in_degree: Vec<usize> = deps.iter().map(Vec::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (stage, stage_deps) in deps.iter().enumerate() {
        for &dep in stage_deps {
            dependents[dep].push(stage);
        }
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &child in &dependents[next] {
            in_degree[child] -= 1;
            if in_degree[child] == 0 {
                ready.insert(child);
            }
        }
    }

    if order.len() == n {
        Ok(order)
    } else {
        let placed: HashSet<usize> = order.into_iter().collect();
        Err((0..n).filter(|i| !placed.contains(i)).collect())
    }
}

/// Finds one cycle among the stages Kahn's algorithm could not order.
///
/// Every such stage depends on another unordered stage, so a depth-first
/// walk along dependencies always closes a loop.
fn find_cycle(deps: &[Vec<usize>], remaining: &[usize]) -> Vec<usize> {
    let remaining: HashSet<usize> = remaining.iter().copied().collect();
    let mut visited = HashSet::new();
    let mut on_path = HashSet::new();
    let mut path = Vec::new();

    let mut starts: Vec<usize> = remaining.iter().copied().collect();
    starts.sort_unstable();
    for start in starts {
        if !visited.contains(&start) {
            if let Some(cycle) =
                dfs_cycle(start, deps, &remaining, &mut visited, &mut on_path, &mut path)
            {
                return cycle;
            }
        }
    }
    Vec::new()
}

fn dfs_cycle(
    node: usize,
    deps: &[Vec<usize>],
    remaining: &HashSet<usize>,
    visited: &mut HashSet<usize>,
    on_path: &mut HashSet<usize>,
    path: &mut Vec<usize>,
) -> Option<Vec<usize>> {
    visited.insert(node);
    on_path.insert(node);
    path.push(node);

    for &dep in deps[node].iter().filter(|d| remaining.contains(d)) {
        if on_path.contains(&dep) {
            let start = path.iter().position(|&n| n == dep).unwrap_or(0);
            // Path runs dependent -> dependency; flip it so the cycle reads in dependency order.
            let mut cycle = path[start..].to_vec();
            cycle.reverse();
            return Some(cycle);
        }
        if !visited.contains(&dep) {
            if let Some(cycle) = dfs_cycle(dep, deps, remaining, visited, on_path, path) {
                return Some(cycle);
            }
        }
    }

    path.pop();
    on_path.remove(&node);
    None
}
