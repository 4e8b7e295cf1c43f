//! Stage specifications.

use crate::stages::Stage;
use std::sync::Arc;
use std::time::Duration;

/// Specification for a single stage in a pipeline.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// The unique id of the stage.
    pub id: String,
    /// The stage action.
    pub runner: Arc<dyn Stage>,
    /// Ids of stages this stage depends on, in declaration order, without duplicates.
    pub dependencies: Vec<String>,
    /// Optional limit on how long the action may run.
    pub timeout: Option<Duration>,
}

impl StageSpec {
    /// Creates a new stage specification.
    #[must_use]
    pub fn new(id: impl Into<String>, runner: Arc<dyn Stage>) -> Self {
        Self {
            id: id.into(),
            runner,
            dependencies: Vec::new(),
            timeout: None,
        }
    }

    /// Sets the dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.dependencies.clear();
        for dep in deps {
            self = self.with_dependency(dep);
        }
        self
    }

    /// Adds a dependency. Repeated ids are ignored.
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<String>) -> Self {
        let dep = dep.into();
        if !self.dependencies.contains(&dep) {
            self.dependencies.push(dep);
        }
        self
    }

    /// Sets the action timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}
