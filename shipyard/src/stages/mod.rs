//! Stage trait and implementations.
//!
//! Stages are the units of work in a pipeline. The executor treats every
//! stage action as opaque: it hands over a [`StageContext`] (which carries the
//! workspace path) and records the returned [`StageOutput`].

mod command;
mod fs;

pub use command::{CommandStage, OUTPUT_TAIL_BYTES};
pub use fs::{FsOperation, FsStage};

use crate::context::StageContext;
use crate::core::StageOutput;
use async_trait::async_trait;
use std::fmt::Debug;

/// Trait for pipeline stage actions.
#[async_trait]
pub trait Stage: Send + Sync + Debug {
    /// Returns the name of the action.
    fn name(&self) -> &str;

    /// Executes the action.
    ///
    /// # Arguments
    ///
    /// * `ctx` - The stage execution context
    ///
    /// # Returns
    ///
    /// The stage output indicating success or failure.
    async fn execute(&self, ctx: &StageContext) -> StageOutput;
}

/// A simple function-based stage.
pub struct FnStage<F>
where
    F: Fn(&StageContext) -> StageOutput + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(&StageContext) -> StageOutput + Send + Sync,
{
    /// Creates a new function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(&StageContext) -> StageOutput + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> Stage for FnStage<F>
where
    F: Fn(&StageContext) -> StageOutput + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        (self.func)(ctx)
    }
}

/// A stage that does nothing and succeeds.
#[derive(Debug, Clone)]
pub struct NoOpStage {
    name: String,
}

impl NoOpStage {
    /// Creates a new no-op stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Stage for NoOpStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &StageContext) -> StageOutput {
        StageOutput::ok()
    }
}
