//! Pipeline building and execution.
//!
//! This module provides:
//! - Stage specifications
//! - Pipeline builder with validation
//! - The stage graph and its executor

mod builder;
mod dag;
mod executor;
mod spec;

#[cfg(test)]
mod integration_tests;

pub use builder::PipelineBuilder;
pub use dag::StageGraph;
pub use executor::{ExecutorConfig, PipelineExecutor, CANCEL_GRACE};
pub use spec::StageSpec;
