//! Context management for pipeline execution.
//!
//! This module provides:
//! - The run identity
//! - The per-run context shared by every stage
//! - The per-stage context passed to stage actions

mod execution;
mod identity;

pub(crate) use execution::is_symlink;
pub use execution::{PipelineContext, StageContext};
pub use identity::RunIdentity;
