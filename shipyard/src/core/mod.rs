//! Core domain model types for shipyard.
//!
//! This module contains the fundamental types used throughout the crate:
//! - Stage and run status enums
//! - Stage output returned by actions
//! - Per-stage outcomes and the run result

mod output;
mod result;
mod status;

pub use output::StageOutput;
pub use result::{RunResult, StageOutcome};
pub use status::{RunStatus, StageStatus};
