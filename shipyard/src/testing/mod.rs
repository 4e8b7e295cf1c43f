//! Testing utilities for shipyard pipelines.
//!
//! This module provides:
//! - Stub stages that succeed, fail, panic, sleep or record invocations
//! - Assertions over stage outputs and run results
//! - A fixture that runs graphs against a fixed workspace

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{
    assert_all_skipped, assert_output_failed, assert_output_succeeded, assert_run_status,
    assert_stage_status,
};
pub use fixtures::TestPipeline;
pub use mocks::{
    ConcurrencyProbe, FailingStage, PanickingStage, RecordedExecution, RecordingStage, SlowStage,
    SuccessStage,
};
