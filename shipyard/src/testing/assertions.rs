//! Test assertions for stage outputs and run results.

use crate::core::{RunResult, RunStatus, StageOutput, StageStatus};

/// Asserts that the output indicates success.
pub fn assert_output_succeeded(output: &StageOutput) {
    assert!(
        output.is_success(),
        "Expected success, got status: {:?} ({:?})",
        output.status,
        output.error
    );
}

/// Asserts that the output indicates failure.
pub fn assert_output_failed(output: &StageOutput) {
    assert!(
        output.is_failure(),
        "Expected failure, got status: {:?}",
        output.status
    );
}

/// Asserts that a stage ended with the expected status.
pub fn assert_stage_status(result: &RunResult, stage: &str, expected: StageStatus) {
    let actual = result.status_of(stage);
    assert_eq!(
        actual,
        Some(expected),
        "Expected stage '{stage}' to be {expected}, got {actual:?}"
    );
}

/// Asserts the final run status.
pub fn assert_run_status(result: &RunResult, expected: RunStatus) {
    assert_eq!(
        result.status, expected,
        "Expected run status {expected}, got {} with stages {:?}",
        result.status,
        result.status_sequence()
    );
}

/// Asserts that every listed stage was skipped.
pub fn assert_all_skipped(result: &RunResult, stages: &[&str]) {
    for stage in stages {
        assert_stage_status(result, stage, StageStatus::Skipped);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StageOutcome;
    use chrono::Utc;

    fn result(stages: Vec<(&str, StageStatus)>) -> RunResult {
        let stages: Vec<StageOutcome> = stages
            .into_iter()
            .map(|(id, status)| StageOutcome {
                status,
                ..StageOutcome::pending(id)
            })
            .collect();
        RunResult {
            run_id: "run".to_string(),
            pipeline: "release".to_string(),
            status: RunStatus::from_stages(stages.iter().map(|s| &s.status), false),
            stages,
            error: None,
            started_at: Utc::now(),
            duration_ms: 0.0,
        }
    }

    #[test]
    fn test_output_assertions() {
        assert_output_succeeded(&StageOutput::ok());
        assert_output_failed(&StageOutput::fail("error"));
    }

    #[test]
    fn test_run_assertions() {
        let result = result(vec![
            ("export", StageStatus::Failed),
            ("install", StageStatus::Skipped),
            ("lint", StageStatus::Succeeded),
        ]);
        assert_run_status(&result, RunStatus::PartialFailure);
        assert_stage_status(&result, "export", StageStatus::Failed);
        assert_all_skipped(&result, &["install"]);
    }

    #[test]
    #[should_panic(expected = "Expected stage 'lint'")]
    fn test_stage_status_mismatch_panics() {
        let result = result(vec![("lint", StageStatus::Succeeded)]);
        assert_stage_status(&result, "lint", StageStatus::Failed);
    }
}
