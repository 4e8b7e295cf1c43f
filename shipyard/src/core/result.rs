//! Run results produced by the executor.

use super::{RunStatus, StageStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Final outcome of one stage in a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageOutcome {
    /// The stage id.
    pub id: String,
    /// Final status.
    pub status: StageStatus,
    /// Failure detail or skip reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Captured output text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Time spent running the action, if it ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
}

impl StageOutcome {
    /// Creates a pending outcome for a stage.
    #[must_use]
    pub fn pending(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: StageStatus::Pending,
            error: None,
            output: None,
            duration_ms: None,
        }
    }
}

/// Result of executing a stage graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    /// The run id.
    pub run_id: String,
    /// The pipeline name.
    pub pipeline: String,
    /// Final status of the run.
    pub status: RunStatus,
    /// Per-stage outcomes in topological order.
    pub stages: Vec<StageOutcome>,
    /// Run-level error detail (cancellation reason).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Total execution time in milliseconds.
    pub duration_ms: f64,
}

impl RunResult {
    /// Returns the outcome of a stage by id.
    #[must_use]
    pub fn stage(&self, id: &str) -> Option<&StageOutcome> {
        self.stages.iter().find(|s| s.id == id)
    }

    /// Returns the status of a stage by id.
    #[must_use]
    pub fn status_of(&self, id: &str) -> Option<StageStatus> {
        self.stage(id).map(|s| s.status)
    }

    /// Returns the per-stage status sequence in topological order.
    #[must_use]
    pub fn status_sequence(&self) -> Vec<(String, StageStatus)> {
        self.stages.iter().map(|s| (s.id.clone(), s.status)).collect()
    }

    /// Returns the stages that failed.
    pub fn failures(&self) -> impl Iterator<Item = &StageOutcome> {
        self.stages
            .iter()
            .filter(|s| s.status == StageStatus::Failed)
    }

    /// Returns true if every stage succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Counts stages per terminal status: (succeeded, failed, skipped).
    #[must_use]
    pub fn counts(&self) -> (usize, usize, usize) {
        self.stages.iter().fold((0, 0, 0), |(ok, fail, skip), s| match s.status {
            StageStatus::Succeeded => (ok + 1, fail, skip),
            StageStatus::Failed => (ok, fail + 1, skip),
            StageStatus::Skipped => (ok, fail, skip + 1),
            StageStatus::Pending | StageStatus::Running => (ok, fail, skip),
        })
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.stages.iter().map(|s| s.id.len()).max().unwrap_or(0);
        writeln!(f, "Pipeline '{}' ({}): {}", self.pipeline, self.run_id, self.status)?;
        for stage in &self.stages {
            write!(f, "  {:<width$}  {:<9}", stage.id, stage.status.to_string())?;
            if let Some(ms) = stage.duration_ms {
                write!(f, "  {ms:.0}ms")?;
            }
            writeln!(f)?;
            if let Some(error) = &stage.error {
                for line in error.lines() {
                    writeln!(f, "  {:<width$}    {line}", "")?;
                }
            }
        }
        let (ok, failed, skipped) = self.counts();
        write!(
            f,
            "{ok} succeeded, {failed} failed, {skipped} skipped in {:.0}ms",
            self.duration_ms
        )?;
        if let Some(error) = &self.error {
            write!(f, " ({error})")?;
        }
        Ok(())
    }
}
