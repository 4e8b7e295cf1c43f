//! Stage and run status enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The execution status of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Stage has not started yet.
    #[default]
    Pending,
    /// Stage action is running.
    Running,
    /// Stage action completed successfully.
    Succeeded,
    /// Stage action failed, panicked, timed out or was cancelled mid-run.
    Failed,
    /// Stage never ran because a dependency did not succeed or the run was cancelled.
    Skipped,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Succeeded => write!(f, "succeeded"),
            Self::Failed => write!(f, "failed"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

impl StageStatus {
    /// Returns true if the status represents a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }

    /// Returns true if the status indicates success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Returns true if dependents of a stage in this state must be skipped.
    #[must_use]
    pub const fn blocks_dependents(&self) -> bool {
        matches!(self, Self::Failed | Self::Skipped)
    }
}

/// The final status of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every stage succeeded.
    Success,
    /// Some stages succeeded, others failed or were skipped.
    PartialFailure,
    /// No stage succeeded, or the run was cancelled.
    Failure,
}

impl RunStatus {
    /// Derives the run status from final stage statuses.
    #[must_use]
    pub fn from_stages<'a>(
        statuses: impl IntoIterator<Item = &'a StageStatus>,
        cancelled: bool,
    ) -> Self {
        if cancelled {
            return Self::Failure;
        }
        let (mut succeeded, mut other) = (0usize, 0usize);
        for status in statuses {
            if status.is_success() {
                succeeded += 1;
            } else {
                other += 1;
            }
        }
        match (succeeded, other) {
            (_, 0) => Self::Success,
            (0, _) => Self::Failure,
            _ => Self::PartialFailure,
        }
    }

    /// Returns true for a fully successful run.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::PartialFailure => write!(f, "partial failure"),
            Self::Failure => write!(f, "failure"),
        }
    }
}
