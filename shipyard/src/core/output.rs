//! Stage output type returned by stage actions.

use super::StageStatus;
use serde::{Deserialize, Serialize};

/// The output of a stage action.
///
/// An action either succeeds or fails; both may carry captured output text
/// (for example the tail of a command's stdout/stderr).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutput {
    /// Either `Succeeded` or `Failed`.
    pub status: StageStatus,

    /// Captured output text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,

    /// Error message (for failed executions).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Default for StageOutput {
    fn default() -> Self {
        Self::ok()
    }
}

impl StageOutput {
    /// Creates a successful output with no text.
    #[must_use]
    pub const fn ok() -> Self {
        Self {
            status: StageStatus::Succeeded,
            output: None,
            error: None,
        }
    }

    /// Creates a successful output with captured text.
    #[must_use]
    pub fn ok_with_output(output: impl Into<String>) -> Self {
        Self {
            output: Some(output.into()),
            ..Self::ok()
        }
    }

    /// Creates a failure output with an error message.
    #[must_use]
    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Failed,
            output: None,
            error: Some(error.into()),
        }
    }

    /// Attaches captured text to the output.
    #[must_use]
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        let output = output.into();
        self.output = if output.is_empty() { None } else { Some(output) };
        self
    }

    /// Returns true if the action succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Returns true if the action failed.
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self.status, StageStatus::Failed)
    }
}

impl From<Result<(), String>> for StageOutput {
    fn from(result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(e) => Self::fail(e),
        }
    }
}
