//! Workspace retention rules.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// When a finished run's workspace is kept on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetentionPolicy {
    /// Keep the workspace unless every stage succeeded.
    #[default]
    OnFailure,
    /// Always keep the workspace.
    Always,
    /// Always remove the workspace.
    Never,
}

impl RetentionPolicy {
    /// Returns true if a run with the given outcome keeps its workspace.
    #[must_use]
    pub const fn retains(self, succeeded: bool) -> bool {
        match self {
            Self::OnFailure => !succeeded,
            Self::Always => true,
            Self::Never => false,
        }
    }
}

impl fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OnFailure => write!(f, "on-failure"),
            Self::Always => write!(f, "always"),
            Self::Never => write!(f, "never"),
        }
    }
}

/// What happened to a workspace when its run finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "disposition", content = "path")]
pub enum WorkspaceDisposition {
    /// The directory was deleted.
    Removed,
    /// The directory was kept at this path.
    Retained(PathBuf),
}

impl WorkspaceDisposition {
    /// Returns the retained path, if the workspace was kept.
    #[must_use]
    pub fn retained_path(&self) -> Option<&PathBuf> {
        match self {
            Self::Removed => None,
            Self::Retained(path) => Some(path),
        }
    }
}
