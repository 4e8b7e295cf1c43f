//! Run identity for tracking pipeline executions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIdentity {
    /// The unique, time-ordered id of this run.
    pub run_id: Uuid,
    /// The pipeline name.
    pub pipeline: String,
    /// When the run was created.
    pub started_at: DateTime<Utc>,
}

impl RunIdentity {
    /// Creates a new run identity with a generated run id.
    #[must_use]
    pub fn new(pipeline: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            pipeline: pipeline.into(),
            started_at: Utc::now(),
        }
    }

    /// Returns the short form of the run id used in directory names and logs.
    #[must_use]
    pub fn short_id(&self) -> String {
        self.run_id.simple().to_string()[..12].to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_ids_are_unique_and_ordered() {
        let a = RunIdentity::new("release");
        let b = RunIdentity::new("release");
        assert_ne!(a.run_id, b.run_id);
        assert!(a.run_id <= b.run_id);
        assert_eq!(a.run_id.get_version_num(), 7);
    }

    #[test]
    fn test_short_id() {
        let id = RunIdentity::new("release");
        assert_eq!(id.short_id().len(), 12);
    }
}
