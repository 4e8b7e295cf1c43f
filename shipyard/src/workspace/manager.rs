//! Workspace creation and cleanup.

use super::{RetentionPolicy, WorkspaceDisposition};
use crate::context::RunIdentity;
use crate::errors::ResourceError;
use crate::events::{kinds, EventSink, NoOpEventSink};
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How many names are tried before workspace creation gives up.
pub const MAX_CREATE_ATTEMPTS: usize = 5;

const SUFFIX_LEN: usize = 8;

/// Creates per-run workspaces under a root directory.
#[derive(Clone)]
pub struct WorkspaceManager {
    root: PathBuf,
    retention: RetentionPolicy,
    event_sink: Arc<dyn EventSink>,
}

impl WorkspaceManager {
    /// Creates a manager rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, retention: RetentionPolicy) -> Self {
        Self {
            root: root.into(),
            retention,
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Returns the workspace root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the retention policy.
    #[must_use]
    pub const fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    /// Creates a fresh, empty workspace for a run.
    ///
    /// The leaf directory is created with `create_dir`, so a name collision
    /// is detected and retried with a new random suffix.
    pub async fn create(&self, run: &RunIdentity) -> Result<Workspace, ResourceError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|source| ResourceError::WorkspaceCreate {
                path: self.root.clone(),
                source,
            })?;

        let mut attempt = 1;
        loop {
            let path = self.root.join(workspace_name(Utc::now()));
            match tokio::fs::create_dir(&path).await {
                Ok(()) => {
                    info!(run_id = %run.run_id, path = %path.display(), "Workspace created");
                    self.event_sink.try_emit(
                        kinds::WORKSPACE_CREATED,
                        Some(serde_json::json!({
                            "run_id": run.run_id.to_string(),
                            "path": path.display().to_string(),
                        })),
                    );
                    return Ok(Workspace {
                        path,
                        retention: self.retention,
                        event_sink: Arc::clone(&self.event_sink),
                        finalized: false,
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists && attempt < MAX_CREATE_ATTEMPTS => {
                    debug!(path = %path.display(), attempt, "Workspace name taken, retrying");
                    attempt += 1;
                }
                Err(source) => return Err(ResourceError::WorkspaceCreate { path, source }),
            }
        }
    }
}

impl std::fmt::Debug for WorkspaceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkspaceManager")
            .field("root", &self.root)
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

/// `run-<UTC timestamp>-<random suffix>`.
fn workspace_name(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SUFFIX_LEN)
        .map(|b| char::from(b).to_ascii_lowercase())
        .collect();
    format!("run-{}-{suffix}", now.format("%Y%m%dT%H%M%S%.3f"))
}

/// A run's workspace directory.
///
/// Dropping a workspace that was never finished removes the directory, so
/// early returns and panics do not leak build directories.
pub struct Workspace {
    path: PathBuf,
    retention: RetentionPolicy,
    event_sink: Arc<dyn EventSink>,
    finalized: bool,
}

impl Workspace {
    /// Returns the workspace directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Applies the retention policy for a finished run.
    pub async fn finish(mut self, succeeded: bool) -> Result<WorkspaceDisposition, ResourceError> {
        self.finalized = true;
        if self.retention.retains(succeeded) {
            Ok(self.mark_retained())
        } else {
            self.remove().await
        }
    }

    /// Keeps the workspace regardless of the retention policy.
    #[must_use]
    pub fn retain(mut self) -> WorkspaceDisposition {
        self.finalized = true;
        self.mark_retained()
    }

    fn mark_retained(&self) -> WorkspaceDisposition {
        info!(path = %self.path.display(), "Workspace retained");
        self.event_sink.try_emit(
            kinds::WORKSPACE_RETAINED,
            Some(serde_json::json!({ "path": self.path.display().to_string() })),
        );
        WorkspaceDisposition::Retained(self.path.clone())
    }

    async fn remove(&self) -> Result<WorkspaceDisposition, ResourceError> {
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(ResourceError::WorkspaceCleanup {
                    path: self.path.clone(),
                    source,
                })
            }
        }
        debug!(path = %self.path.display(), "Workspace removed");
        self.event_sink.try_emit(
            kinds::WORKSPACE_REMOVED,
            Some(serde_json::json!({ "path": self.path.display().to_string() })),
        );
        Ok(WorkspaceDisposition::Removed)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.finalized {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "Unfinished workspace removed"),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "Failed to remove unfinished workspace");
            }
        }
    }
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("path", &self.path)
            .field("retention", &self.retention)
            .field("finalized", &self.finalized)
            .finish_non_exhaustive()
    }
}
