//! Execution context handed to stage actions.

use super::RunIdentity;
use crate::cancellation::CancellationToken;
use crate::events::{EventSink, NoOpEventSink};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, RwLock};

/// Context shared by all stages of one run.
pub struct PipelineContext {
    /// Run identity.
    run: RunIdentity,
    /// The run's workspace directory.
    workspace: PathBuf,
    /// The project directory the pipeline builds from.
    source_dir: PathBuf,
    /// Event sink for emitting events.
    event_sink: Arc<dyn EventSink>,
    /// Cancellation token for the run.
    cancel_token: Arc<CancellationToken>,
    /// Held for reading by blocking work that outlives an aborted stage.
    blocking: Arc<RwLock<()>>,
}

impl PipelineContext {
    /// Creates a new pipeline context.
    #[must_use]
    pub fn new(run: RunIdentity, workspace: impl Into<PathBuf>) -> Self {
        let workspace = workspace.into();
        Self {
            run,
            source_dir: workspace.clone(),
            workspace,
            event_sink: Arc::new(NoOpEventSink),
            cancel_token: Arc::new(CancellationToken::new()),
            blocking: Arc::new(RwLock::new(())),
        }
    }

    /// Sets the source directory.
    #[must_use]
    pub fn with_source_dir(mut self, source_dir: impl Into<PathBuf>) -> Self {
        self.source_dir = source_dir.into();
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Sets the cancellation token.
    #[must_use]
    pub fn with_cancel_token(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel_token = token;
        self
    }

    /// Returns the run identity.
    #[must_use]
    pub const fn run(&self) -> &RunIdentity {
        &self.run
    }

    /// Returns the workspace directory.
    #[must_use]
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Returns the source directory.
    #[must_use]
    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    /// Returns the event sink.
    #[must_use]
    pub fn event_sink(&self) -> &Arc<dyn EventSink> {
        &self.event_sink
    }

    /// Returns the cancellation token.
    #[must_use]
    pub const fn cancel_token(&self) -> &Arc<CancellationToken> {
        &self.cancel_token
    }

    /// Waits until no blocking work started by a stage is still running.
    pub async fn blocking_settled(&self) {
        drop(self.blocking.write().await);
    }

    /// Tries to emit an event.
    pub fn try_emit_event(&self, event_type: &str, data: Option<serde_json::Value>) {
        self.event_sink.try_emit(event_type, data);
    }
}

impl std::fmt::Debug for PipelineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineContext")
            .field("run", &self.run)
            .field("workspace", &self.workspace)
            .field("source_dir", &self.source_dir)
            .finish_non_exhaustive()
    }
}

/// Context for a single stage invocation.
#[derive(Debug, Clone)]
pub struct StageContext {
    pipeline: Arc<PipelineContext>,
    stage_id: String,
}

impl StageContext {
    /// Creates a stage context.
    #[must_use]
    pub fn new(pipeline: Arc<PipelineContext>, stage_id: impl Into<String>) -> Self {
        Self {
            pipeline,
            stage_id: stage_id.into(),
        }
    }

    /// Returns the stage id.
    #[must_use]
    pub fn stage_id(&self) -> &str {
        &self.stage_id
    }

    /// Returns the run identity.
    #[must_use]
    pub fn run(&self) -> &RunIdentity {
        self.pipeline.run()
    }

    /// Returns the workspace directory.
    #[must_use]
    pub fn workspace(&self) -> &Path {
        self.pipeline.workspace()
    }

    /// Returns the source directory.
    #[must_use]
    pub fn source_dir(&self) -> &Path {
        self.pipeline.source_dir()
    }

    /// Returns true once the run has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.pipeline.cancel_token().is_cancelled()
    }

    /// Registers blocking work for this stage.
    ///
    /// Move the guard into the `spawn_blocking` closure. The run does not
    /// finish until every guard is dropped, even when the stage itself was
    /// aborted.
    pub async fn blocking_guard(&self) -> OwnedRwLockReadGuard<()> {
        Arc::clone(&self.pipeline.blocking).read_owned().await
    }

    /// Resolves a relative path inside the workspace.
    ///
    /// # Errors
    ///
    /// Returns an error message for absolute paths, paths that climb out of
    /// the workspace with `..` and paths whose directories go through a
    /// symlink.
    pub fn workspace_path(&self, relative: &str) -> Result<PathBuf, String> {
        join_contained(self.workspace(), relative)
    }

    /// Resolves a relative path inside the source directory.
    ///
    /// # Errors
    ///
    /// Same rules as [`StageContext::workspace_path`].
    pub fn source_path(&self, relative: &str) -> Result<PathBuf, String> {
        join_contained(self.source_dir(), relative)
    }
}

/// Joins `relative` onto `base`, refusing anything that escapes `base`.
///
/// Every directory between `base` and the last component must be a real
/// directory, not a symlink. The last component itself may be a link.
pub(crate) fn join_contained(base: &Path, relative: &str) -> Result<PathBuf, String> {
    let mut joined = base.to_path_buf();
    let mut below_base = false;
    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => {
                if below_base && is_symlink(&joined) {
                    return Err(format!(
                        "path '{relative}' goes through symlink {}",
                        joined.display()
                    ));
                }
                joined.push(part);
                below_base = true;
            }
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(format!(
                    "path '{relative}' must stay inside {}",
                    base.display()
                ));
            }
        }
    }
    Ok(joined)
}

/// True if `path` exists and is a symlink. Links are not followed.
pub(crate) fn is_symlink(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok_and(|meta| meta.file_type().is_symlink())
}
