//! Test fixtures for pipeline testing.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cancellation::CancellationToken;
use crate::context::{PipelineContext, RunIdentity};
use crate::core::RunResult;
use crate::events::CollectingEventSink;
use crate::pipeline::{ExecutorConfig, PipelineExecutor, StageGraph};

/// Runs graphs against a fixed workspace with a collecting event sink.
#[derive(Debug)]
pub struct TestPipeline {
    workspace: PathBuf,
    events: Arc<CollectingEventSink>,
    cancel_token: Arc<CancellationToken>,
    executor: PipelineExecutor,
}

impl TestPipeline {
    /// Creates a fixture rooted at `workspace`.
    #[must_use]
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            events: Arc::new(CollectingEventSink::new()),
            cancel_token: Arc::new(CancellationToken::new()),
            executor: PipelineExecutor::default(),
        }
    }

    /// Sets the executor settings.
    #[must_use]
    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.executor = PipelineExecutor::new(config);
        self
    }

    /// Returns the workspace directory.
    #[must_use]
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    /// Returns the collected events.
    #[must_use]
    pub fn events(&self) -> &CollectingEventSink {
        &self.events
    }

    /// Returns the cancellation token shared by every run.
    #[must_use]
    pub fn cancel_token(&self) -> &Arc<CancellationToken> {
        &self.cancel_token
    }

    /// Builds a fresh pipeline context.
    #[must_use]
    pub fn context(&self, pipeline: &str) -> Arc<PipelineContext> {
        Arc::new(
            PipelineContext::new(RunIdentity::new(pipeline), &self.workspace)
                .with_event_sink(self.events.clone())
                .with_cancel_token(Arc::clone(&self.cancel_token)),
        )
    }

    /// Executes a graph to completion.
    pub async fn run(&self, graph: &StageGraph) -> RunResult {
        self.executor.execute(graph, self.context(graph.name())).await
    }
}
