//! Stub stages for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::context::StageContext;
use crate::core::StageOutput;
use crate::stages::Stage;

/// A stage that always succeeds with optional output text.
#[derive(Debug)]
pub struct SuccessStage {
    name: String,
    output: Option<String>,
}

impl SuccessStage {
    /// Creates a new success stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output: None,
        }
    }

    /// Creates a success stage that reports output text.
    #[must_use]
    pub fn with_output(name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            output: Some(output.into()),
        }
    }
}

#[async_trait]
impl Stage for SuccessStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &StageContext) -> StageOutput {
        self.output
            .as_ref()
            .map_or_else(StageOutput::ok, |text| StageOutput::ok_with_output(text.as_str()))
    }
}

/// A stage that always fails.
#[derive(Debug)]
pub struct FailingStage {
    name: String,
    error: String,
}

impl FailingStage {
    /// Creates a new failing stage.
    #[must_use]
    pub fn new(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: error.into(),
        }
    }
}

#[async_trait]
impl Stage for FailingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &StageContext) -> StageOutput {
        StageOutput::fail(&self.error)
    }
}

/// A stage whose action panics.
#[derive(Debug)]
pub struct PanickingStage {
    name: String,
}

impl PanickingStage {
    /// Creates a new panicking stage.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Stage for PanickingStage {
    fn name(&self) -> &str {
        &self.name
    }

    #[allow(clippy::panic)]
    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        panic!("stage '{}' blew up", ctx.stage_id());
    }
}

/// Tracks how many probed stages run at the same time, and when the last
/// one finished.
#[derive(Debug, Default)]
pub struct ConcurrencyProbe {
    current: AtomicUsize,
    peak: AtomicUsize,
    last_exit: Mutex<Option<Instant>>,
}

impl ConcurrencyProbe {
    /// Creates a new probe.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns the highest number of stages seen running at once.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Returns when a probed stage last finished.
    #[must_use]
    pub fn last_exit(&self) -> Option<Instant> {
        *self.last_exit.lock()
    }

    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        *self.last_exit.lock() = Some(Instant::now());
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A stage that takes time to execute.
#[derive(Debug)]
pub struct SlowStage {
    name: String,
    delay: Duration,
    probe: Option<Arc<ConcurrencyProbe>>,
}

impl SlowStage {
    /// Creates a new slow stage.
    #[must_use]
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
            probe: None,
        }
    }

    /// Creates a slow stage with delay in milliseconds.
    #[must_use]
    pub fn with_delay_ms(name: impl Into<String>, ms: u64) -> Self {
        Self::new(name, Duration::from_millis(ms))
    }

    /// Reports entry and exit to a concurrency probe.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<ConcurrencyProbe>) -> Self {
        self.probe = Some(probe);
        self
    }
}

#[async_trait]
impl Stage for SlowStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &StageContext) -> StageOutput {
        if let Some(probe) = &self.probe {
            probe.enter();
        }
        tokio::time::sleep(self.delay).await;
        if let Some(probe) = &self.probe {
            probe.exit();
        }
        StageOutput::ok()
    }
}

/// A recorded invocation.
#[derive(Debug, Clone)]
pub struct RecordedExecution {
    /// Stage id from the context.
    pub stage_id: String,
    /// Workspace the stage saw.
    pub workspace: std::path::PathBuf,
    /// When the action started.
    pub started: Instant,
}

/// A stage that records each invocation and then succeeds or fails.
#[derive(Debug)]
pub struct RecordingStage {
    name: String,
    fail_with: Option<String>,
    executions: Mutex<Vec<RecordedExecution>>,
}

impl RecordingStage {
    /// Creates a recording stage that succeeds.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            fail_with: None,
            executions: Mutex::new(Vec::new()),
        })
    }

    /// Creates a recording stage that fails with the given error.
    #[must_use]
    pub fn failing(name: impl Into<String>, error: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            fail_with: Some(error.into()),
            executions: Mutex::new(Vec::new()),
        })
    }

    /// Returns all recorded executions.
    #[must_use]
    pub fn executions(&self) -> Vec<RecordedExecution> {
        self.executions.lock().clone()
    }

    /// Returns the number of executions.
    #[must_use]
    pub fn execution_count(&self) -> usize {
        self.executions.lock().len()
    }

    /// Returns true if the action was never invoked.
    #[must_use]
    pub fn never_ran(&self) -> bool {
        self.executions.lock().is_empty()
    }

    /// Clears recorded executions.
    pub fn clear(&self) {
        self.executions.lock().clear();
    }
}

#[async_trait]
impl Stage for RecordingStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, ctx: &StageContext) -> StageOutput {
        self.executions.lock().push(RecordedExecution {
            stage_id: ctx.stage_id().to_string(),
            workspace: ctx.workspace().to_path_buf(),
            started: Instant::now(),
        });
        match &self.fail_with {
            Some(error) => StageOutput::fail(error),
            None => StageOutput::ok(),
        }
    }
}
