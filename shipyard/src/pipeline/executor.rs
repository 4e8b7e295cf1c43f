//! Stage graph execution engine.
//!
//! Stages start as soon as every dependency has reached a terminal state,
//! up to a concurrency limit. A stage whose dependency failed or was skipped
//! is skipped without running its action. Independent branches keep going.

use super::StageGraph;
use crate::context::{PipelineContext, StageContext};
use crate::core::{RunResult, RunStatus, StageOutcome, StageOutput, StageStatus};
use crate::events::kinds;
use crate::observability::SpanTimer;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::collections::{BTreeMap, BTreeSet};
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{AbortHandle, JoinError};
use tracing::{debug, info, info_span, warn, Instrument};

/// Executor settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// Maximum number of stage actions running at once. Never below one.
    pub concurrency: usize,
    /// Limit on the whole run. Expiry cancels the run.
    pub timeout: Option<Duration>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            concurrency: std::thread::available_parallelism().map_or(1, NonZeroUsize::get),
            timeout: None,
        }
    }
}

impl ExecutorConfig {
    /// Sets the concurrency limit, clamped to at least one.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Sets the run timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// How long a cancelled run waits for aborted stages to wind down.
pub const CANCEL_GRACE: Duration = Duration::from_secs(5);

type Completion = (usize, Result<StageOutput, JoinError>);

/// Executes validated stage graphs.
#[derive(Debug, Clone, Default)]
pub struct PipelineExecutor {
    config: ExecutorConfig,
}

impl PipelineExecutor {
    /// Creates an executor with the given settings.
    #[must_use]
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config: ExecutorConfig {
                concurrency: config.concurrency.max(1),
                ..config
            },
        }
    }

    /// Returns the executor settings.
    #[must_use]
    pub const fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Runs every stage of the graph and reports per-stage outcomes.
    ///
    /// Stage failures never abort the run; they only skip the stages that
    /// depend on them. Cancellation through the context token (or the run
    /// timeout) stops scheduling, aborts running actions and marks them
    /// failed, and marks everything not yet started as skipped.
    pub async fn execute(&self, graph: &StageGraph, ctx: Arc<PipelineContext>) -> RunResult {
        let started_at = Utc::now();
        let run_timer = SpanTimer::start(graph.name());
        let mut run = RunState::new(graph, Arc::clone(&ctx));

        info!(
            run_id = %ctx.run().run_id,
            pipeline = %graph.name(),
            stages = graph.stage_count(),
            concurrency = self.config.concurrency,
            "Run started"
        );
        ctx.try_emit_event(
            kinds::RUN_STARTED,
            Some(serde_json::json!({
                "run_id": ctx.run().run_id.to_string(),
                "pipeline": graph.name(),
                "stages": graph.execution_order(),
            })),
        );

        let token = Arc::clone(ctx.cancel_token());
        let deadline = self
            .config
            .timeout
            .map(|limit| (tokio::time::Instant::now() + limit, limit));
        let mut active: FuturesUnordered<BoxFuture<'static, Completion>> = FuturesUnordered::new();

        loop {
            if token.is_cancelled() {
                run.cancel(&token.reason().unwrap_or_else(|| "cancelled".to_string()));
                break;
            }

            while run.running.len() < self.config.concurrency {
                let Some(next) = run.ready.pop_first() else {
                    break;
                };
                active.push(run.spawn(next));
            }

            if active.is_empty() {
                break;
            }

            tokio::select! {
                biased;
                () = token.cancelled() => {}
                () = wait_for(deadline) => {
                    if let Some((_, limit)) = deadline {
                        token.cancel(format!("run timed out after {}s", limit.as_secs_f64()));
                    }
                }
                Some((index, joined)) = active.next() => run.complete(index, joined),
            }
        }

        run.skip_unreached();

        let cancelled = token.is_cancelled();
        if cancelled {
            drain(active, &ctx).await;
        }
        let status = RunStatus::from_stages(run.outcomes.iter().map(|o| &o.status), cancelled);
        let duration_ms = run_timer.finish();

        info!(
            run_id = %ctx.run().run_id,
            pipeline = %graph.name(),
            status = %status,
            duration_ms,
            "Run completed"
        );
        ctx.try_emit_event(
            kinds::RUN_COMPLETED,
            Some(serde_json::json!({
                "run_id": ctx.run().run_id.to_string(),
                "status": status,
                "duration_ms": duration_ms,
            })),
        );

        RunResult {
            run_id: ctx.run().run_id.to_string(),
            pipeline: graph.name().to_string(),
            status,
            stages: run.outcomes,
            error: if cancelled { token.reason() } else { None },
            started_at,
            duration_ms,
        }
    }
}

/// Waits for aborted stage tasks and any blocking work they left behind.
async fn drain(mut active: FuturesUnordered<BoxFuture<'static, Completion>>, ctx: &PipelineContext) {
    let settle = async {
        while active.next().await.is_some() {}
        ctx.blocking_settled().await;
    };
    if tokio::time::timeout(CANCEL_GRACE, settle).await.is_err() {
        warn!(
            grace_secs = CANCEL_GRACE.as_secs(),
            "Cancelled stages still running after grace period"
        );
    }
}

async fn wait_for(deadline: Option<(tokio::time::Instant, Duration)>) {
    match deadline {
        Some((at, _)) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

/// Mutable bookkeeping for one run.
struct RunState<'g> {
    graph: &'g StageGraph,
    ctx: Arc<PipelineContext>,
    outcomes: Vec<StageOutcome>,
    /// Dependencies not yet terminal, per stage.
    waiting_on: Vec<usize>,
    /// First dependency that failed or was skipped, per stage.
    blocked_by: Vec<Option<usize>>,
    /// Stages whose dependencies are all terminal, by topological index.
    ready: BTreeSet<usize>,
    running: BTreeMap<usize, (AbortHandle, SpanTimer)>,
}

impl<'g> RunState<'g> {
    fn new(graph: &'g StageGraph, ctx: Arc<PipelineContext>) -> Self {
        let n = graph.stage_count();
        let waiting_on: Vec<usize> = (0..n).map(|i| graph.dependency_count(i)).collect();
        let ready = (0..n).filter(|&i| waiting_on[i] == 0).collect();
        Self {
            graph,
            ctx,
            outcomes: (0..n)
                .map(|i| StageOutcome::pending(&graph.spec_at(i).id))
                .collect(),
            waiting_on,
            blocked_by: vec![None; n],
            ready,
            running: BTreeMap::new(),
        }
    }

    fn spawn(&mut self, index: usize) -> BoxFuture<'static, Completion> {
        let spec = self.graph.spec_at(index).clone();
        let stage_ctx = StageContext::new(Arc::clone(&self.ctx), spec.id.clone());

        self.outcomes[index].status = StageStatus::Running;
        debug!(stage = %spec.id, "Stage started");
        self.ctx.try_emit_event(
            kinds::STAGE_STARTED,
            Some(serde_json::json!({ "stage": &spec.id })),
        );

        let span = info_span!("stage", id = %spec.id);
        let handle = tokio::spawn(
            async move {
                let action = spec.runner.execute(&stage_ctx);
                match spec.timeout {
                    Some(limit) => tokio::time::timeout(limit, action).await.unwrap_or_else(|_| {
                        StageOutput::fail(format!("timed out after {}s", limit.as_secs_f64()))
                    }),
                    None => action.await,
                }
            }
            .instrument(span),
        );

        self.running.insert(
            index,
            (handle.abort_handle(), SpanTimer::start(self.graph.spec_at(index).id.clone())),
        );
        async move { (index, handle.await) }.boxed()
    }

    fn complete(&mut self, index: usize, joined: Result<StageOutput, JoinError>) {
        let duration_ms = self.running.remove(&index).map(|(_, timer)| timer.finish());
        let id = self.graph.spec_at(index).id.clone();

        let output = match joined {
            Ok(output) if output.is_success() => output,
            Ok(output) => {
                let error = output
                    .error
                    .unwrap_or_else(|| format!("stage ended with status {}", output.status));
                StageOutput::fail(error).with_output(output.output.unwrap_or_default())
            }
            Err(err) if err.is_panic() => StageOutput::fail(format!(
                "stage action panicked: {}",
                panic_message(err.into_panic())
            )),
            Err(err) => StageOutput::fail(format!("stage action aborted: {err}")),
        };

        let outcome = &mut self.outcomes[index];
        outcome.status = output.status;
        outcome.error = output.error;
        outcome.output = output.output;
        outcome.duration_ms = duration_ms;

        if outcome.status.is_success() {
            info!(stage = %id, duration_ms = ?duration_ms, "Stage succeeded");
            self.ctx.try_emit_event(
                kinds::STAGE_SUCCEEDED,
                Some(serde_json::json!({ "stage": &id, "duration_ms": duration_ms })),
            );
        } else {
            warn!(stage = %id, error = ?outcome.error, "Stage failed");
            self.ctx.try_emit_event(
                kinds::STAGE_FAILED,
                Some(serde_json::json!({
                    "stage": &id,
                    "error": &outcome.error,
                    "duration_ms": duration_ms,
                })),
            );
        }

        self.settle(index);
    }

    /// Releases the dependents of a terminal stage, skipping the blocked ones.
    fn settle(&mut self, index: usize) {
        let graph = self.graph;
        let mut terminal = vec![index];
        while let Some(done) = terminal.pop() {
            let blocks = self.outcomes[done].status.blocks_dependents();
            for &child in graph.dependents_at(done) {
                self.waiting_on[child] -= 1;
                if blocks && self.blocked_by[child].is_none() {
                    self.blocked_by[child] = Some(done);
                }
                if self.waiting_on[child] > 0 {
                    continue;
                }
                match self.blocked_by[child] {
                    Some(dep) => {
                        let dep_outcome = &self.outcomes[dep];
                        let reason = match dep_outcome.status {
                            StageStatus::Skipped => format!("dependency '{}' was skipped", dep_outcome.id),
                            _ => format!("dependency '{}' failed", dep_outcome.id),
                        };
                        self.skip(child, reason);
                        terminal.push(child);
                    }
                    None => {
                        self.ready.insert(child);
                    }
                }
            }
        }
    }

    fn skip(&mut self, index: usize, reason: String) {
        let outcome = &mut self.outcomes[index];
        info!(stage = %outcome.id, reason = %reason, "Stage skipped");
        self.ctx.try_emit_event(
            kinds::STAGE_SKIPPED,
            Some(serde_json::json!({ "stage": &outcome.id, "reason": &reason })),
        );
        outcome.status = StageStatus::Skipped;
        outcome.error = Some(reason);
    }

    /// Aborts running actions and skips everything not yet started.
    fn cancel(&mut self, reason: &str) {
        warn!(reason = %reason, running = self.running.len(), "Run cancelled");
        self.ctx.try_emit_event(
            kinds::RUN_CANCELLED,
            Some(serde_json::json!({ "reason": reason })),
        );

        for (index, (handle, timer)) in std::mem::take(&mut self.running) {
            handle.abort();
            let outcome = &mut self.outcomes[index];
            outcome.status = StageStatus::Failed;
            outcome.error = Some(format!("cancelled: {reason}"));
            outcome.duration_ms = Some(timer.finish());
            self.ctx.try_emit_event(
                kinds::STAGE_FAILED,
                Some(serde_json::json!({ "stage": &outcome.id, "error": &outcome.error })),
            );
        }

        self.ready.clear();
        for index in 0..self.outcomes.len() {
            if self.outcomes[index].status == StageStatus::Pending {
                self.skip(index, format!("run cancelled: {reason}"));
            }
        }
    }

    /// Marks stages that never became ready as skipped.
    ///
    /// Unreachable for a validated graph; kept so every outcome is terminal.
    fn skip_unreached(&mut self) {
        for index in 0..self.outcomes.len() {
            if !self.outcomes[index].status.is_terminal() {
                warn!(stage = %self.outcomes[index].id, "Stage never became ready");
                self.skip(index, "stage never became ready".to_string());
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}
