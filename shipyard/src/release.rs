//! Release orchestration.
//!
//! A release resolves the deploy target, builds the stage graph, runs it in
//! a fresh workspace and ships the artifact when every stage succeeded.
//! Configuration problems surface before the workspace exists.

use crate::cancellation::CancellationToken;
use crate::config::ShipyardConfig;
use crate::context::{PipelineContext, RunIdentity};
use crate::core::RunResult;
use crate::deploy::{DeployTarget, DeployTargetRegistry};
use crate::errors::{ExecutionError, ShipyardError};
use crate::events::{EventSink, NoOpEventSink};
use crate::pipeline::{ExecutorConfig, PipelineExecutor};
use crate::ship::{ArtifactShipper, LocalTransport, ShipmentReceipt, SshTransport, Transport};
use crate::workspace::{RetentionPolicy, Workspace, WorkspaceDisposition, WorkspaceManager};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Picks the transport for a target: local filesystem for this machine,
/// `ssh` otherwise.
#[must_use]
pub fn transport_for(target: &DeployTarget) -> Arc<dyn Transport> {
    if target.is_local() {
        Arc::new(LocalTransport::new())
    } else {
        Arc::new(SshTransport::new())
    }
}

/// Everything that happened during a release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReleaseReport {
    /// The pipeline run.
    pub run: RunResult,
    /// Environment the artifact was meant for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// The verified shipment, if the artifact was shipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shipment: Option<ShipmentReceipt>,
    /// Why shipping failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_error: Option<String>,
    /// What happened to the workspace.
    pub workspace: WorkspaceDisposition,
    /// Why the workspace could not be removed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleanup_error: Option<String>,
}

impl ReleaseReport {
    /// `0` when every stage succeeded, nothing failed to ship and the
    /// workspace was cleaned up as planned, `1` otherwise.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        if self.run.is_success() && self.transfer_error.is_none() && self.cleanup_error.is_none() {
            0
        } else {
            1
        }
    }

    /// One error per failed stage.
    #[must_use]
    pub fn stage_errors(&self) -> Vec<ExecutionError> {
        self.run
            .failures()
            .map(|s| ExecutionError::new(&s.id, s.error.as_deref().unwrap_or("failed")))
            .collect()
    }
}

/// Runs one release from a loaded configuration.
pub struct Release {
    config: ShipyardConfig,
    env: Option<String>,
    ship: bool,
    retention: RetentionPolicy,
    executor: ExecutorConfig,
    transport: Option<Arc<dyn Transport>>,
    event_sink: Arc<dyn EventSink>,
    cancel_token: Arc<CancellationToken>,
}

impl Release {
    /// Creates a release using the configuration's settings.
    #[must_use]
    pub fn new(config: ShipyardConfig) -> Self {
        Self {
            retention: config.pipeline.retention,
            executor: config.executor_config(),
            config,
            env: None,
            ship: true,
            transport: None,
            event_sink: Arc::new(NoOpEventSink),
            cancel_token: Arc::new(CancellationToken::new()),
        }
    }

    /// Ships to `env` instead of the default environment.
    #[must_use]
    pub fn with_env(mut self, env: Option<String>) -> Self {
        self.env = env;
        self
    }

    /// Enables or disables shipping.
    #[must_use]
    pub const fn with_shipping(mut self, ship: bool) -> Self {
        self.ship = ship;
        self
    }

    /// Overrides the workspace retention policy.
    #[must_use]
    pub const fn with_retention(mut self, retention: RetentionPolicy) -> Self {
        self.retention = retention;
        self
    }

    /// Overrides the executor settings.
    #[must_use]
    pub fn with_executor_config(mut self, config: ExecutorConfig) -> Self {
        self.executor = config;
        self
    }

    /// Uses a fixed transport instead of picking one per target.
    #[must_use]
    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
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

    /// Returns the cancellation token.
    #[must_use]
    pub const fn cancel_token(&self) -> &Arc<CancellationToken> {
        &self.cancel_token
    }

    /// Resolves the target the release ships to, if shipping or an
    /// environment was requested.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unknown or invalid environment.
    pub fn resolve_target(&self) -> Result<Option<DeployTarget>, ShipyardError> {
        if !self.ship && self.env.is_none() {
            return Ok(None);
        }
        let registry = DeployTargetRegistry::from_config(&self.config.deploy)?;
        let target = registry.resolve_or_default(self.env.as_deref())?;
        Ok(Some(target.clone()))
    }

    /// Runs the release.
    ///
    /// # Errors
    ///
    /// Configuration and workspace creation errors are returned before any
    /// stage runs. Stage, transfer and cleanup failures are reported in the
    /// [`ReleaseReport`] instead.
    pub async fn run(&self) -> Result<ReleaseReport, ShipyardError> {
        let target = self.resolve_target()?;
        let graph = self.config.pipeline_builder().build()?;

        let run = RunIdentity::new(graph.name());
        let workspace = WorkspaceManager::new(self.config.workspace_root(), self.retention)
            .with_event_sink(Arc::clone(&self.event_sink))
            .create(&run)
            .await?;

        let ctx = PipelineContext::new(run, workspace.path())
            .with_source_dir(&self.config.source_dir)
            .with_event_sink(Arc::clone(&self.event_sink))
            .with_cancel_token(Arc::clone(&self.cancel_token));
        let result = PipelineExecutor::new(self.executor.clone())
            .execute(&graph, Arc::new(ctx))
            .await;

        let mut report = ReleaseReport {
            target: target.as_ref().map(|t| t.id.clone()),
            shipment: None,
            transfer_error: None,
            workspace: WorkspaceDisposition::Removed,
            cleanup_error: None,
            run: result,
        };

        let target = match target {
            Some(target) if self.ship && report.run.is_success() => target,
            _ => {
                let succeeded = report.run.is_success();
                finish_workspace(workspace, succeeded, &mut report).await;
                return Ok(report);
            }
        };

        let artifact = workspace.path().join(&self.config.pipeline.artifact);
        let transport = self
            .transport
            .clone()
            .unwrap_or_else(|| transport_for(&target));
        let shipped = ArtifactShipper::new(transport)
            .with_event_sink(Arc::clone(&self.event_sink))
            .ship(&artifact, &target)
            .await;

        match shipped {
            Ok(receipt) => {
                info!(target = %target.id, remote_path = %receipt.remote_path, "Release shipped");
                report.shipment = Some(receipt);
                finish_workspace(workspace, true, &mut report).await;
            }
            Err(err) => {
                warn!(target = %target.id, error = %err, "Keeping workspace after failed shipment");
                report.transfer_error = Some(err.to_string());
                report.workspace = workspace.retain();
            }
        }
        Ok(report)
    }
}

/// Applies the retention policy. A directory that cannot be removed stays
/// on disk and is recorded in the report.
async fn finish_workspace(workspace: Workspace, succeeded: bool, report: &mut ReleaseReport) {
    let path = workspace.path().to_path_buf();
    match workspace.finish(succeeded).await {
        Ok(disposition) => report.workspace = disposition,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Workspace left behind");
            report.cleanup_error = Some(err.to_string());
            report.workspace = WorkspaceDisposition::Retained(path);
        }
    }
}

impl std::fmt::Debug for Release {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Release")
            .field("pipeline", &self.config.pipeline.name)
            .field("env", &self.env)
            .field("ship", &self.ship)
            .field("retention", &self.retention)
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_str;
    use crate::core::{RunStatus, StageStatus};
    use crate::errors::{ConfigurationError, ConnectionError};
    use crate::events::{kinds, CollectingEventSink};
    use crate::ship::{MockTransport, MockTransportSession, RemoteFile, TransportSession};
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use sha2::{Digest, Sha256};
    use std::path::{Path, PathBuf};

    fn config(source: &Path, package_script: &str) -> ShipyardConfig {
        let text = format!(
            r#"
default_env = "production"

[pipeline]
name = "site"

[environments.production]
host = "domain.tld"
username = "user"
path = "/srv/http/domain.tld/releases"

[[stages]]
id = "prepare"
action = "mkdir"
path = "web/app"

[[stages]]
id = "package"
action = "shell"
script = "{package_script}"
depends_on = ["prepare"]
"#
        );
        parse_str(&text, source, &|_| None).unwrap()
    }

    fn runs_dir(source: &Path) -> Vec<PathBuf> {
        std::fs::read_dir(source.join(".shipyard/runs"))
            .map(|entries| entries.map(|e| e.unwrap().path()).collect())
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn test_successful_release_ships_and_cleans_up() {
        let source = tempfile::tempdir().unwrap();
        let remote = tempfile::tempdir().unwrap();
        let sink = Arc::new(CollectingEventSink::new());

        let release = Release::new(config(source.path(), "echo site > build.tar.gz"))
            .with_transport(Arc::new(LocalTransport::rooted(remote.path())))
            .with_event_sink(sink.clone());
        let report = release.run().await.unwrap();

        assert_eq!(report.run.status, RunStatus::Success);
        assert_eq!(report.exit_code(), 0);
        assert_eq!(report.target.as_deref(), Some("production"));
        assert_eq!(report.workspace, WorkspaceDisposition::Removed);
        let shipped = remote.path().join("srv/http/domain.tld/releases/build.tar.gz");
        assert_eq!(std::fs::read_to_string(shipped).unwrap().trim(), "site");
        assert!(runs_dir(source.path()).is_empty());

        let types = sink.event_types();
        assert_eq!(types.first().map(String::as_str), Some(kinds::WORKSPACE_CREATED));
        assert_eq!(types.last().map(String::as_str), Some(kinds::WORKSPACE_REMOVED));
        assert!(types.iter().any(|t| t == kinds::SHIP_COMPLETED));
    }

    #[tokio::test]
    async fn test_unknown_environment_fails_before_anything_runs() {
        let source = tempfile::tempdir().unwrap();
        let marker = source.path().join("ran");
        let script = format!("touch {}", marker.display());

        let err = Release::new(config(source.path(), &script))
            .with_env(Some("staging".to_string()))
            .run()
            .await
            .unwrap_err();

        assert_eq!(err.exit_code(), 2);
        match err {
            ShipyardError::Configuration(ConfigurationError::UnknownEnvironment(e)) => {
                assert_eq!(e.name, "staging");
                assert_eq!(e.known, vec!["production".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!marker.exists());
        assert!(runs_dir(source.path()).is_empty());
    }

    #[tokio::test]
    async fn test_stage_failure_keeps_workspace_and_skips_shipping() {
        let source = tempfile::tempdir().unwrap();
        let mut transport = MockTransport::new();
        transport.expect_connect().never();

        let report = Release::new(config(source.path(), "exit 3"))
            .with_transport(Arc::new(transport))
            .run()
            .await
            .unwrap();

        assert_eq!(report.run.status_of("package"), Some(StageStatus::Failed));
        assert_eq!(report.exit_code(), 1);
        assert!(report.shipment.is_none());
        let kept = report.workspace.retained_path().unwrap();
        assert!(kept.join("web/app").is_dir());

        let errors = report.stage_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].stage, "package");
    }

    #[tokio::test]
    async fn test_transfer_failure_keeps_artifact_locally() {
        let source = tempfile::tempdir().unwrap();
        let mut transport = MockTransport::new();
        transport.expect_name().return_const("mock");
        transport
            .expect_connect()
            .returning(|t| Err(ConnectionError::new(&t.host, t.port, &t.username, "No route to host").into()));

        let report = Release::new(config(source.path(), "echo site > build.tar.gz"))
            .with_transport(Arc::new(transport))
            .run()
            .await
            .unwrap();

        assert_eq!(report.run.status, RunStatus::Success);
        assert_eq!(report.exit_code(), 1);
        assert!(report.transfer_error.as_deref().unwrap().contains("No route to host"));
        let kept = report.workspace.retained_path().unwrap();
        assert!(kept.join("build.tar.gz").is_file());
    }

    #[tokio::test]
    async fn test_no_ship_skips_target_resolution() {
        let source = tempfile::tempdir().unwrap();
        let mut config = config(source.path(), "echo site > build.tar.gz");
        config.deploy.environments.clear();
        config.deploy.default_env = None;

        let report = Release::new(config)
            .with_shipping(false)
            .with_retention(RetentionPolicy::Always)
            .run()
            .await
            .unwrap();

        assert_eq!(report.exit_code(), 0);
        assert!(report.target.is_none());
        let kept = report.workspace.retained_path().unwrap();
        assert!(kept.join("build.tar.gz").is_file());
    }

    #[tokio::test]
    async fn test_cancelled_release_is_a_failure() {
        let source = tempfile::tempdir().unwrap();
        let release = Release::new(config(source.path(), "sleep 30")).with_shipping(false);
        let token = Arc::clone(release.cancel_token());

        let (report, ()) = tokio::join!(release.run(), async move {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            token.cancel("interrupted by user");
        });
        let report = report.unwrap();

        assert_eq!(report.run.status, RunStatus::Failure);
        assert_eq!(report.run.error.as_deref(), Some("interrupted by user"));
        assert!(report.workspace.retained_path().is_some());
    }

    /// Replaces a workspace directory with a plain file, which
    /// `remove_dir_all` refuses to delete.
    fn block_removal(workspace: &Path) {
        std::fs::remove_dir_all(workspace).unwrap();
        std::fs::write(workspace, "not a directory").unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_failure_after_shipping_keeps_the_receipt() {
        let source = tempfile::tempdir().unwrap();
        let uploaded: Arc<Mutex<Option<PathBuf>>> = Arc::default();

        let mut session = MockTransportSession::new();
        session.expect_ensure_dir().returning(|_| Ok(()));
        let seen = Arc::clone(&uploaded);
        session.expect_upload().returning(move |local, _| {
            *seen.lock() = Some(local.to_path_buf());
            Ok(())
        });
        session.expect_fingerprint().returning(|_| {
            Ok(RemoteFile {
                size: 5,
                sha256: hex::encode(Sha256::digest(b"site\n")),
            })
        });
        session.expect_rename().times(1).returning(|_, _| Ok(()));
        let seen = Arc::clone(&uploaded);
        session.expect_close().returning(move || {
            let artifact = seen.lock().clone().unwrap();
            block_removal(artifact.parent().unwrap());
            Ok(())
        });

        let mut transport = MockTransport::new();
        transport.expect_name().return_const("mock");
        let mut session = Some(session);
        transport
            .expect_connect()
            .times(1)
            .returning(move |_| Ok(Box::new(session.take().unwrap()) as Box<dyn TransportSession>));

        let report = Release::new(config(source.path(), "echo site > build.tar.gz"))
            .with_transport(Arc::new(transport))
            .run()
            .await
            .unwrap();

        assert_eq!(report.run.status, RunStatus::Success);
        let receipt = report.shipment.as_ref().unwrap();
        assert_eq!(receipt.remote_path, "/srv/http/domain.tld/releases/build.tar.gz");
        assert_eq!(receipt.size, 5);
        assert!(report.cleanup_error.as_deref().unwrap().contains("Failed to remove workspace"));
        assert!(report.workspace.retained_path().is_some());
        assert_eq!(report.exit_code(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_failure_without_shipping_keeps_the_summary() {
        let source = tempfile::tempdir().unwrap();
        let release = Release::new(config(source.path(), "d=$PWD; cd ..; rm -rf $d; touch $d"))
            .with_shipping(false)
            .with_retention(RetentionPolicy::Never);

        let report = release.run().await.unwrap();

        assert_eq!(report.run.status, RunStatus::Success);
        assert_eq!(report.run.status_of("package"), Some(StageStatus::Succeeded));
        assert!(report.cleanup_error.is_some());
        assert!(report.workspace.retained_path().unwrap().is_file());
        assert_eq!(report.exit_code(), 1);
    }
}
