//! Verified artifact shipment.

use super::{sha256_file, Transport, TransportSession};
use crate::deploy::DeployTarget;
use crate::errors::{TransferError, TransferVerificationError};
use crate::events::{kinds, EventSink, NoOpEventSink};
use crate::observability::SpanTimer;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Suffix of the temporary remote file written before the final rename.
pub const PARTIAL_SUFFIX: &str = ".partial";

/// Proof of a completed, verified shipment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShipmentReceipt {
    /// Environment the artifact was shipped to.
    pub target: String,
    /// Final remote path.
    pub remote_path: String,
    /// Artifact size in bytes.
    pub size: u64,
    /// Artifact SHA-256 (hex).
    pub sha256: String,
    /// Time spent shipping.
    pub duration_ms: f64,
}

/// Ships artifacts to deploy targets through a transport.
#[derive(Clone)]
pub struct ArtifactShipper {
    transport: Arc<dyn Transport>,
    event_sink: Arc<dyn EventSink>,
}

impl ArtifactShipper {
    /// Creates a shipper over a transport.
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            event_sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.event_sink = sink;
        self
    }

    /// Transfers `artifact` into the target's remote directory and verifies it.
    ///
    /// The upload lands at `<name>.partial`, is checked against the local
    /// size and SHA-256, and only then renamed over `<remote_path>/<name>`.
    /// Shipping the same artifact again overwrites the previous copy.
    pub async fn ship(&self, artifact: &Path, target: &DeployTarget) -> Result<ShipmentReceipt, TransferError> {
        let timer = SpanTimer::start(format!("ship:{}", target.id));
        self.event_sink.try_emit(
            kinds::SHIP_STARTED,
            Some(serde_json::json!({
                "target": &target.id,
                "artifact": artifact.display().to_string(),
                "transport": self.transport.name(),
            })),
        );

        match self.ship_inner(artifact, target).await {
            Ok((remote_path, size, sha256)) => {
                let receipt = ShipmentReceipt {
                    target: target.id.clone(),
                    remote_path,
                    size,
                    sha256,
                    duration_ms: timer.finish(),
                };
                info!(
                    target = %receipt.target,
                    remote_path = %receipt.remote_path,
                    size = receipt.size,
                    "Artifact shipped"
                );
                self.event_sink.try_emit(
                    kinds::SHIP_COMPLETED,
                    serde_json::to_value(&receipt).ok(),
                );
                Ok(receipt)
            }
            Err(err) => {
                warn!(target = %target.id, error = %err, "Shipment failed");
                self.event_sink.try_emit(
                    kinds::SHIP_FAILED,
                    Some(serde_json::json!({ "target": &target.id, "error": err.to_string() })),
                );
                Err(err)
            }
        }
    }

    async fn ship_inner(
        &self,
        artifact: &Path,
        target: &DeployTarget,
    ) -> Result<(String, u64, String), TransferError> {
        let artifact_err = |source: io::Error| TransferError::Artifact {
            path: artifact.to_path_buf(),
            source,
        };
        let file_name = artifact
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| artifact_err(io::Error::new(io::ErrorKind::InvalidInput, "no file name")))?;
        let (size, sha256) = sha256_file(artifact).await.map_err(artifact_err)?;

        let remote_path = target.remote_file(file_name);
        let partial = format!("{remote_path}{PARTIAL_SUFFIX}");

        let session = self.transport.connect(target).await?;
        let result = transfer(&*session, artifact, target, &partial, &remote_path, (size, &sha256)).await;

        if result.is_err() {
            if let Err(err) = session.remove(&partial).await {
                warn!(path = %partial, error = %err, "Failed to remove partial upload");
            }
        }
        if let Err(err) = session.close().await {
            warn!(target = %target.id, error = %err, "Failed to close transport session");
        }

        result.map(|()| (remote_path, size, sha256))
    }
}

async fn transfer(
    session: &dyn TransportSession,
    artifact: &Path,
    target: &DeployTarget,
    partial: &str,
    remote_path: &str,
    expected: (u64, &str),
) -> Result<(), TransferError> {
    session.ensure_dir(&target.remote_path).await?;
    session.upload(artifact, partial).await?;

    let remote = session.fingerprint(partial).await?;
    if remote.size != expected.0 || !remote.sha256.eq_ignore_ascii_case(expected.1) {
        return Err(TransferVerificationError::new(
            remote_path,
            expected,
            (remote.size, &remote.sha256),
        )
        .into());
    }

    session.rename(partial, remote_path).await
}

impl std::fmt::Debug for ArtifactShipper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArtifactShipper")
            .field("transport", &self.transport.name())
            .finish_non_exhaustive()
    }
}
