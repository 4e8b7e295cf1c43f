//! Transport abstraction over remote copy tools.

use crate::deploy::DeployTarget;
use crate::errors::TransferError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Size and checksum of a remote file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Size in bytes.
    pub size: u64,
    /// Hex SHA-256.
    pub sha256: String,
}

/// Opens sessions to deploy targets.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Returns a short transport name for logs.
    fn name(&self) -> &'static str;

    /// Opens a session, failing with a connection error if the target is
    /// unreachable or rejects authentication.
    async fn connect(&self, target: &DeployTarget) -> Result<Box<dyn TransportSession>, TransferError>;
}

/// An open session against one target.
///
/// Remote paths are absolute paths on the target.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransportSession: Send + Sync {
    /// Creates a remote directory and its parents.
    async fn ensure_dir(&self, remote_dir: &str) -> Result<(), TransferError>;

    /// Copies a local file to a remote path, replacing any existing file.
    async fn upload(&self, local: &Path, remote_path: &str) -> Result<(), TransferError>;

    /// Renames a remote file, replacing the destination.
    async fn rename(&self, from: &str, to: &str) -> Result<(), TransferError>;

    /// Removes a remote file; a missing file is not an error.
    async fn remove(&self, remote_path: &str) -> Result<(), TransferError>;

    /// Returns the size and checksum of a remote file.
    async fn fingerprint(&self, remote_path: &str) -> Result<RemoteFile, TransferError>;

    /// Closes the session.
    async fn close(&self) -> Result<(), TransferError>;
}
