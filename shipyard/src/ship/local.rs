//! Transport for targets on this machine.

use super::{sha256_file, RemoteFile, Transport, TransportSession};
use crate::deploy::DeployTarget;
use crate::errors::TransferError;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Copies artifacts with local filesystem operations.
///
/// With a root set, remote paths are mapped below it; `/srv/releases`
/// becomes `<root>/srv/releases`.
#[derive(Debug, Clone, Default)]
pub struct LocalTransport {
    root: Option<PathBuf>,
}

impl LocalTransport {
    /// Creates a transport using remote paths as-is.
    #[must_use]
    pub const fn new() -> Self {
        Self { root: None }
    }

    /// Creates a transport mapping remote paths below `root`.
    #[must_use]
    pub fn rooted(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn connect(&self, target: &DeployTarget) -> Result<Box<dyn TransportSession>, TransferError> {
        debug!(target = %target.id, root = ?self.root, "Opened local session");
        Ok(Box::new(LocalSession {
            root: self.root.clone(),
        }))
    }
}

#[derive(Debug)]
struct LocalSession {
    root: Option<PathBuf>,
}

impl LocalSession {
    fn resolve(&self, remote_path: &str) -> PathBuf {
        match &self.root {
            Some(root) => root.join(remote_path.trim_start_matches('/')),
            None => PathBuf::from(remote_path),
        }
    }
}

fn remote_err(operation: &str, path: &Path, err: &io::Error) -> TransferError {
    TransferError::remote(operation, format!("{}: {err}", path.display()))
}

#[async_trait]
impl TransportSession for LocalSession {
    async fn ensure_dir(&self, remote_dir: &str) -> Result<(), TransferError> {
        let path = self.resolve(remote_dir);
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| remote_err("mkdir", &path, &e))
    }

    async fn upload(&self, local: &Path, remote_path: &str) -> Result<(), TransferError> {
        let path = self.resolve(remote_path);
        tokio::fs::copy(local, &path)
            .await
            .map(|_| ())
            .map_err(|e| remote_err("upload", &path, &e))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), TransferError> {
        let (from, to) = (self.resolve(from), self.resolve(to));
        tokio::fs::rename(&from, &to)
            .await
            .map_err(|e| remote_err("rename", &from, &e))
    }

    async fn remove(&self, remote_path: &str) -> Result<(), TransferError> {
        let path = self.resolve(remote_path);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(remote_err("remove", &path, &e)),
        }
    }

    async fn fingerprint(&self, remote_path: &str) -> Result<RemoteFile, TransferError> {
        let path = self.resolve(remote_path);
        let (size, sha256) = sha256_file(&path)
            .await
            .map_err(|e| remote_err("checksum", &path, &e))?;
        Ok(RemoteFile { size, sha256 })
    }

    async fn close(&self) -> Result<(), TransferError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::{AuthRef, DeployTarget};

    fn target() -> DeployTarget {
        DeployTarget {
            id: "local".to_string(),
            host: "localhost".to_string(),
            port: 22,
            username: "deploy".to_string(),
            auth: AuthRef::Default,
            remote_path: "/srv/releases".to_string(),
        }
    }

    #[tokio::test]
    async fn test_rooted_session_round_trip() {
        let root = tempfile::tempdir().unwrap();
        let local = root.path().join("artifact.tar.gz");
        std::fs::write(&local, "tarball").unwrap();

        let transport = LocalTransport::rooted(root.path().join("remote"));
        assert_eq!(transport.name(), "local");
        let session = transport.connect(&target()).await.unwrap();

        session.ensure_dir("/srv/releases").await.unwrap();
        session.upload(&local, "/srv/releases/a.partial").await.unwrap();
        session.rename("/srv/releases/a.partial", "/srv/releases/a").await.unwrap();
        let remote = session.fingerprint("/srv/releases/a").await.unwrap();

        assert_eq!(remote.size, 7);
        assert!(root.path().join("remote/srv/releases/a").is_file());
        assert!(!root.path().join("remote/srv/releases/a.partial").exists());

        session.remove("/srv/releases/a").await.unwrap();
        session.remove("/srv/releases/a").await.unwrap();
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_fingerprint_missing_is_remote_error() {
        let root = tempfile::tempdir().unwrap();
        let session = LocalTransport::rooted(root.path()).connect(&target()).await.unwrap();

        let err = session.fingerprint("/nope").await.unwrap_err();
        assert!(matches!(err, TransferError::Remote { .. }));
    }
}
