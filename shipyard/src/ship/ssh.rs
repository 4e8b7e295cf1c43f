//! Transport over the system `ssh` client.

use super::{RemoteFile, Transport, TransportSession};
use crate::deploy::{AuthRef, DeployTarget, DEFAULT_SSH_PORT};
use crate::errors::{ConnectionError, TransferError};
use async_trait::async_trait;
use std::path::Path;
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::{debug, info};

/// Seconds `ssh` waits for the TCP connection.
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Exit status `ssh` uses for its own errors.
const SSH_ERROR_EXIT: i32 = 255;

/// Runs remote commands through `ssh` in batch mode.
///
/// Uploads stream the artifact over the session's stdin into `cat`, so the
/// remote side only needs a POSIX shell and coreutils.
#[derive(Debug, Clone)]
pub struct SshTransport {
    program: String,
}

impl Default for SshTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SshTransport {
    /// Creates a transport using `ssh` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            program: "ssh".to_string(),
        }
    }

    /// Uses a different ssh binary.
    #[must_use]
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

#[async_trait]
impl Transport for SshTransport {
    fn name(&self) -> &'static str {
        "ssh"
    }

    async fn connect(&self, target: &DeployTarget) -> Result<Box<dyn TransportSession>, TransferError> {
        let session = SshSession {
            program: self.program.clone(),
            target: target.clone(),
        };

        let output = session
            .command("true")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| session.connection_error(format!("failed to run {}: {e}", self.program)))?;
        if !output.status.success() {
            return Err(session.connection_error(stderr_of(&output)).into());
        }

        info!(target = %target.id, destination = %target.destination(), "SSH session established");
        Ok(Box::new(session))
    }
}

#[derive(Debug)]
struct SshSession {
    program: String,
    target: DeployTarget,
}

impl SshSession {
    fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let AuthRef::IdentityFile(path) = &self.target.auth {
            args.push("-i".to_string());
            args.push(path.display().to_string());
        }
        if self.target.port != DEFAULT_SSH_PORT {
            args.push("-p".to_string());
            args.push(self.target.port.to_string());
        }
        for option in [
            "BatchMode=yes".to_string(),
            format!("ConnectTimeout={CONNECT_TIMEOUT_SECS}"),
            "ServerAliveInterval=15".to_string(),
            "ServerAliveCountMax=3".to_string(),
        ] {
            args.push("-o".to_string());
            args.push(option);
        }
        args.push(self.target.destination());
        args
    }

    fn command(&self, remote_command: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.args())
            .arg(remote_command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let AuthRef::Agent(socket) = &self.target.auth {
            cmd.env("SSH_AUTH_SOCK", socket);
        }
        cmd
    }

    fn connection_error(&self, reason: impl Into<String>) -> ConnectionError {
        ConnectionError::new(
            &self.target.host,
            self.target.port,
            &self.target.username,
            reason,
        )
    }

    async fn run(&self, operation: &str, remote_command: &str, stdin: Stdio) -> Result<Output, TransferError> {
        debug!(operation, command = %remote_command, "Running remote command");
        let output = self
            .command(remote_command)
            .stdin(stdin)
            .output()
            .await
            .map_err(|e| TransferError::remote(operation, e.to_string()))?;

        match output.status.code() {
            Some(0) => Ok(output),
            Some(SSH_ERROR_EXIT) => Err(self.connection_error(stderr_of(&output)).into()),
            _ => Err(TransferError::remote(operation, stderr_of(&output))),
        }
    }
}

#[async_trait]
impl TransportSession for SshSession {
    async fn ensure_dir(&self, remote_dir: &str) -> Result<(), TransferError> {
        self.run("mkdir", &format!("mkdir -p {}", shell_quote(remote_dir)), Stdio::null())
            .await
            .map(drop)
    }

    async fn upload(&self, local: &Path, remote_path: &str) -> Result<(), TransferError> {
        let file = tokio::fs::File::open(local)
            .await
            .map_err(|source| TransferError::Artifact {
                path: local.to_path_buf(),
                source,
            })?
            .into_std()
            .await;
        self.run("upload", &format!("cat > {}", shell_quote(remote_path)), Stdio::from(file))
            .await
            .map(drop)
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), TransferError> {
        let command = format!("mv -f {} {}", shell_quote(from), shell_quote(to));
        self.run("rename", &command, Stdio::null()).await.map(drop)
    }

    async fn remove(&self, remote_path: &str) -> Result<(), TransferError> {
        self.run("remove", &format!("rm -f {}", shell_quote(remote_path)), Stdio::null())
            .await
            .map(drop)
    }

    async fn fingerprint(&self, remote_path: &str) -> Result<RemoteFile, TransferError> {
        let quoted = shell_quote(remote_path);
        let output = self
            .run(
                "checksum",
                &format!("stat -c %s {quoted} && sha256sum {quoted}"),
                Stdio::null(),
            )
            .await?;
        parse_fingerprint(&String::from_utf8_lossy(&output.stdout))
            .ok_or_else(|| TransferError::remote("checksum", "unexpected stat/sha256sum output"))
    }

    async fn close(&self) -> Result<(), TransferError> {
        debug!(target = %self.target.id, "SSH session closed");
        Ok(())
    }
}

/// Parses `stat -c %s` followed by `sha256sum` output.
fn parse_fingerprint(stdout: &str) -> Option<RemoteFile> {
    let mut lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty());
    let size = lines.next()?.parse().ok()?;
    let sha256 = lines.next()?.split_whitespace().next()?.to_ascii_lowercase();
    (sha256.len() == 64).then_some(RemoteFile { size, sha256 })
}

fn stderr_of(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        format!("exited with {}", output.status)
    } else {
        stderr
    }
}

/// Single-quotes a value for a POSIX shell.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;

    fn target(auth: AuthRef, port: u16) -> DeployTarget {
        DeployTarget {
            id: "production".to_string(),
            host: "domain.tld".to_string(),
            port,
            username: "user".to_string(),
            auth,
            remote_path: "/srv/http/domain.tld/releases".to_string(),
        }
    }

    fn session(target: DeployTarget) -> SshSession {
        SshSession {
            program: "ssh".to_string(),
            target,
        }
    }

    #[test]
    fn test_args_default_port_agent() {
        let args = session(target(AuthRef::Agent("/tmp/agent".into()), 22)).args();
        assert_eq!(
            args,
            vec![
                "-o",
                "BatchMode=yes",
                "-o",
                "ConnectTimeout=10",
                "-o",
                "ServerAliveInterval=15",
                "-o",
                "ServerAliveCountMax=3",
                "user@domain.tld",
            ]
        );
    }

    #[test]
    fn test_args_identity_and_port() {
        let auth = AuthRef::IdentityFile(PathBuf::from("/home/user/.ssh/id_ed25519"));
        let args = session(target(auth, 2222)).args();
        assert_eq!(&args[..4], &["-i", "/home/user/.ssh/id_ed25519", "-p", "2222"]);
        assert_eq!(args.last().map(String::as_str), Some("user@domain.tld"));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/srv/a b"), "'/srv/a b'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_parse_fingerprint() {
        let digest = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";
        let parsed = parse_fingerprint(&format!("3\n{digest}  /srv/build.tar.gz\n")).unwrap();
        assert_eq!(parsed.size, 3);
        assert_eq!(parsed.sha256, digest);

        assert!(parse_fingerprint("garbage").is_none());
        assert!(parse_fingerprint("3\nshort  /srv/x\n").is_none());
    }

    #[tokio::test]
    async fn test_connect_failure_when_program_missing() {
        let transport = SshTransport::new().with_program("/nonexistent/ssh-binary");
        let err = transport
            .connect(&target(AuthRef::Default, 22))
            .await
            .err()
            .unwrap();

        match err {
            TransferError::Connection(e) => {
                assert_eq!(e.host, "domain.tld");
                assert!(e.reason.contains("failed to run"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
