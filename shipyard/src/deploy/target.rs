//! Deploy target definitions.

use crate::errors::InvalidTargetConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Port used when an environment does not set one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// How the transport authenticates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum AuthRef {
    /// Use the ssh agent listening on this socket.
    Agent(String),
    /// Use this private key file.
    IdentityFile(PathBuf),
    /// Let the ssh client pick its defaults.
    Default,
}

impl fmt::Display for AuthRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Agent(socket) => write!(f, "agent ({socket})"),
            Self::IdentityFile(path) => write!(f, "identity file ({})", path.display()),
            Self::Default => write!(f, "ssh defaults"),
        }
    }
}

/// A resolved deployment destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployTarget {
    /// Environment name.
    pub id: String,
    /// Remote host name or address.
    pub host: String,
    /// Remote ssh port.
    pub port: u16,
    /// Login user.
    pub username: String,
    /// Authentication reference.
    pub auth: AuthRef,
    /// Remote directory receiving artifacts.
    pub remote_path: String,
}

impl DeployTarget {
    /// Checks that every field needed for shipping is present.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first empty field.
    pub fn validate(&self) -> Result<(), InvalidTargetConfigError> {
        let required = [
            ("host", self.host.trim().is_empty()),
            ("port", self.port == 0),
            ("username", self.username.trim().is_empty()),
            ("path", self.remote_path.trim().is_empty()),
        ];
        match required.iter().find(|(_, missing)| *missing) {
            Some((field, _)) => Err(InvalidTargetConfigError::new(&self.id, *field)),
            None => Ok(()),
        }
    }

    /// Returns true if the host is this machine.
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self.host.as_str(), "localhost" | "127.0.0.1" | "::1")
    }

    /// Returns `user@host`.
    #[must_use]
    pub fn destination(&self) -> String {
        format!("{}@{}", self.username, self.host)
    }

    /// Returns the remote path an artifact with this file name lands at.
    #[must_use]
    pub fn remote_file(&self, file_name: &str) -> String {
        format!("{}/{file_name}", self.remote_path.trim_end_matches('/'))
    }
}

impl fmt::Display for DeployTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{}:{}",
            self.username, self.host, self.port, self.remote_path
        )
    }
}

/// One `[environments.<name>]` table.
///
/// Every field defaults to empty so that a missing value is reported by
/// validation with the field name instead of a parse error.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvironmentConfig {
    /// Remote host.
    pub host: String,
    /// Remote port.
    pub port: Option<u16>,
    /// Login user.
    pub username: String,
    /// Agent socket path.
    pub agent: Option<String>,
    /// Private key path.
    pub identity_file: Option<PathBuf>,
    /// Remote release directory.
    pub path: String,
}

impl EnvironmentConfig {
    /// Converts the table into a target named `id`.
    ///
    /// An identity file wins over an agent socket; empty values count as unset.
    #[must_use]
    pub fn to_target(&self, id: &str) -> DeployTarget {
        let identity = self
            .identity_file
            .as_ref()
            .filter(|path| !path.as_os_str().is_empty());
        let agent = self.agent.as_ref().filter(|socket| !socket.trim().is_empty());
        let auth = match (identity, agent) {
            (Some(path), _) => AuthRef::IdentityFile(path.clone()),
            (None, Some(socket)) => AuthRef::Agent(socket.clone()),
            (None, None) => AuthRef::Default,
        };

        DeployTarget {
            id: id.to_string(),
            host: self.host.clone(),
            port: self.port.unwrap_or(DEFAULT_SSH_PORT),
            username: self.username.clone(),
            auth,
            remote_path: self.path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn production() -> EnvironmentConfig {
        EnvironmentConfig {
            host: "domain.tld".to_string(),
            port: None,
            username: "user".to_string(),
            agent: Some("/run/user/1000/ssh-agent.sock".to_string()),
            identity_file: None,
            path: "/srv/http/domain.tld/releases/".to_string(),
        }
    }

    #[test]
    fn test_to_target_defaults() {
        let target = production().to_target("production");

        assert_eq!(target.port, DEFAULT_SSH_PORT);
        assert_eq!(
            target.auth,
            AuthRef::Agent("/run/user/1000/ssh-agent.sock".to_string())
        );
        assert_eq!(target.destination(), "user@domain.tld");
        assert_eq!(
            target.remote_file("build.tar.gz"),
            "/srv/http/domain.tld/releases/build.tar.gz"
        );
        assert!(target.validate().is_ok());
        assert!(!target.is_local());
    }

    #[test]
    fn test_identity_file_wins_and_empty_agent_is_unset() {
        let mut env = production();
        env.identity_file = Some(PathBuf::from("/home/user/.ssh/id_ed25519"));
        assert!(matches!(env.to_target("p").auth, AuthRef::IdentityFile(_)));

        env.identity_file = None;
        env.agent = Some(String::new());
        assert_eq!(env.to_target("p").auth, AuthRef::Default);
    }

    #[test]
    fn test_validate_names_missing_field() {
        let mut env = production();
        env.host = "  ".to_string();
        let err = env.to_target("production").validate().unwrap_err();
        assert_eq!(err.field, "host");
        assert_eq!(err.target, "production");

        let mut env = production();
        env.path = String::new();
        assert_eq!(env.to_target("production").validate().unwrap_err().field, "path");

        let mut env = production();
        env.port = Some(0);
        assert_eq!(env.to_target("production").validate().unwrap_err().field, "port");
    }

    #[test]
    fn test_local_hosts() {
        let mut env = production();
        env.host = "localhost".to_string();
        assert!(env.to_target("local").is_local());
    }
}
