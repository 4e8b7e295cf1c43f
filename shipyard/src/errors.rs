//! Error types for shipyard.
//!
//! Errors fall into four categories that decide how a run reacts:
//!
//! - [`ConfigurationError`]: bad stage graph, unknown environment or invalid
//!   target. Always fatal and reported before any stage runs.
//! - [`ExecutionError`]: a stage action failed. Local to the stage; its
//!   dependents are skipped, independent branches keep going.
//! - [`TransferError`]: shipping failed. Aborts only the shipping phase.
//! - [`ResourceError`]: the workspace could not be created or cleaned up.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for shipyard operations.
#[derive(Debug, Error)]
pub enum ShipyardError {
    /// The pipeline or deploy configuration is invalid.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// A stage action failed.
    #[error("{0}")]
    Execution(#[from] ExecutionError),

    /// Shipping an artifact failed.
    #[error("{0}")]
    Transfer(#[from] TransferError),

    /// A filesystem resource could not be acquired or released.
    #[error("{0}")]
    Resource(#[from] ResourceError),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ShipyardError {
    /// Returns the process exit code this error maps to.
    ///
    /// Configuration errors exit with `2`, everything else with `1`.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Configuration(_) => 2,
            _ => 1,
        }
    }

    /// Returns the diagnostic info attached to the error, if any.
    #[must_use]
    pub fn error_info(&self) -> Option<&ErrorInfo> {
        match self {
            Self::Configuration(err) => err.error_info(),
            Self::Transfer(err) => err.error_info(),
            _ => None,
        }
    }
}

/// Diagnostic metadata attached to the named error types.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Error code (e.g., "GRAPH-CYCLE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }
}

/// Errors detected while validating configuration, before anything runs.
#[derive(Debug, Clone, Error)]
pub enum ConfigurationError {
    /// Two stages share an id.
    #[error("{0}")]
    DuplicateStage(#[from] DuplicateStageError),

    /// A stage depends on an id that is not defined.
    #[error("{0}")]
    UnknownDependency(#[from] UnknownDependencyError),

    /// The stage graph contains a cycle.
    #[error("{0}")]
    CycleDetected(#[from] CycleDetectedError),

    /// The requested environment is not registered.
    #[error("{0}")]
    UnknownEnvironment(#[from] UnknownEnvironmentError),

    /// A deploy target is missing a required field.
    #[error("{0}")]
    InvalidTarget(#[from] InvalidTargetConfigError),

    /// The pipeline defines no stages.
    #[error("Pipeline '{pipeline}' has no stages")]
    EmptyPipeline {
        /// The pipeline name.
        pipeline: String,
    },

    /// The configuration file could not be read or parsed.
    #[error("Failed to load configuration from {path}: {message}")]
    Parse {
        /// The configuration file.
        path: PathBuf,
        /// Parser or IO message.
        message: String,
    },

    /// A configuration value is invalid.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigurationError {
    /// Returns the diagnostic info of the underlying named error.
    #[must_use]
    pub const fn error_info(&self) -> Option<&ErrorInfo> {
        match self {
            Self::DuplicateStage(e) => Some(&e.error_info),
            Self::UnknownDependency(e) => Some(&e.error_info),
            Self::CycleDetected(e) => Some(&e.error_info),
            Self::UnknownEnvironment(e) => Some(&e.error_info),
            Self::InvalidTarget(e) => Some(&e.error_info),
            Self::EmptyPipeline { .. } | Self::Parse { .. } | Self::Invalid(_) => None,
        }
    }
}

/// Error raised when two stage definitions share an id.
#[derive(Debug, Clone, Error)]
#[error("Duplicate stage id '{stage}'")]
pub struct DuplicateStageError {
    /// The duplicated id.
    pub stage: String,
    /// Diagnostic info.
    pub error_info: ErrorInfo,
}

impl DuplicateStageError {
    /// Creates a new duplicate stage error.
    #[must_use]
    pub fn new(stage: impl Into<String>) -> Self {
        let stage = stage.into();
        let error_info = ErrorInfo::new(
            "GRAPH-DUPLICATE",
            format!("Stage '{stage}' is defined more than once"),
        )
        .with_fix_hint("Rename one of the stages so every id is unique.");
        Self { stage, error_info }
    }
}

/// Error raised when a stage depends on an undefined stage.
#[derive(Debug, Clone, Error)]
#[error("Stage '{stage}' depends on unknown stage '{dependency}'")]
pub struct UnknownDependencyError {
    /// The stage declaring the dependency.
    pub stage: String,
    /// The missing dependency id.
    pub dependency: String,
    /// Diagnostic info.
    pub error_info: ErrorInfo,
}

impl UnknownDependencyError {
    /// Creates a new unknown dependency error.
    #[must_use]
    pub fn new(stage: impl Into<String>, dependency: impl Into<String>) -> Self {
        let stage = stage.into();
        let dependency = dependency.into();
        let error_info = ErrorInfo::new(
            "GRAPH-MISSING_DEP",
            format!("Dependency '{dependency}' not found"),
        )
        .with_fix_hint("Check for typos in stage ids or define the missing stage.");
        Self {
            stage,
            dependency,
            error_info,
        }
    }
}

/// Error raised when a cycle is detected in the stage graph.
///
/// `cycle_path` lists every stage of the cycle once, in dependency order.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in pipeline: {}", display_cycle(cycle_path))]
pub struct CycleDetectedError {
    /// The stages forming the cycle.
    pub cycle_path: Vec<String>,
    /// Diagnostic info.
    pub error_info: ErrorInfo,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        let error_info = ErrorInfo::new(
            "GRAPH-CYCLE",
            format!(
                "Pipeline contains a dependency cycle: {}",
                display_cycle(&cycle_path)
            ),
        )
        .with_fix_hint("Remove one of the dependencies in the cycle to break it.");

        Self {
            cycle_path,
            error_info,
        }
    }
}

fn display_cycle(path: &[String]) -> String {
    match path.first() {
        Some(first) => {
            let mut parts: Vec<&str> = path.iter().map(String::as_str).collect();
            parts.push(first);
            parts.join(" -> ")
        }
        None => String::new(),
    }
}

/// Error raised when looking up an environment that is not registered.
#[derive(Debug, Clone, Error)]
#[error("Unknown environment '{name}' (known: {})", known.join(", "))]
pub struct UnknownEnvironmentError {
    /// The requested environment.
    pub name: String,
    /// The registered environments.
    pub known: Vec<String>,
    /// Diagnostic info.
    pub error_info: ErrorInfo,
}

impl UnknownEnvironmentError {
    /// Creates a new unknown environment error.
    #[must_use]
    pub fn new(name: impl Into<String>, known: Vec<String>) -> Self {
        let name = name.into();
        let error_info = ErrorInfo::new(
            "TARGET-UNKNOWN_ENV",
            format!("No deploy target registered for '{name}'"),
        )
        .with_fix_hint("Add an [environments.<name>] table or pick a registered environment.");
        Self {
            name,
            known,
            error_info,
        }
    }
}

/// Error raised when a deploy target is missing a required field.
#[derive(Debug, Clone, Error)]
#[error("Deploy target '{target}' is invalid: missing required field '{field}'")]
pub struct InvalidTargetConfigError {
    /// The target id.
    pub target: String,
    /// The missing or empty field.
    pub field: String,
    /// Diagnostic info.
    pub error_info: ErrorInfo,
}

impl InvalidTargetConfigError {
    /// Creates a new invalid target error.
    #[must_use]
    pub fn new(target: impl Into<String>, field: impl Into<String>) -> Self {
        let target = target.into();
        let field = field.into();
        let error_info = ErrorInfo::new(
            "TARGET-INVALID",
            format!("Target '{target}' has an empty '{field}'"),
        )
        .with_fix_hint(format!("Set '{field}' for environment '{target}'."));
        Self {
            target,
            field,
            error_info,
        }
    }
}

/// Error raised when a stage action fails.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[error("Stage '{stage}' failed: {message}")]
pub struct ExecutionError {
    /// The failed stage.
    pub stage: String,
    /// Captured failure detail.
    pub message: String,
}

impl ExecutionError {
    /// Creates a new execution error.
    #[must_use]
    pub fn new(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            message: message.into(),
        }
    }
}

/// Errors raised while shipping an artifact.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The transport session could not be established.
    #[error("{0}")]
    Connection(#[from] ConnectionError),

    /// The remote copy does not match the local artifact.
    #[error("{0}")]
    Verification(#[from] TransferVerificationError),

    /// The local artifact could not be read.
    #[error("Artifact {path} is not readable: {source}")]
    Artifact {
        /// The local artifact path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// A remote operation failed after the session was established.
    #[error("Remote operation '{operation}' failed: {message}")]
    Remote {
        /// The operation (e.g., "upload").
        operation: String,
        /// Captured detail.
        message: String,
    },
}

impl TransferError {
    /// Creates a remote operation error.
    #[must_use]
    pub fn remote(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Returns the diagnostic info of the underlying named error.
    #[must_use]
    pub const fn error_info(&self) -> Option<&ErrorInfo> {
        match self {
            Self::Connection(e) => Some(&e.error_info),
            Self::Verification(e) => Some(&e.error_info),
            Self::Artifact { .. } | Self::Remote { .. } => None,
        }
    }
}

/// Error raised when a transport session cannot be established.
#[derive(Debug, Clone, Error)]
#[error("Cannot connect to {username}@{host}:{port}: {reason}")]
pub struct ConnectionError {
    /// The remote host.
    pub host: String,
    /// The remote port.
    pub port: u16,
    /// The login user.
    pub username: String,
    /// Why the connection failed.
    pub reason: String,
    /// Diagnostic info.
    pub error_info: ErrorInfo,
}

impl ConnectionError {
    /// Creates a new connection error.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        let host = host.into();
        let error_info = ErrorInfo::new(
            "TRANSFER-CONNECT",
            format!("Host '{host}' is unreachable or rejected authentication"),
        )
        .with_fix_hint("Check host, port, username and that your key or agent is available.");
        Self {
            host,
            port,
            username: username.into(),
            reason: reason.into(),
            error_info,
        }
    }
}

/// Error raised when the transferred artifact does not match the local one.
#[derive(Debug, Clone, Error)]
#[error(
    "Verification failed for {remote_path}: expected {expected_size} bytes ({expected_sha256}), \
     found {actual_size} bytes ({actual_sha256})"
)]
pub struct TransferVerificationError {
    /// The remote path that was checked.
    pub remote_path: String,
    /// Local size in bytes.
    pub expected_size: u64,
    /// Remote size in bytes.
    pub actual_size: u64,
    /// Local SHA-256 (hex).
    pub expected_sha256: String,
    /// Remote SHA-256 (hex).
    pub actual_sha256: String,
    /// Diagnostic info.
    pub error_info: ErrorInfo,
}

impl TransferVerificationError {
    /// Creates a new verification error.
    #[must_use]
    pub fn new(
        remote_path: impl Into<String>,
        expected: (u64, &str),
        actual: (u64, &str),
    ) -> Self {
        let remote_path = remote_path.into();
        let error_info = ErrorInfo::new(
            "TRANSFER-VERIFY",
            format!("Remote copy at '{remote_path}' does not match the local artifact"),
        )
        .with_fix_hint("Re-run the shipment; the local artifact is kept for retry.");
        Self {
            remote_path,
            expected_size: expected.0,
            actual_size: actual.0,
            expected_sha256: expected.1.to_string(),
            actual_sha256: actual.1.to_string(),
            error_info,
        }
    }
}

/// Errors raised while acquiring or releasing filesystem resources.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// The workspace directory could not be created.
    #[error("Failed to create workspace at {path}: {source}")]
    WorkspaceCreate {
        /// The attempted path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The workspace directory could not be removed.
    #[error("Failed to remove workspace at {path}: {source}")]
    WorkspaceCleanup {
        /// The workspace path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}
