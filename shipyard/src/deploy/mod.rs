//! Deploy targets and the registry resolving environment names to them.

mod registry;
mod target;

pub use registry::{DeployConfig, DeployTargetRegistry};
pub use target::{AuthRef, DeployTarget, EnvironmentConfig, DEFAULT_SSH_PORT};
