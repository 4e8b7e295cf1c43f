//! Environment name to deploy target resolution.

use super::{DeployTarget, EnvironmentConfig};
use crate::errors::{ConfigurationError, InvalidTargetConfigError, UnknownEnvironmentError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Deploy settings loaded from the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Environment used when none is requested.
    #[serde(default)]
    pub default_env: Option<String>,
    /// Environments by name.
    #[serde(default)]
    pub environments: BTreeMap<String, EnvironmentConfig>,
}

/// Registry of validated deploy targets.
///
/// Built once from an explicit [`DeployConfig`] and read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct DeployTargetRegistry {
    targets: BTreeMap<String, DeployTarget>,
    default_env: Option<String>,
}

impl DeployTargetRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers every environment of a configuration.
    ///
    /// # Errors
    ///
    /// - `InvalidTarget` when an environment misses a required field
    /// - `UnknownEnvironment` when `default_env` names no environment
    pub fn from_config(config: &DeployConfig) -> Result<Self, ConfigurationError> {
        let mut registry = Self::new();
        for (name, env) in &config.environments {
            registry.register(env.to_target(name))?;
        }

        if let Some(default) = config.default_env.as_deref().filter(|d| !d.is_empty()) {
            registry.resolve(default)?;
            registry.default_env = Some(default.to_string());
        }
        Ok(registry)
    }

    /// Adds or replaces a target.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first required field that is empty.
    pub fn register(&mut self, target: DeployTarget) -> Result<(), InvalidTargetConfigError> {
        target.validate()?;
        debug!(env = %target.id, target = %target, "Registered deploy target");
        self.targets.insert(target.id.clone(), target);
        Ok(())
    }

    /// Sets the default environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the environment is not registered.
    pub fn set_default(&mut self, name: &str) -> Result<(), UnknownEnvironmentError> {
        self.resolve(name)?;
        self.default_env = Some(name.to_string());
        Ok(())
    }

    /// Resolves an environment name.
    ///
    /// # Errors
    ///
    /// Returns an error listing the known environments if `name` is unknown.
    pub fn resolve(&self, name: &str) -> Result<&DeployTarget, UnknownEnvironmentError> {
        self.targets
            .get(name)
            .ok_or_else(|| UnknownEnvironmentError::new(name, self.names().into_iter().map(String::from).collect()))
    }

    /// Resolves `name`, or the default environment when `name` is `None`.
    ///
    /// # Errors
    ///
    /// - `UnknownEnvironment` when the name is not registered
    /// - `Invalid` when no name is given and no default is configured
    pub fn resolve_or_default(&self, name: Option<&str>) -> Result<&DeployTarget, ConfigurationError> {
        match name.or(self.default_env.as_deref()) {
            Some(name) => Ok(self.resolve(name)?),
            None => Err(ConfigurationError::Invalid(
                "no environment requested and no default_env configured".to_string(),
            )),
        }
    }

    /// Returns the default environment name.
    #[must_use]
    pub fn default_env(&self) -> Option<&str> {
        self.default_env.as_deref()
    }

    /// Returns the registered environment names in sorted order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.targets.keys().map(String::as_str).collect()
    }

    /// Returns the registered targets in name order.
    pub fn targets(&self) -> impl Iterator<Item = &DeployTarget> {
        self.targets.values()
    }

    /// Returns the number of targets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Returns true if no target is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::AuthRef;
    use pretty_assertions::assert_eq;

    fn production() -> EnvironmentConfig {
        EnvironmentConfig {
            host: "domain.tld".to_string(),
            port: Some(22),
            username: "user".to_string(),
            agent: Some("/tmp/agent.sock".to_string()),
            identity_file: None,
            path: "/srv/http/domain.tld/releases".to_string(),
        }
    }

    fn config() -> DeployConfig {
        DeployConfig {
            default_env: Some("production".to_string()),
            environments: BTreeMap::from([("production".to_string(), production())]),
        }
    }

    #[test]
    fn test_resolve_registered() {
        let registry = DeployTargetRegistry::from_config(&config()).unwrap();

        let target = registry.resolve("production").unwrap();
        assert_eq!(target.host, "domain.tld");
        assert_eq!(target.auth, AuthRef::Agent("/tmp/agent.sock".to_string()));
        assert_eq!(registry.default_env(), Some("production"));
        assert_eq!(registry.names(), vec!["production"]);
    }

    #[test]
    fn test_unknown_environment() {
        let registry = DeployTargetRegistry::from_config(&config()).unwrap();

        let err = registry.resolve("staging").unwrap_err();
        assert_eq!(err.name, "staging");
        assert_eq!(err.known, vec!["production"]);
        assert_eq!(err.error_info.code, "TARGET-UNKNOWN_ENV");
    }

    #[test]
    fn test_resolve_or_default() {
        let registry = DeployTargetRegistry::from_config(&config()).unwrap();
        assert_eq!(registry.resolve_or_default(None).unwrap().id, "production");
        assert!(matches!(
            registry.resolve_or_default(Some("staging")),
            Err(ConfigurationError::UnknownEnvironment(_))
        ));

        let no_default = DeployTargetRegistry::from_config(&DeployConfig {
            default_env: None,
            ..config()
        })
        .unwrap();
        assert!(matches!(
            no_default.resolve_or_default(None),
            Err(ConfigurationError::Invalid(_))
        ));
    }

    #[test]
    fn test_invalid_target_rejected() {
        let mut config = config();
        config
            .environments
            .insert("staging".to_string(), EnvironmentConfig { username: String::new(), ..production() });

        match DeployTargetRegistry::from_config(&config).unwrap_err() {
            ConfigurationError::InvalidTarget(e) => {
                assert_eq!(e.target, "staging");
                assert_eq!(e.field, "username");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_default_must_exist() {
        let config = DeployConfig {
            default_env: Some("staging".to_string()),
            ..config()
        };
        assert!(matches!(
            DeployTargetRegistry::from_config(&config),
            Err(ConfigurationError::UnknownEnvironment(_))
        ));
    }

    #[test]
    fn test_register_replaces_and_sets_default() {
        let mut registry = DeployTargetRegistry::new();
        assert!(registry.is_empty());

        registry.register(production().to_target("production")).unwrap();
        let moved = EnvironmentConfig { host: "new.domain.tld".to_string(), ..production() };
        registry.register(moved.to_target("production")).unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve("production").unwrap().host, "new.domain.tld");
        assert!(registry.set_default("staging").is_err());
        registry.set_default("production").unwrap();
        assert_eq!(registry.default_env(), Some("production"));
    }
}
