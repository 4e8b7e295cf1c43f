//! Configuration file schema.

use crate::deploy::DeployConfig;
use crate::errors::ConfigurationError;
use crate::pipeline::{ExecutorConfig, PipelineBuilder, StageSpec};
use crate::stages::{CommandStage, FsOperation, FsStage, Stage};
use crate::workspace::RetentionPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// The whole `shipyard.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipyardConfig {
    /// Pipeline settings.
    #[serde(default)]
    pub pipeline: PipelineSettings,
    /// Stage definitions in definition order.
    #[serde(default)]
    pub stages: Vec<StageConfig>,
    /// Default environment and environment tables.
    #[serde(flatten)]
    pub deploy: DeployConfig,
    /// Top-level keys nothing above claims.
    #[serde(flatten)]
    pub unknown: BTreeMap<String, toml::Value>,
    /// Directory the configuration was loaded from.
    #[serde(skip)]
    pub source_dir: PathBuf,
}

/// The `[pipeline]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Pipeline name.
    pub name: String,
    /// Artifact produced by the pipeline, relative to the workspace.
    pub artifact: String,
    /// Maximum concurrent stages.
    pub concurrency: Option<usize>,
    /// Whole-run timeout in seconds.
    pub timeout_secs: Option<u64>,
    /// Where run workspaces are created, relative to the source directory.
    pub workspace_root: PathBuf,
    /// When finished workspaces are kept.
    pub retention: RetentionPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            name: "release".to_string(),
            artifact: "build.tar.gz".to_string(),
            concurrency: None,
            timeout_secs: None,
            workspace_root: PathBuf::from(".shipyard/runs"),
            retention: RetentionPolicy::default(),
        }
    }
}

/// One `[[stages]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Unique stage id.
    pub id: String,
    /// Ids of the stages this stage waits for.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// The action to run.
    #[serde(flatten)]
    pub action: ActionConfig,
    /// Action timeout in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Extra environment for `shell` and `exec` actions.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// Built-in stage actions, selected by `action = "..."`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "kebab-case")]
pub enum ActionConfig {
    /// `sh -c script` in the workspace.
    Shell {
        /// Script text.
        script: String,
    },
    /// A program with arguments, no shell.
    Exec {
        /// Program name or path.
        program: String,
        /// Arguments.
        #[serde(default)]
        args: Vec<String>,
    },
    /// Copy from the source directory into the workspace.
    Copy {
        /// Source-relative path or wildcard pattern.
        from: String,
        /// Workspace-relative destination.
        to: String,
    },
    /// Move every entry of a workspace directory into another.
    MoveContents {
        /// Directory to empty.
        from: String,
        /// Destination directory.
        to: String,
    },
    /// Remove a workspace path.
    Remove {
        /// Workspace-relative path.
        path: String,
    },
    /// Create a workspace directory.
    Mkdir {
        /// Workspace-relative path.
        path: String,
    },
}

impl StageConfig {
    /// Builds the stage action.
    #[must_use]
    pub fn runner(&self) -> Arc<dyn Stage> {
        let command = |stage: CommandStage| -> Arc<dyn Stage> {
            Arc::new(
                self.env
                    .iter()
                    .fold(stage, |stage, (key, value)| stage.with_env(key, value)),
            )
        };
        let fs = |operation: FsOperation| -> Arc<dyn Stage> { Arc::new(FsStage::new(&self.id, operation)) };

        match &self.action {
            ActionConfig::Shell { script } => command(CommandStage::shell(&self.id, script)),
            ActionConfig::Exec { program, args } => command(CommandStage::exec(&self.id, program, args)),
            ActionConfig::Copy { from, to } => fs(FsOperation::Copy {
                from: from.clone(),
                to: to.clone(),
            }),
            ActionConfig::MoveContents { from, to } => fs(FsOperation::MoveContents {
                from: from.clone(),
                to: to.clone(),
            }),
            ActionConfig::Remove { path } => fs(FsOperation::Remove { path: path.clone() }),
            ActionConfig::Mkdir { path } => fs(FsOperation::Mkdir { path: path.clone() }),
        }
    }

    /// Builds the stage specification.
    #[must_use]
    pub fn to_spec(&self) -> StageSpec {
        let spec = StageSpec::new(&self.id, self.runner()).with_dependencies(&self.depends_on);
        match self.timeout_secs {
            Some(secs) => spec.with_timeout(Duration::from_secs(secs)),
            None => spec,
        }
    }
}

impl ShipyardConfig {
    /// Top-level keys that are not part of the schema, usually typos.
    pub fn unknown_keys(&self) -> impl Iterator<Item = &str> {
        self.unknown.keys().map(String::as_str)
    }

    /// Checks values the type system cannot.
    ///
    /// # Errors
    ///
    /// Returns `Invalid` for an empty stage id, a zero timeout or an
    /// artifact path that is absolute or leaves the workspace.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.pipeline.name.trim().is_empty() {
            return Err(ConfigurationError::Invalid("pipeline.name is empty".to_string()));
        }
        let artifact = Path::new(&self.pipeline.artifact);
        let contained = artifact
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if self.pipeline.artifact.trim().is_empty() || !contained {
            return Err(ConfigurationError::Invalid(format!(
                "pipeline.artifact '{}' must be a relative path inside the workspace",
                self.pipeline.artifact
            )));
        }
        if self.pipeline.timeout_secs == Some(0) {
            return Err(ConfigurationError::Invalid(
                "pipeline.timeout_secs must be greater than zero".to_string(),
            ));
        }
        for stage in &self.stages {
            if stage.id.trim().is_empty() {
                return Err(ConfigurationError::Invalid("a stage has an empty id".to_string()));
            }
            if stage.timeout_secs == Some(0) {
                return Err(ConfigurationError::Invalid(format!(
                    "stage '{}' timeout_secs must be greater than zero",
                    stage.id
                )));
            }
        }
        Ok(())
    }

    /// Returns a builder holding every configured stage.
    #[must_use]
    pub fn pipeline_builder(&self) -> PipelineBuilder {
        let mut builder = PipelineBuilder::new(&self.pipeline.name);
        for stage in &self.stages {
            builder.add_stage_spec(stage.to_spec());
        }
        builder
    }

    /// Returns the executor settings.
    #[must_use]
    pub fn executor_config(&self) -> ExecutorConfig {
        let mut config = ExecutorConfig::default();
        if let Some(concurrency) = self.pipeline.concurrency {
            config = config.with_concurrency(concurrency);
        }
        if let Some(secs) = self.pipeline.timeout_secs {
            config = config.with_timeout(Duration::from_secs(secs));
        }
        config
    }

    /// Returns the workspace root, resolved against the source directory.
    #[must_use]
    pub fn workspace_root(&self) -> PathBuf {
        self.source_dir.join(&self.pipeline.workspace_root)
    }
}
