//! Reading `shipyard.toml`.

use super::env::{expand_value, process_env};
use super::ShipyardConfig;
use crate::errors::ConfigurationError;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Loads a configuration file, expanding variables from the process environment.
///
/// # Errors
///
/// Returns `Parse` if the file cannot be read or is not valid TOML for the
/// schema, and `Invalid` if a value fails validation.
pub fn load(path: &Path) -> Result<ShipyardConfig, ConfigurationError> {
    load_with(path, &process_env)
}

/// Loads a configuration file with an explicit variable lookup.
///
/// # Errors
///
/// See [`load`].
pub fn load_with(
    path: &Path,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<ShipyardConfig, ConfigurationError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigurationError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let source_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    let config = parse_str(&content, &source_dir, lookup).map_err(|err| match err {
        ConfigurationError::Parse { message, .. } => ConfigurationError::Parse {
            path: path.to_path_buf(),
            message,
        },
        other => other,
    })?;
    debug!(
        path = %path.display(),
        stages = config.stages.len(),
        environments = config.deploy.environments.len(),
        "Loaded configuration"
    );
    Ok(config)
}

/// Parses configuration text.
///
/// Relative paths in the configuration resolve against `source_dir`.
///
/// # Errors
///
/// See [`load`].
pub fn parse_str(
    content: &str,
    source_dir: &Path,
    lookup: &dyn Fn(&str) -> Option<String>,
) -> Result<ShipyardConfig, ConfigurationError> {
    let parse_error = |error: &toml::de::Error| ConfigurationError::Parse {
        path: source_dir.to_path_buf(),
        message: enhance_toml_error(error, content),
    };

    let mut value: toml::Value = toml::from_str(content).map_err(|e| parse_error(&e))?;
    expand_value(&mut value, lookup);

    let mut config: ShipyardConfig = value.try_into().map_err(|e| parse_error(&e))?;
    config.source_dir = source_dir.to_path_buf();
    for key in config.unknown_keys() {
        warn!(key, "Ignoring unknown top-level configuration key");
    }

    let home = lookup("HOME");
    for env in config.deploy.environments.values_mut() {
        if let (Some(path), Some(home)) = (env.identity_file.as_mut(), home.as_deref()) {
            let expanded = path.strip_prefix("~").ok().map(|rest| Path::new(home).join(rest));
            if let Some(expanded) = expanded {
                *path = expanded;
            }
        }
    }

    config.validate()?;
    Ok(config)
}

fn enhance_toml_error(error: &toml::de::Error, content: &str) -> String {
    let message = error.message().trim().to_string();
    match error.span() {
        Some(span) => {
            let line_num = content[..span.start.min(content.len())].matches('\n').count() + 1;
            format!(
                "TOML parsing error at line {line_num}:\n{}\n\nError: {message}",
                get_line_context(content, line_num)
            )
        }
        None => message,
    }
}

/// Lines around `line_num`, with the offending one marked.
fn get_line_context(content: &str, line_num: usize) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let start = line_num.saturating_sub(2);
    let end = (line_num + 1).min(lines.len());

    lines
        .get(start..end)
        .unwrap_or_default()
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let num = start + i + 1;
            let marker = if num == line_num { ">>>" } else { "   " };
            format!("{marker} {num:4} | {line}")
        })
        .collect::<Vec<_>>()
        .join("\n")
}
