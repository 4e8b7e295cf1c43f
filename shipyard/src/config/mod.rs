//! Configuration loading.
//!
//! A single `shipyard.toml` describes the pipeline, its stages and the
//! deploy environments. It is read once, `${VAR}` references are expanded
//! from an injected environment lookup, and the resulting
//! [`ShipyardConfig`] is passed explicitly to the components that need it.

mod env;
mod parser;
mod schema;
mod template;

pub use env::{expand_vars, process_env};
pub use parser::{load, load_with, parse_str};
pub use schema::{ActionConfig, PipelineSettings, ShipyardConfig, StageConfig};
pub use template::{DEFAULT_CONFIG_FILE, TEMPLATE};
