//! Shipyard - declarative build and release pipelines
//!
//! Usage:
//!   shipyard run [--env NAME]     # Build in a fresh workspace and ship
//!   shipyard plan                 # Validate the stage graph
//!   shipyard targets              # List deploy environments
//!   shipyard ship <ARTIFACT>      # Ship an existing artifact
//!   shipyard init                 # Write a starter shipyard.toml
//!
//! Exit codes: 0 success, 1 stage or transfer failure, 2 configuration error.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use shipyard::config::{self, ShipyardConfig, DEFAULT_CONFIG_FILE, TEMPLATE};
use shipyard::deploy::DeployTargetRegistry;
use shipyard::errors::{ConfigurationError, ShipyardError};
use shipyard::events::LoggingEventSink;
use shipyard::observability::{init_tracing, LogFormat};
use shipyard::release::{transport_for, Release, ReleaseReport};
use shipyard::ship::ArtifactShipper;
use shipyard::workspace::{RetentionPolicy, WorkspaceDisposition};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Parser, Debug)]
#[command(name = "shipyard")]
#[command(version, about = "Declarative build and release pipelines", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, short, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log line format
    #[arg(long, global = true, value_enum, default_value_t = LogFormatArg::Text)]
    log_format: LogFormatArg,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the pipeline and ship the artifact
    Run {
        /// Deploy environment (defaults to `default_env`)
        #[arg(long, short)]
        env: Option<String>,

        /// Maximum number of stages running at once
        #[arg(long)]
        concurrency: Option<usize>,

        /// Cancel the run after this many seconds
        #[arg(long, value_name = "SECS")]
        timeout: Option<u64>,

        /// Build only, do not ship
        #[arg(long)]
        no_ship: bool,

        /// Keep the workspace even if the run succeeds
        #[arg(long)]
        keep_workspace: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate the stage graph and print the execution order
    Plan,

    /// List deploy environments
    Targets,

    /// Ship an existing artifact, e.g. after a failed transfer
    Ship {
        /// Artifact to ship
        artifact: PathBuf,

        /// Deploy environment (defaults to `default_env`)
        #[arg(long, short)]
        env: Option<String>,
    },

    /// Write a starter configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long, short)]
        force: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormatArg {
    /// Human-readable lines
    Text,
    /// One JSON object per line
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => Self::Text,
            LogFormatArg::Json => Self::Json,
        }
    }
}

const fn log_level(verbose: u8) -> tracing::Level {
    match verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format.into(), log_level(cli.verbose));

    match run_cli(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            if let Some(hint) = fix_hint(&err) {
                eprintln!("hint: {hint}");
            }
            ExitCode::from(exit_code_for(&err))
        }
    }
}

async fn run_cli(cli: Cli) -> Result<u8> {
    match cli.command {
        Commands::Run {
            env,
            concurrency,
            timeout,
            no_ship,
            keep_workspace,
            json,
        } => {
            let config = load_config(&cli.config)?;
            let mut executor = config.executor_config();
            if let Some(concurrency) = concurrency {
                executor = executor.with_concurrency(concurrency);
            }
            if let Some(secs) = timeout {
                executor = executor.with_timeout(Duration::from_secs(secs));
            }
            let mut release = Release::new(config)
                .with_env(env)
                .with_shipping(!no_ship)
                .with_executor_config(executor)
                .with_event_sink(Arc::new(LoggingEventSink::debug()));
            if keep_workspace {
                release = release.with_retention(RetentionPolicy::Always);
            }

            let token = Arc::clone(release.cancel_token());
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, cancelling run");
                    token.cancel("interrupted by user");
                }
            });

            let report = release.run().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print_report(&report);
            }
            Ok(report_exit_code(&report))
        }

        Commands::Plan => {
            let config = load_config(&cli.config)?;
            let graph = config.pipeline_builder().build().map_err(ShipyardError::from)?;
            println!("Pipeline '{}': {} stages", graph.name(), graph.stage_count());
            for (i, id) in graph.execution_order().into_iter().enumerate() {
                let deps = graph.dependencies_of(id);
                if deps.is_empty() {
                    println!("  {:>2}. {id}", i + 1);
                } else {
                    println!("  {:>2}. {id}  (after {})", i + 1, deps.join(", "));
                }
            }
            Ok(0)
        }

        Commands::Targets => {
            let config = load_config(&cli.config)?;
            let registry = DeployTargetRegistry::from_config(&config.deploy).map_err(ShipyardError::from)?;
            if registry.is_empty() {
                println!("No environments configured");
            }
            for target in registry.targets() {
                let marker = if registry.default_env() == Some(target.id.as_str()) { "*" } else { " " };
                println!("{marker} {:<12} {target}  [{}]", target.id, target.auth);
            }
            Ok(0)
        }

        Commands::Ship { artifact, env } => {
            let config = load_config(&cli.config)?;
            let registry = DeployTargetRegistry::from_config(&config.deploy).map_err(ShipyardError::from)?;
            let target = registry
                .resolve_or_default(env.as_deref())
                .map_err(ShipyardError::from)?;

            let receipt = ArtifactShipper::new(transport_for(target))
                .with_event_sink(Arc::new(LoggingEventSink::debug()))
                .ship(&artifact, target)
                .await
                .map_err(ShipyardError::from)?;
            println!(
                "Shipped {} to {} ({} bytes, sha256 {})",
                artifact.display(),
                receipt.remote_path,
                receipt.size,
                receipt.sha256
            );
            Ok(0)
        }

        Commands::Init { force } => {
            write_template(&cli.config, force)?;
            println!("Wrote {}", cli.config.display());
            Ok(0)
        }
    }
}

fn load_config(path: &Path) -> Result<ShipyardConfig> {
    let config = config::load(path).map_err(ShipyardError::from)?;
    debug!(path = %path.display(), pipeline = %config.pipeline.name, "Configuration loaded");
    Ok(config)
}

fn write_template(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    std::fs::write(path, TEMPLATE).with_context(|| format!("Failed to write {}", path.display()))
}

fn print_report(report: &ReleaseReport) {
    println!("{}", report.run);
    if let Some(receipt) = &report.shipment {
        println!(
            "Shipped to {} at {} ({} bytes, sha256 {})",
            receipt.target, receipt.remote_path, receipt.size, receipt.sha256
        );
    } else if let Some(error) = &report.transfer_error {
        println!("Shipping failed: {error}");
    } else if let Some(target) = &report.target {
        println!("Not shipped to {target}");
    }
    if let Some(error) = &report.cleanup_error {
        println!("Workspace cleanup failed: {error}");
    }
    if let WorkspaceDisposition::Retained(path) = &report.workspace {
        println!("Workspace kept at {}", path.display());
    }
}

fn report_exit_code(report: &ReleaseReport) -> u8 {
    u8::try_from(report.exit_code()).unwrap_or(1)
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    let code = if let Some(e) = err.downcast_ref::<ShipyardError>() {
        e.exit_code()
    } else if err.downcast_ref::<ConfigurationError>().is_some() {
        2
    } else {
        1
    };
    u8::try_from(code).unwrap_or(1)
}

fn fix_hint(err: &anyhow::Error) -> Option<String> {
    err.downcast_ref::<ShipyardError>()
        .and_then(ShipyardError::error_info)
        .and_then(|info| info.fix_hint.clone())
}
