//! # Shipyard
//!
//! A declarative, idempotent build and release pipeline executor.
//!
//! A release is described once in `shipyard.toml`: named stages with
//! dependency edges, and the environments an artifact can be shipped to.
//! Shipyard provides:
//!
//! - **Stage graphs**: duplicate ids, unknown dependencies and cycles are
//!   rejected before anything runs
//! - **Concurrent execution**: ready stages run in parallel up to a limit; a
//!   failed stage skips its dependents while independent branches continue
//! - **Workspaces**: every run gets a fresh directory, removed on success and
//!   kept for inspection on failure
//! - **Verified shipping**: artifacts are uploaded next to their final name,
//!   checked by size and SHA-256, then renamed into place
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use shipyard::prelude::*;
//!
//! let graph = PipelineBuilder::new("release")
//!     .stage("export", Arc::new(CommandStage::shell("export", "git archive HEAD | tar xf -")), &[])
//!     .stage("install", Arc::new(CommandStage::exec("install", "composer", ["install", "-o"])), &["export"])
//!     .stage("package", Arc::new(CommandStage::shell("package", "tar -zcf build.tar.gz *")), &["install"])
//!     .build()?;
//!
//! let result = PipelineExecutor::default().execute(&graph, Arc::new(ctx)).await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod context;
pub mod core;
pub mod deploy;
pub mod errors;
pub mod events;
pub mod observability;
pub mod pipeline;
pub mod release;
pub mod ship;
pub mod stages;
pub mod testing;
pub mod workspace;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{ShipyardConfig, StageConfig};
    pub use crate::context::{PipelineContext, RunIdentity, StageContext};
    pub use crate::core::{RunResult, RunStatus, StageOutcome, StageOutput, StageStatus};
    pub use crate::deploy::{DeployConfig, DeployTarget, DeployTargetRegistry};
    pub use crate::errors::{
        ConfigurationError, CycleDetectedError, ExecutionError, ResourceError, ShipyardError,
        TransferError,
    };
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::pipeline::{ExecutorConfig, PipelineBuilder, PipelineExecutor, StageGraph, StageSpec};
    pub use crate::release::{Release, ReleaseReport};
    pub use crate::ship::{ArtifactShipper, ShipmentReceipt};
    pub use crate::stages::{CommandStage, FnStage, FsOperation, FsStage, Stage};
    pub use crate::workspace::{RetentionPolicy, WorkspaceDisposition, WorkspaceManager};
    pub use std::sync::Arc;
}
