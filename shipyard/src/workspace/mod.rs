//! Ephemeral per-run workspace directories.
//!
//! Every run gets a fresh, empty, uniquely named directory under the
//! workspace root. It is removed once the run is over unless the retention
//! policy keeps it for inspection.

mod manager;
mod retention;

pub use manager::{Workspace, WorkspaceManager, MAX_CREATE_ATTEMPTS};
pub use retention::{RetentionPolicy, WorkspaceDisposition};
