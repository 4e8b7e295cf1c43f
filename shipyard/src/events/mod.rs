//! Event sink system for observability.
//!
//! Sinks are handed to the components that emit events; there is no global
//! sink.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event type names emitted by shipyard.
pub mod kinds {
    /// A run started executing stages.
    pub const RUN_STARTED: &str = "run.started";
    /// A run was cancelled by the user or by its timeout.
    pub const RUN_CANCELLED: &str = "run.cancelled";
    /// A run finished.
    pub const RUN_COMPLETED: &str = "run.completed";
    /// A stage action started.
    pub const STAGE_STARTED: &str = "stage.started";
    /// A stage action succeeded.
    pub const STAGE_SUCCEEDED: &str = "stage.succeeded";
    /// A stage action failed.
    pub const STAGE_FAILED: &str = "stage.failed";
    /// A stage was skipped without running.
    pub const STAGE_SKIPPED: &str = "stage.skipped";
    /// A workspace directory was created.
    pub const WORKSPACE_CREATED: &str = "workspace.created";
    /// A workspace directory was removed.
    pub const WORKSPACE_REMOVED: &str = "workspace.removed";
    /// A workspace directory was kept for inspection.
    pub const WORKSPACE_RETAINED: &str = "workspace.retained";
    /// An artifact shipment started.
    pub const SHIP_STARTED: &str = "ship.started";
    /// An artifact shipment completed and verified.
    pub const SHIP_COMPLETED: &str = "ship.completed";
    /// An artifact shipment failed.
    pub const SHIP_FAILED: &str = "ship.failed";
}
