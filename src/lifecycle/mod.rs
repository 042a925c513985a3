//! Spot-instance provisioning lifecycle: bounded waits, readiness, and compensating cleanup.

/// Time source for the polling loops.
pub mod clock;
/// Coordinator configuration.
pub mod config;
/// The lifecycle coordinator.
pub mod coordinator;
/// Provisioning error types.
pub mod error;
/// Progress sinks.
pub mod progress;
/// Instance handle and wait stages.
pub mod types;

#[cfg(test)]
mod tests;

#[cfg(any(test, feature = "mock"))]
pub use clock::ManualClock;
pub use clock::{Clock, TokioClock};
pub use config::{
    CoordinatorConfig, DEFAULT_POLL_INTERVAL, DEFAULT_POLL_TIMEOUT, PROGRESS_EVERY_POLLS,
};
pub use coordinator::LifecycleCoordinator;
pub use error::{CleanupAction, CleanupFailure, ProvisionError, ProvisionResult};
#[cfg(any(test, feature = "mock"))]
pub use progress::RecordingProgress;
pub use progress::{ConsoleProgress, ProgressEvent, ProgressSink, TracingProgress};
pub use types::{InstanceHandle, WaitStage};
