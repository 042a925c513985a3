//! Progress reporting for the bounded waits.

use std::io::Write;

use tracing::info;

use super::config::PROGRESS_EVERY_POLLS;
use super::types::WaitStage;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Emitted on every [`PROGRESS_EVERY_POLLS`]th poll while verbose.
pub struct ProgressEvent {
    pub stage: WaitStage,
    /// Zero-based index of the poll about to run.
    pub poll: u32,
    /// Bid or instance id being waited on.
    pub target: String,
}

impl ProgressEvent {
    /// Length of the dotted progress line.
    pub fn dots(&self) -> usize {
        (self.poll / PROGRESS_EVERY_POLLS) as usize
    }
}

/// Receives progress while the coordinator waits.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);

    /// Called once when a wait ends, successfully or not.
    fn on_wait_finished(&self, _stage: WaitStage) {}
}

/// Structured `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn on_progress(&self, event: &ProgressEvent) {
        info!(
            stage = %event.stage,
            poll = event.poll,
            target = %event.target,
            "{}",
            event.stage.banner()
        );
    }
}

/// A single rewritten line of dots on stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn on_progress(&self, event: &ProgressEvent) {
        let mut stderr = std::io::stderr().lock();
        let _ = write!(
            stderr,
            "\r{}{}",
            event.stage.banner(),
            ".".repeat(event.dots())
        );
        let _ = stderr.flush();
    }

    fn on_wait_finished(&self, _stage: WaitStage) {
        let _ = writeln!(std::io::stderr());
    }
}

#[cfg(any(test, feature = "mock"))]
/// Collects events for assertions.
#[derive(Debug, Default)]
pub struct RecordingProgress {
    events: parking_lot::Mutex<Vec<ProgressEvent>>,
    finished: parking_lot::Mutex<Vec<WaitStage>>,
}

#[cfg(any(test, feature = "mock"))]
impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    pub fn finished(&self) -> Vec<WaitStage> {
        self.finished.lock().clone()
    }
}

#[cfg(any(test, feature = "mock"))]
impl ProgressSink for RecordingProgress {
    fn on_progress(&self, event: &ProgressEvent) {
        self.events.lock().push(event.clone());
    }

    fn on_wait_finished(&self, stage: WaitStage) {
        self.finished.lock().push(stage);
    }
}
