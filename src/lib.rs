//! Spotwait library crate (used by the binary and integration tests).
//!
//! Provisions one transient spot instance: submit a bid, wait for the provider to assign an
//! instance, wait for it to run with a public address, and hand it to the caller. Failures
//! after submission trigger a best-effort cleanup of the bid and any instance it produced.
//!
//! ## Modules
//! - [`provider`] - the remote spot market ([`SpotProvider`] and implementations)
//! - [`lifecycle`] - [`LifecycleCoordinator`], its config, errors, clock and progress sinks
//! - [`config`] - environment-backed settings for the binary
//!
//! ## Test/Mock Support
//! [`provider::MockProvider`], [`lifecycle::ManualClock`] and
//! [`lifecycle::RecordingProgress`] are available behind `#[cfg(any(test, feature = "mock"))]`.

pub mod config;
pub mod lifecycle;
pub mod provider;

pub use config::{Config, ConfigError, ProviderKind};
pub use lifecycle::{
    CleanupAction, CleanupFailure, Clock, ConsoleProgress, CoordinatorConfig, InstanceHandle,
    LifecycleCoordinator, ProgressEvent, ProgressSink, ProvisionError, ProvisionResult,
    TokioClock, TracingProgress, WaitStage,
};
pub use provider::{
    AwsCliProvider, BidRequest, BidStatus, InstanceDescription, InstanceState, LaunchSpec,
    ProviderError, ProviderResult, SimulatedProvider, SimulationProfile, SpotProvider,
    VolumeSpec, build_provider,
};
