//! Provisioning client boundary: the remote spot market and its implementations.

pub mod aws;
pub mod client;
pub mod error;
/// Factory helpers.
pub mod factory;
#[cfg(any(test, feature = "mock"))]
pub mod mock;
pub mod simulated;
pub mod types;

pub use aws::{AwsCliProvider, DRY_RUN_REQUEST_ID};
pub use client::SpotProvider;
pub use error::{ProviderError, ProviderResult};
pub use factory::build_provider;
#[cfg(any(test, feature = "mock"))]
pub use mock::{MockProvider, ProviderCall};
pub use simulated::{SimulatedProvider, SimulationProfile};
pub use types::{
    BidRequest, BidStatus, InstanceDescription, InstanceState, LaunchSpec, VolumeSpec,
};
