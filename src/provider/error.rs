use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
/// Errors returned by provisioning client operations.
pub enum ProviderError {
    /// The provider CLI could not be started.
    #[error("failed to spawn {label}: {source}")]
    Spawn {
        /// Operation label.
        label: String,
        #[source]
        source: std::io::Error,
    },

    /// The provider CLI did not finish in time.
    #[error("{label} timed out after {timeout:?}")]
    CommandTimeout {
        /// Operation label.
        label: String,
        /// Per-command bound.
        timeout: Duration,
    },

    /// The provider rejected the call.
    #[error("{label} failed: {message}")]
    CommandFailed {
        /// Operation label.
        label: String,
        /// Provider error output.
        message: String,
    },

    /// The provider answered with something we could not read.
    #[error("unexpected response from {label}: {message}")]
    InvalidResponse {
        /// Operation label.
        label: String,
        /// Parse failure detail.
        message: String,
    },

    /// The identifier is unknown to the provider.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// `"bid request"` or `"instance"`.
        kind: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// Failure produced by a simulated or scripted provider.
    #[error("simulated provider failure: {0}")]
    Simulated(String),
}

pub type ProviderResult<T> = Result<T, ProviderError>;
