//! Configuration error types.

use thiserror::Error;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A numeric setting could not be parsed.
    #[error("failed to parse {name}='{value}': {source}")]
    InvalidNumber {
        name: &'static str,
        value: String,
        #[source]
        source: std::num::ParseIntError,
    },

    /// A boolean setting was not one of the accepted spellings.
    #[error("invalid boolean for {name}: '{value}'")]
    InvalidBool { name: &'static str, value: String },

    /// Provider name not recognised.
    #[error("unknown provider '{value}' (expected 'aws' or 'simulated')")]
    UnknownProvider { value: String },

    /// Bid price is not a positive decimal.
    #[error("invalid bid price '{value}': must be a positive decimal")]
    InvalidPrice { value: String },

    /// A bid must ask for at least one instance.
    #[error("instance count must be at least 1")]
    ZeroInstanceCount,

    /// Polling without a pause would spin against the provider's rate limits.
    #[error("poll interval must be greater than zero")]
    ZeroPollInterval,

    /// A required setting was blank.
    #[error("{name} must not be empty")]
    Empty { name: &'static str },
}
