use std::env;
use std::time::Duration;

use crate::config::ConfigError;

/// Default poll budget per wait.
pub const DEFAULT_POLL_TIMEOUT: u32 = 300;
/// Default pause between polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Progress is reported on every Nth poll.
pub const PROGRESS_EVERY_POLLS: u32 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Settings bound at construction time for a [`LifecycleCoordinator`](super::LifecycleCoordinator).
///
/// There is no `Default`: dry-run, timeout and verbosity are always chosen explicitly.
pub struct CoordinatorConfig {
    dry_run: bool,
    max_polls: u32,
    poll_interval: Duration,
    verbose: bool,
}

impl CoordinatorConfig {
    const ENV_DRY_RUN: &'static str = "SPOTWAIT_DRY_RUN";
    const ENV_POLL_TIMEOUT: &'static str = "SPOTWAIT_POLL_TIMEOUT";
    const ENV_POLL_INTERVAL_MS: &'static str = "SPOTWAIT_POLL_INTERVAL_MS";
    const ENV_VERBOSE: &'static str = "SPOTWAIT_VERBOSE";

    /// Creates a config polling once per [`DEFAULT_POLL_INTERVAL`].
    ///
    /// `max_polls == 0` is accepted and makes every wait time out before its first poll.
    pub fn new(dry_run: bool, max_polls: u32, verbose: bool) -> Self {
        Self {
            dry_run,
            max_polls,
            poll_interval: DEFAULT_POLL_INTERVAL,
            verbose,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Loads config from environment variables (with defaults) and validates it.
    pub fn from_env() -> Result<Self, ConfigError> {
        let dry_run = Self::parse_bool_from_env(Self::ENV_DRY_RUN, false)?;
        let max_polls = match env::var(Self::ENV_POLL_TIMEOUT) {
            Ok(value) => value
                .trim()
                .parse()
                .map_err(|e| ConfigError::InvalidNumber {
                    name: Self::ENV_POLL_TIMEOUT,
                    value,
                    source: e,
                })?,
            Err(_) => DEFAULT_POLL_TIMEOUT,
        };
        let poll_interval = match env::var(Self::ENV_POLL_INTERVAL_MS) {
            Ok(value) => Duration::from_millis(value.trim().parse().map_err(|e| {
                ConfigError::InvalidNumber {
                    name: Self::ENV_POLL_INTERVAL_MS,
                    value,
                    source: e,
                }
            })?),
            Err(_) => DEFAULT_POLL_INTERVAL,
        };
        let verbose = Self::parse_bool_from_env(Self::ENV_VERBOSE, false)?;

        let config = Self::new(dry_run, max_polls, verbose).with_poll_interval(poll_interval);
        config.validate()?;
        Ok(config)
    }

    /// Rejects a zero poll interval, which would turn every wait into a busy loop.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ZeroPollInterval);
        }
        Ok(())
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Poll budget per wait.
    pub fn max_polls(&self) -> u32 {
        self.max_polls
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Wall-clock bound per wait: `max_polls * poll_interval`.
    pub fn deadline(&self) -> Duration {
        self.poll_interval.saturating_mul(self.max_polls)
    }

    fn parse_bool_from_env(name: &'static str, default: bool) -> Result<bool, ConfigError> {
        match env::var(name) {
            Ok(value) => match value.trim().to_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => Ok(true),
                "0" | "false" | "no" | "off" | "" => Ok(false),
                _ => Err(ConfigError::InvalidBool { name, value }),
            },
            Err(_) => Ok(default),
        }
    }
}
