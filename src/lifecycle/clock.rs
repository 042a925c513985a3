//! Time source for the polling loops.

use std::time::Duration;

use async_trait::async_trait;

#[async_trait]
/// Monotonic clock plus the ability to wait on it.
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock's origin.
    fn now(&self) -> Duration;

    /// Suspends the caller for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Real time via `tokio::time`.
pub struct TokioClock {
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(any(test, feature = "mock"))]
pub use manual::ManualClock;

#[cfg(any(test, feature = "mock"))]
mod manual {
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use super::Clock;

    #[derive(Debug, Default)]
    struct ManualState {
        elapsed: Duration,
        sleeps: Vec<Duration>,
    }

    /// Virtual clock: `sleep` returns at once and advances time by the requested duration
    /// plus a fixed drift.
    #[derive(Debug, Default)]
    pub struct ManualClock {
        drift: Duration,
        state: Mutex<ManualState>,
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self::default()
        }

        /// Every sleep overshoots by `drift`.
        pub fn with_drift(drift: Duration) -> Self {
            Self {
                drift,
                state: Mutex::default(),
            }
        }

        /// Moves time forward without a sleep.
        pub fn advance(&self, by: Duration) {
            self.state.lock().elapsed += by;
        }

        pub fn sleep_count(&self) -> usize {
            self.state.lock().sleeps.len()
        }

        /// Requested durations, in order.
        pub fn sleeps(&self) -> Vec<Duration> {
            self.state.lock().sleeps.clone()
        }
    }

    #[async_trait]
    impl Clock for ManualClock {
        fn now(&self) -> Duration {
            self.state.lock().elapsed
        }

        async fn sleep(&self, duration: Duration) {
            {
                let mut state = self.state.lock();
                state.elapsed += duration + self.drift;
                state.sleeps.push(duration);
            }
            tokio::task::yield_now().await;
        }
    }
}
