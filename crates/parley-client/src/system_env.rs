//! Production Environment implementation using system time.
//!
//! `SystemEnv` backs the engine with `std::time::Instant` and tokio sleeps.
//! Behavior is non-deterministic in timing; tests that need control over the
//! reconciler window use `parley_core::env::ManualEnv` instead.

use std::time::Duration;

use parley_core::Environment;

/// Production environment using the monotonic system clock.
///
/// Uses `std::time::Instant::now()` for time and `tokio::time::sleep()` for
/// async sleeping.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }
}
