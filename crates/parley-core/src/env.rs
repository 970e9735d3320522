//! Environment abstraction for deterministic testing.
//!
//! Decouples the engine from the system clock. Production drivers use real
//! time; tests and simulations advance a [`ManualEnv`] by hand so reconciler
//! windows can be exercised without sleeping.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

/// Abstract environment providing time and async sleeping.
///
/// # Invariants
///
/// - `now()` never goes backwards within one environment
pub trait Environment: Clone + Send + Sync + 'static {
    /// Instant type produced by [`Environment::now`].
    ///
    /// Production environments use `std::time::Instant`.
    type Instant: Copy + Ord + Send + Sync + std::fmt::Debug + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    ///
    /// Only driver code awaits this. The engine itself never suspends.
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;
}

/// Environment whose clock only moves when told to.
///
/// Clones share the same clock. `sleep` advances the clock by the requested
/// duration and completes immediately.
#[derive(Debug, Clone)]
pub struct ManualEnv {
    origin: Instant,
    offset_nanos: Arc<AtomicU64>,
}

impl Default for ManualEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualEnv {
    /// Create an environment anchored at the current instant.
    pub fn new() -> Self {
        Self { origin: Instant::now(), offset_nanos: Arc::new(AtomicU64::new(0)) }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let nanos = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.offset_nanos.fetch_add(nanos, Ordering::SeqCst);
    }

    /// Time elapsed since the environment was created.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.offset_nanos.load(Ordering::SeqCst))
    }
}

impl Environment for ManualEnv {
    type Instant = Instant;

    fn now(&self) -> Self::Instant {
        self.origin + self.elapsed()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        self.advance(duration);
        std::future::ready(())
    }
}
