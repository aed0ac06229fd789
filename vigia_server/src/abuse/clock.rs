//! Time sources for the abuse stores
//!
//! Every store reads time through [`Clock`] so window arithmetic can be driven
//! deterministically in tests with [`MockClock`].

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Monotonic time source
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    /// Wall-clock seconds since the Unix epoch
    fn unix_now(&self) -> u64;
}

/// Shared clock handle
pub type SharedClock = Arc<dyn Clock>;

/// System clock backed by `Instant::now()`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Clock whose time only moves when told to
///
/// Clones share the same underlying time.
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct MockClock {
    state: Arc<std::sync::Mutex<(Instant, u64)>>,
}

#[cfg(test)]
impl MockClock {
    pub fn new() -> Self {
        Self {
            state: Arc::new(std::sync::Mutex::new((Instant::now(), 1_700_000_000))),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut state = self.state.lock().expect("MockClock mutex poisoned");
        state.0 += duration;
        state.1 += duration.as_secs();
    }

    pub fn shared(&self) -> SharedClock {
        Arc::new(self.clone())
    }
}

#[cfg(test)]
impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.state.lock().expect("MockClock mutex poisoned").0
    }

    fn unix_now(&self) -> u64 {
        self.state.lock().expect("MockClock mutex poisoned").1
    }
}

/// True when `timestamp` is inside the trailing `window` ending at `now`
pub fn within(now: Instant, timestamp: Instant, window: Duration) -> bool {
    now.saturating_duration_since(timestamp) < window
}
