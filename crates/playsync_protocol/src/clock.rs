//! Time sources.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A source of wall-clock and monotonic time.
///
/// Wall-clock time stamps messages on the wire. Monotonic time drives timers
/// (suppression windows, drift ticks, reconnect delays) so they are immune to
/// wall-clock adjustments.
pub trait Clock: Send + Sync {
    /// Milliseconds since the unix epoch.
    fn unix_millis(&self) -> u64;

    /// Monotonic time since the clock was created.
    fn elapsed(&self) -> Duration;
}

/// The system clock.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Creates a system clock whose monotonic origin is now.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn unix_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// A manually advanced clock for deterministic tests.
///
/// Clones share the same timeline, so a test can hand one clone to the code
/// under test and advance another.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualTime>>,
}

#[derive(Debug)]
struct ManualTime {
    unix_millis: u64,
    elapsed: Duration,
}

impl ManualClock {
    /// Creates a clock starting at the given unix time.
    pub fn new(start_unix_millis: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualTime {
                unix_millis: start_unix_millis,
                elapsed: Duration::ZERO,
            })),
        }
    }

    /// Advances both timelines.
    pub fn advance(&self, by: Duration) {
        let mut time = self.inner.lock();
        time.unix_millis += by.as_millis() as u64;
        time.elapsed += by;
    }

    /// Shifts only the wall clock, simulating skew between hosts.
    pub fn skew_wall(&self, millis: i64) {
        let mut time = self.inner.lock();
        time.unix_millis = time.unix_millis.saturating_add_signed(millis);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(1_700_000_000_000)
    }
}

impl Clock for ManualClock {
    fn unix_millis(&self) -> u64 {
        self.inner.lock().unix_millis
    }

    fn elapsed(&self) -> Duration {
        self.inner.lock().elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_shares_timeline() {
        let clock = ManualClock::new(1_000);
        let view = clock.clone();

        clock.advance(Duration::from_millis(250));
        assert_eq!(view.unix_millis(), 1_250);
        assert_eq!(view.elapsed(), Duration::from_millis(250));

        clock.skew_wall(-50);
        assert_eq!(view.unix_millis(), 1_200);
        assert_eq!(view.elapsed(), Duration::from_millis(250));
    }

    #[test]
    fn system_clock_is_monotonic() {
        let clock = SystemClock::new();
        let a = clock.elapsed();
        let b = clock.elapsed();
        assert!(b >= a);
        assert!(clock.unix_millis() > 1_600_000_000_000);
    }
}
