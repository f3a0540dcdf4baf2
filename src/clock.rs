//! Clock Abstraction
//!
//! Every timestamp the pipeline records (receipt time, last flush,
//! connection uptime, aggregation `last_update`) is read through this
//! trait so tests can drive time explicitly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Clock trait for wall-clock reads in epoch milliseconds
///
/// Implementations:
/// - `SystemClock`: Uses real system time
/// - `ManualClock`: Time only moves when a test moves it
pub trait Clock: Send + Sync + 'static {
    /// Current time in milliseconds since the Unix epoch
    fn now_ms(&self) -> u64;

    /// Milliseconds elapsed since an earlier reading
    fn elapsed_ms(&self, since_ms: u64) -> u64 {
        self.now_ms().saturating_sub(since_ms)
    }
}

/// Production clock using real system time
///
/// Anchored once at construction; later reads add monotonic elapsed time
/// so a wall-clock step backwards never produces a decreasing timestamp.
#[derive(Debug, Clone)]
pub struct SystemClock {
    start: Instant,
    start_millis: u64,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemClock {
    pub fn new() -> Self {
        let start_millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        SystemClock {
            start: Instant::now(),
            start_millis,
        }
    }

    /// Shared handle, the form every service takes
    pub fn shared() -> Arc<dyn Clock> {
        Arc::new(Self::new())
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        let elapsed = self.start.elapsed().as_millis() as u64;
        self.start_millis.saturating_add(elapsed)
    }
}

/// Manually advanced clock for deterministic testing
#[derive(Debug, Clone)]
pub struct ManualClock {
    time_ms: Arc<AtomicU64>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ManualClock {
    /// Create a new clock starting at the given time
    pub fn new(start_ms: u64) -> Self {
        ManualClock {
            time_ms: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    /// Advance time by a duration
    pub fn advance(&self, duration: Duration) {
        self.time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    /// Set time to a specific value
    pub fn set(&self, time_ms: u64) {
        self.time_ms.store(time_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.time_ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_clock_monotonic() {
        let clock = SystemClock::new();
        let t1 = clock.now_ms();
        let t2 = clock.now_ms();
        assert!(t2 >= t1);
        assert!(t1 > 1_600_000_000_000, "expected an epoch-based reading");
    }

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new(1000);
        assert_eq!(clock.now_ms(), 1000);

        clock.advance(Duration::from_millis(500));
        assert_eq!(clock.now_ms(), 1500);
        assert_eq!(clock.elapsed_ms(1000), 500);

        clock.set(200);
        assert_eq!(clock.elapsed_ms(1000), 0);
    }

    #[test]
    fn test_manual_clock_shared_between_clones() {
        let clock1 = ManualClock::new(0);
        let clock2 = clock1.clone();

        clock1.advance(Duration::from_millis(100));
        assert_eq!(clock2.now_ms(), 100);
    }
}
