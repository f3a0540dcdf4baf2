use std::collections::VecDeque;

/// Most-recent-N sample cache, oldest evicted first
#[derive(Debug, Clone)]
pub struct RollingWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0, "window capacity must be > 0");
        RollingWindow {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
        debug_assert!(self.samples.len() <= self.capacity);
    }

    /// Nearest-rank 95th percentile over the retained samples
    ///
    /// Index is `ceil(n * 0.95) - 1` clamped to `[0, n-1]`; `None` when empty.
    pub fn percentile95(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let n = sorted.len();
        let rank = (n as f64 * 0.95).ceil() as usize;
        let index = rank.saturating_sub(1).min(n - 1);
        Some(sorted[index])
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Retained samples, oldest first
    pub fn samples(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }
}

/// Running statistics for one (producer, metric) key
#[derive(Debug, Clone)]
pub struct AggregationRecord {
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub last: f64,
    pub last_update_ms: u64,
    pub window: RollingWindow,
}

impl AggregationRecord {
    /// Record seeded with its first observation
    pub fn new(value: f64, timestamp_ms: u64, window_capacity: usize) -> Self {
        let mut window = RollingWindow::new(window_capacity);
        window.push(value);
        AggregationRecord {
            count: 1,
            sum: value,
            min: value,
            max: value,
            last: value,
            last_update_ms: timestamp_ms,
            window,
        }
    }

    pub fn observe(&mut self, value: f64, timestamp_ms: u64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.last = value;
        self.last_update_ms = timestamp_ms;
        self.window.push(value);
    }

    /// Always derived, never stored
    pub fn avg(&self) -> f64 {
        self.sum / self.count as f64
    }

    pub fn percentile95(&self) -> Option<f64> {
        self.window.percentile95()
    }

    #[cfg(debug_assertions)]
    pub fn verify_invariants(&self) {
        debug_assert!(self.count > 0, "record with zero count");
        debug_assert!(
            self.min <= self.max,
            "min {} > max {}",
            self.min,
            self.max
        );
        debug_assert!(self.window.len() as u64 <= self.count);
        debug_assert!(self.window.len() <= self.window.capacity());
    }

    #[cfg(not(debug_assertions))]
    #[inline(always)]
    pub fn verify_invariants(&self) {}
}

/// Round to two decimal places for display
pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
