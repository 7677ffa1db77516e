//! Bounded ring buffers for rolling windows
//!
//! `RingBuffer` is a fixed-capacity FIFO over timestamped items; `append` is
//! O(1) and discards the oldest entry when full. `PercentileTracker` keeps up
//! to 10 000 numeric samples and computes exact linear-interpolated
//! percentiles, which is fine at O(N log N) because it only runs on the slow
//! cycle.

use std::collections::VecDeque;

/// Minimum retained samples before percentiles are defined
const MIN_PERCENTILE_SAMPLES: usize = 20;

/// Default sample capacity for the percentile tracker
pub const PERCENTILE_CAPACITY: usize = 10_000;

/// Items stored in a `RingBuffer` expose their timestamp (epoch millis)
pub trait Timestamped {
    fn ts_ms(&self) -> i64;
}

/// Fixed-capacity FIFO over timestamped items
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Timestamped> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring buffer capacity must be positive");
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append an item, discarding the oldest when at capacity
    pub fn append(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    /// Items with timestamp >= `since_ms`, oldest first
    pub fn filter_since(&self, since_ms: i64) -> impl Iterator<Item = &T> {
        // Items arrive in near-monotonic timestamp order; partition from the
        // back rather than scanning the whole window.
        let start = self.items.partition_point(|item| item.ts_ms() < since_ms);
        self.items.iter().skip(start)
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last(&self) -> Option<&T> {
        self.items.back()
    }
}

/// Rolling sample window with exact percentile queries
///
/// Returns `None` from `p95`/`p10` until at least 20 samples are retained.
#[derive(Debug, Clone)]
pub struct PercentileTracker {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl PercentileTracker {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "percentile tracker capacity must be positive");
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Record a sample; non-finite values are ignored
    pub fn record(&mut self, sample: f64) {
        if !sample.is_finite() {
            return;
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// 95th percentile, linear interpolation
    pub fn p95(&self) -> Option<f64> {
        self.percentile(0.95)
    }

    /// 10th percentile, linear interpolation
    pub fn p10(&self) -> Option<f64> {
        self.percentile(0.10)
    }

    /// Exact percentile over the retained window
    ///
    /// Rank `q * (n - 1)` with linear interpolation between the neighbouring
    /// order statistics.
    pub fn percentile(&self, q: f64) -> Option<f64> {
        if self.samples.len() < MIN_PERCENTILE_SAMPLES {
            return None;
        }
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let rank = q * (sorted.len() - 1) as f64;
        let lo = rank.floor() as usize;
        let hi = rank.ceil() as usize;
        if lo == hi {
            return Some(sorted[lo]);
        }
        let weight = rank - lo as f64;
        Some(sorted[lo] * (1.0 - weight) + sorted[hi] * weight)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Stamp(i64);

    impl Timestamped for Stamp {
        fn ts_ms(&self) -> i64 {
            self.0
        }
    }

    #[test]
    fn test_append_discards_oldest_when_full() {
        let mut ring = RingBuffer::new(3);
        for ts in [1, 2, 3, 4] {
            ring.append(Stamp(ts));
        }
        let remaining: Vec<i64> = ring.iter().map(|s| s.0).collect();
        assert_eq!(remaining, vec![2, 3, 4]);
        assert_eq!(ring.len(), 3);
    }

    #[test]
    fn test_filter_since_inclusive() {
        let mut ring = RingBuffer::new(10);
        for ts in [100, 200, 300, 400] {
            ring.append(Stamp(ts));
        }
        let hits: Vec<i64> = ring.filter_since(200).map(|s| s.0).collect();
        assert_eq!(hits, vec![200, 300, 400]);
        assert_eq!(ring.filter_since(500).count(), 0);
    }

    #[test]
    fn test_percentiles_undefined_below_twenty_samples() {
        let mut tracker = PercentileTracker::new(100);
        for i in 0..19 {
            tracker.record(i as f64);
        }
        assert_eq!(tracker.p95(), None);
        assert_eq!(tracker.p10(), None);

        tracker.record(19.0);
        assert!(tracker.p95().is_some());
    }

    #[test]
    fn test_percentiles_match_linear_interpolation_at_twenty() {
        let mut tracker = PercentileTracker::new(100);
        // Samples 1..=20: p95 rank = 0.95 * 19 = 18.05 → 19 + 0.05 * (20 - 19)
        for i in 1..=20 {
            tracker.record(i as f64);
        }
        let p95 = tracker.p95().unwrap();
        assert!((p95 - 19.05).abs() < 1e-9, "p95 was {p95}");

        // p10 rank = 0.10 * 19 = 1.9 → 2 + 0.9 * (3 - 2)
        let p10 = tracker.p10().unwrap();
        assert!((p10 - 2.9).abs() < 1e-9, "p10 was {p10}");
    }

    #[test]
    fn test_tracker_bounded() {
        let mut tracker = PercentileTracker::new(50);
        for i in 0..500 {
            tracker.record(i as f64);
        }
        assert_eq!(tracker.len(), 50);
        // Oldest samples were discarded, so the window is 450..500.
        assert!(tracker.p10().unwrap() >= 450.0);
    }

    #[test]
    fn test_non_finite_samples_ignored() {
        let mut tracker = PercentileTracker::new(100);
        tracker.record(f64::NAN);
        tracker.record(f64::INFINITY);
        assert!(tracker.is_empty());
    }
}
