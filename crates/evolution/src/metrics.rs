//! Rolling per-kind performance windows.

use std::collections::{BTreeMap, VecDeque};

use genesis_core::{CycleOutcome, ExecutorKind};
use serde::{Deserialize, Serialize};

/// Last N task results of one kind.
#[derive(Debug, Clone)]
pub struct PerformanceWindow {
    samples: VecDeque<bool>,
    capacity: usize,
}

impl PerformanceWindow {
    /// Empty window holding at most `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Add one result, evicting the oldest when full.
    pub fn record(&mut self, success: bool) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(success);
    }

    /// Number of samples held.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True if no samples are held.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Fraction of successes, `None` when empty.
    pub fn success_rate(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let ok = self.samples.iter().filter(|s| **s).count();
        Some(ok as f64 / self.samples.len() as f64)
    }

    /// Drop all samples.
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Point-in-time statistics of one kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct KindStatistics {
    /// Samples in the window
    pub samples: usize,
    /// Success rate over the window
    pub success_rate: f64,
}

/// Windows for every kind seen so far.
#[derive(Debug, Clone)]
pub struct PerformanceTracker {
    windows: BTreeMap<ExecutorKind, PerformanceWindow>,
    capacity: usize,
    min_samples: usize,
}

impl PerformanceTracker {
    /// Tracker with the given window size and minimum sample count.
    pub fn new(capacity: usize, min_samples: usize) -> Self {
        Self {
            windows: BTreeMap::new(),
            capacity,
            min_samples,
        }
    }

    /// Feed every task result of an outcome into its kind's window.
    pub fn observe(&mut self, outcome: &CycleOutcome) {
        let capacity = self.capacity;
        for (kind, tally) in &outcome.tally {
            let window = self
                .windows
                .entry(*kind)
                .or_insert_with(|| PerformanceWindow::new(capacity));
            for _ in 0..tally.succeeded {
                window.record(true);
            }
            for _ in 0..tally.failed {
                window.record(false);
            }
        }
    }

    /// Success rate of a kind, once the window holds enough samples.
    pub fn success_rate(&self, kind: ExecutorKind) -> Option<f64> {
        let window = self.windows.get(&kind)?;
        if window.len() < self.min_samples {
            return None;
        }
        window.success_rate()
    }

    /// Samples currently held for a kind.
    pub fn samples(&self, kind: ExecutorKind) -> usize {
        self.windows.get(&kind).map_or(0, PerformanceWindow::len)
    }

    /// Forget a kind's history, e.g. after its genome changed.
    pub fn reset(&mut self, kind: ExecutorKind) {
        if let Some(window) = self.windows.get_mut(&kind) {
            window.clear();
        }
    }

    /// Statistics for every kind with samples.
    pub fn statistics(&self) -> BTreeMap<ExecutorKind, KindStatistics> {
        self.windows
            .iter()
            .filter_map(|(kind, window)| {
                window.success_rate().map(|rate| {
                    (
                        *kind,
                        KindStatistics {
                            samples: window.len(),
                            success_rate: rate,
                        },
                    )
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use genesis_core::{CycleId, KindTally};

    fn outcome(kind: ExecutorKind, succeeded: u32, failed: u32) -> CycleOutcome {
        let mut outcome = CycleOutcome::noop(CycleId::new(), "", chrono::Utc::now());
        outcome.tally.insert(kind, KindTally { succeeded, failed });
        outcome
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut window = PerformanceWindow::new(3);
        for s in [false, false, true, true, true] {
            window.record(s);
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.success_rate(), Some(1.0));
    }

    #[test]
    fn test_rate_needs_min_samples() {
        let mut tracker = PerformanceTracker::new(10, 3);
        tracker.observe(&outcome(ExecutorKind::Code, 0, 2));
        assert_eq!(tracker.success_rate(ExecutorKind::Code), None);

        tracker.observe(&outcome(ExecutorKind::Code, 1, 0));
        let rate = tracker.success_rate(ExecutorKind::Code).unwrap();
        assert!((rate - 1.0 / 3.0).abs() < 1e-9);

        tracker.reset(ExecutorKind::Code);
        assert_eq!(tracker.samples(ExecutorKind::Code), 0);
        assert!(tracker.statistics().is_empty());
    }
}
