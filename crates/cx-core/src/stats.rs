//! Bounded rolling sample windows for the monitor.
//!
//! Each window keeps the last `capacity` samples and computes summary
//! statistics over them. Windows are owned by the monitor behind a mutex;
//! the type itself is not thread-safe.

use std::collections::VecDeque;

/// Computed window statistics.
#[derive(Debug, Clone, Copy)]
pub struct WindowStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

impl std::fmt::Display for WindowStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "n={} min={:.3} max={:.3} avg={:.3}",
            self.count, self.min, self.max, self.avg
        )
    }
}

/// A rolling window over the last `capacity` f64 samples.
pub struct RollingWindow {
    samples: VecDeque<f64>,
    capacity: usize,
    sum: f64,
}

impl RollingWindow {
    /// Create an empty window retaining at most `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            sum: 0.0,
        }
    }

    /// Record a sample, evicting the oldest when at capacity.
    pub fn record(&mut self, sample: f64) {
        if self.samples.len() == self.capacity {
            if let Some(old) = self.samples.pop_front() {
                self.sum -= old;
            }
        }
        self.samples.push_back(sample);
        self.sum += sample;
    }

    /// Number of retained samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Most recent sample, if any.
    pub fn last(&self) -> Option<f64> {
        self.samples.back().copied()
    }

    /// Compute summary statistics. Returns `None` if no samples recorded.
    pub fn stats(&self) -> Option<WindowStats> {
        if self.samples.is_empty() {
            return None;
        }
        let mut min = f64::MAX;
        let mut max = f64::MIN;
        for &s in &self.samples {
            min = min.min(s);
            max = max.max(s);
        }
        Some(WindowStats {
            count: self.samples.len(),
            min,
            max,
            avg: self.sum / self.samples.len() as f64,
        })
    }

    /// Drop all samples.
    pub fn reset(&mut self) {
        self.samples.clear();
        self.sum = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_stats() {
        let mut w = RollingWindow::new(100);
        for i in 0..10 {
            w.record(i as f64);
        }
        let stats = w.stats().unwrap();
        assert_eq!(stats.count, 10);
        assert_eq!(stats.min, 0.0);
        assert_eq!(stats.max, 9.0);
        assert!((stats.avg - 4.5).abs() < 1e-9);
    }

    #[test]
    fn empty_stats() {
        let w = RollingWindow::new(10);
        assert!(w.stats().is_none());
    }

    #[test]
    fn eviction_keeps_window_bounded() {
        let mut w = RollingWindow::new(3);
        for i in 1..=5 {
            w.record(i as f64);
        }
        let stats = w.stats().unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.min, 3.0);
        assert_eq!(stats.max, 5.0);
        assert!((stats.avg - 4.0).abs() < 1e-9);
    }

    #[test]
    fn reset_clears() {
        let mut w = RollingWindow::new(10);
        w.record(1.0);
        w.reset();
        assert!(w.stats().is_none());
        assert_eq!(w.len(), 0);
    }
}
