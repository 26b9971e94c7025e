//! Fixed-capacity rolling windows and their summary statistics.

use std::collections::VecDeque;

/// Summary of a rolling window.
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize)]
pub struct RollingStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

/// FIFO window that evicts its oldest sample once full.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    samples: VecDeque<f64>,
    capacity: usize,
}

impl RollingWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.samples.len() == self.capacity
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Mean of the stored samples, 0 when empty.
    pub fn mean(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    /// Min, max, mean and population standard deviation in one pass.
    pub fn stats(&self) -> RollingStats {
        if self.samples.is_empty() {
            return RollingStats::default();
        }
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        for &value in &self.samples {
            min = min.min(value);
            max = max.max(value);
            sum += value;
        }
        let count = self.samples.len() as f64;
        let mean = sum / count;
        let variance = self
            .samples
            .iter()
            .map(|value| (value - mean).powi(2))
            .sum::<f64>()
            / count;
        RollingStats {
            min,
            max,
            mean,
            std_dev: variance.max(0.0).sqrt(),
        }
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Rescales `value` against `[min, max]`.
///
/// Returns the neutral midpoint 0.5 when the spread is under `min_range`.
pub fn normalize(value: f64, min: f64, max: f64, min_range: f64) -> f64 {
    let range = max - min;
    if !range.is_finite() || range < min_range {
        return 0.5;
    }
    ((value - min) / range).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_evicts_oldest_first() {
        let mut window = RollingWindow::new(3);
        for value in [1.0, 2.0, 3.0, 4.0] {
            window.push(value);
        }
        assert_eq!(window.len(), 3);
        let stats = window.stats();
        assert_eq!(stats.min, 2.0);
        assert_eq!(stats.max, 4.0);
        assert_eq!(stats.mean, 3.0);
    }

    #[test]
    fn test_stats_of_empty_window() {
        let window = RollingWindow::new(10);
        assert_eq!(window.stats(), RollingStats::default());
        assert_eq!(window.mean(), 0.0);
    }

    #[test]
    fn test_std_dev_is_population_deviation() {
        let mut window = RollingWindow::new(8);
        for value in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0] {
            window.push(value);
        }
        assert!((window.stats().std_dev - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_normalize_degenerate_range_is_midpoint() {
        assert_eq!(normalize(0.5, 0.5, 0.5, 0.01), 0.5);
        assert_eq!(normalize(0.9, 0.5, 0.505, 0.01), 0.5);
        assert_eq!(normalize(0.5, f64::NAN, 1.0, 0.01), 0.5);
    }

    #[test]
    fn test_normalize_clamps() {
        assert_eq!(normalize(0.25, 0.0, 1.0, 0.01), 0.25);
        assert_eq!(normalize(2.0, 0.0, 1.0, 0.01), 1.0);
        assert_eq!(normalize(-1.0, 0.0, 1.0, 0.01), 0.0);
    }
}
