//! Per-(device, metric) rolling state
//!
//! Each key owns a bounded FIFO window of accepted values and two streak
//! counters: consecutive missing readings and consecutive identical readings.

use std::collections::VecDeque;

use crate::config::defaults::WINDOW_CAPACITY;

/// Address of one independent correction stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricKey {
    pub device_id: String,
    pub metric: String,
}

impl MetricKey {
    pub fn new(device_id: &str, metric: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            metric: metric.to_string(),
        }
    }
}

impl std::fmt::Display for MetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.device_id, self.metric)
    }
}

// ============================================================================
// Rolling Window
// ============================================================================

/// Fixed-capacity FIFO of accepted values. Pushing onto a full window
/// evicts the oldest entry in O(1).
#[derive(Debug, Clone, PartialEq)]
pub struct MetricWindow {
    values: VecDeque<f64>,
    capacity: usize,
}

impl MetricWindow {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Build a window pre-filled with `values` (oldest first), keeping only
    /// the newest `capacity` entries.
    pub fn from_values(capacity: usize, values: &[f64]) -> Self {
        let mut window = Self::new(capacity);
        for &v in values {
            window.push(v);
        }
        window
    }

    /// Append a value. Non-finite values are ignored: the window must never
    /// hold a NaN.
    pub fn push(&mut self, value: f64) {
        if !value.is_finite() {
            return;
        }
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    /// Arithmetic mean of whatever is currently held.
    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        Some(self.values.iter().sum::<f64>() / self.values.len() as f64)
    }

    /// Most recently appended value.
    pub fn last(&self) -> Option<f64> {
        self.values.back().copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn values(&self) -> Vec<f64> {
        self.values.iter().copied().collect()
    }
}

impl Default for MetricWindow {
    fn default() -> Self {
        Self::new(WINDOW_CAPACITY)
    }
}

// ============================================================================
// Metric State
// ============================================================================

/// Everything the pipeline remembers about one `(device, metric)` stream.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetricState {
    pub window: MetricWindow,
    /// Consecutive missing readings seen while history was non-empty
    pub missing_streak: u32,
    /// Consecutive in-range readings equal to the previous one
    pub freeze_streak: u32,
    /// Last in-range raw value (freeze comparison in single-append mode)
    pub last_raw: Option<f64>,
}

impl MetricState {
    pub fn new(capacity: usize) -> Self {
        Self {
            window: MetricWindow::new(capacity),
            ..Self::default()
        }
    }

    /// State with a pre-seeded history window.
    pub fn with_history(capacity: usize, history: &[f64]) -> Self {
        Self {
            window: MetricWindow::from_values(capacity, history),
            ..Self::default()
        }
    }

    /// Commit a decision's state transition.
    pub fn apply(&mut self, update: &StateUpdate) {
        self.missing_streak = update.missing_streak;
        self.freeze_streak = update.freeze_streak;
        if update.last_raw.is_some() {
            self.last_raw = update.last_raw;
        }
        for v in update.appends.iter().flatten() {
            self.window.push(*v);
        }
    }
}

/// State transition produced by a correction decision.
///
/// At most two values are appended per cycle (raw from the freeze stage,
/// smoothed from the smoothing stage).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateUpdate {
    pub missing_streak: u32,
    pub freeze_streak: u32,
    pub last_raw: Option<f64>,
    pub appends: [Option<f64>; 2],
}

impl StateUpdate {
    /// Transition that keeps counters as they are and appends nothing.
    pub fn unchanged(state: &MetricState) -> Self {
        Self {
            missing_streak: state.missing_streak,
            freeze_streak: state.freeze_streak,
            last_raw: None,
            appends: [None, None],
        }
    }

    pub fn append(&mut self, value: f64) {
        if let Some(slot) = self.appends.iter_mut().find(|s| s.is_none()) {
            *slot = Some(value);
        }
    }

    pub fn append_count(&self) -> usize {
        self.appends.iter().flatten().count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_evicts_oldest() {
        let mut w = MetricWindow::new(5);
        for v in 1..=7 {
            w.push(v as f64);
        }
        assert_eq!(w.len(), 5);
        assert_eq!(w.values(), vec![3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(w.last(), Some(7.0));
    }

    #[test]
    fn test_window_mean() {
        let w = MetricWindow::from_values(5, &[20.0, 21.0, 19.0]);
        assert_eq!(w.mean(), Some(20.0));
        assert_eq!(MetricWindow::new(5).mean(), None);
    }

    #[test]
    fn test_window_rejects_nan() {
        let mut w = MetricWindow::new(5);
        w.push(f64::NAN);
        w.push(f64::INFINITY);
        assert!(w.is_empty());
    }

    #[test]
    fn test_zero_capacity_is_promoted() {
        let w = MetricWindow::new(0);
        assert_eq!(w.capacity(), 1);
    }

    #[test]
    fn test_apply_update() {
        let mut state = MetricState::new(5);
        let mut update = StateUpdate::unchanged(&state);
        update.freeze_streak = 2;
        update.last_raw = Some(12.0);
        update.append(12.0);
        update.append(11.5);
        update.append(99.0); // no third slot
        assert_eq!(update.append_count(), 2);

        state.apply(&update);
        assert_eq!(state.freeze_streak, 2);
        assert_eq!(state.last_raw, Some(12.0));
        assert_eq!(state.window.values(), vec![12.0, 11.5]);
    }
}
