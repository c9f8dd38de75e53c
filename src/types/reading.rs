//! Raw reading and batch types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One raw metric value reported by a device in a single cycle.
///
/// `value` is `None` when the sensor reported nothing. A `NaN` float coming
/// from upstream is folded into `None` by [`Reading::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub device_id: String,
    pub metric: String,
    #[serde(default)]
    pub value: Option<f64>,
    pub cycle_time: DateTime<Utc>,
}

impl Reading {
    pub fn new(
        device_id: impl Into<String>,
        metric: impl Into<String>,
        value: Option<f64>,
        cycle_time: DateTime<Utc>,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            metric: metric.into(),
            value: value.filter(|v| !v.is_nan()),
            cycle_time,
        }
    }
}

/// One arrival from the batch source: every reading captured at `timestamp`.
///
/// Readings inside a batch may be processed in any order; batches themselves
/// must be consumed in arrival order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub timestamp: DateTime<Utc>,
    pub readings: Vec<Reading>,
}

impl Batch {
    pub fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            readings: Vec::new(),
        }
    }

    /// Add a reading stamped with this batch's cycle time.
    pub fn push(&mut self, device_id: &str, metric: &str, value: Option<f64>) {
        self.readings
            .push(Reading::new(device_id, metric, value, self.timestamp));
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Distinct device ids in first-seen order.
    pub fn device_ids(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        for r in &self.readings {
            if !seen.contains(&r.device_id.as_str()) {
                seen.push(&r.device_id);
            }
        }
        seen
    }
}
