//! Threshold table: metric name → valid physical range

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Range used for metrics that have no entry in the table.
pub const FALLBACK_RANGE: ThresholdRange = ThresholdRange {
    min: -999.0,
    max: 999.0,
};

/// Inclusive valid range `[min, max]` for one metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRange {
    pub min: f64,
    pub max: f64,
}

impl ThresholdRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }

    /// Saturating clamp into the range.
    pub fn clamp(&self, value: f64) -> f64 {
        self.min.max(value.min(self.max))
    }

    pub fn midpoint(&self) -> f64 {
        (self.min + self.max) / 2.0
    }

    pub fn is_well_formed(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min < self.max
    }
}

/// Immutable metric → range mapping, loaded once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThresholdTable {
    ranges: BTreeMap<String, ThresholdRange>,
}

impl ThresholdTable {
    pub fn new(ranges: BTreeMap<String, ThresholdRange>) -> Self {
        Self { ranges }
    }

    /// Range for `metric`, if the table knows it.
    pub fn get(&self, metric: &str) -> Option<ThresholdRange> {
        self.ranges.get(metric).copied()
    }

    /// Range for `metric`, falling back to [`FALLBACK_RANGE`].
    pub fn range_for(&self, metric: &str) -> ThresholdRange {
        self.get(metric).unwrap_or(FALLBACK_RANGE)
    }

    /// Metric names in table order.
    pub fn metrics(&self) -> impl Iterator<Item = &str> {
        self.ranges.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, ThresholdRange)> {
        self.ranges.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Entries violating `min < max`, as human-readable messages.
    pub fn malformed_entries(&self) -> Vec<String> {
        self.ranges
            .iter()
            .filter(|(_, r)| !r.is_well_formed())
            .map(|(metric, r)| {
                format!(
                    "thresholds.{metric}: min ({}) must be finite and less than max ({})",
                    r.min, r.max
                )
            })
            .collect()
    }
}

impl Default for ThresholdTable {
    /// Agronomic ranges for the field cluster sensors.
    fn default() -> Self {
        let ranges = [
            ("temperature", -15.0, 70.0),
            ("soilTemperature", -10.0, 50.0),
            ("humidity", 0.0, 100.0),
            ("soilMoisture", 0.0, 100.0),
            ("azote_mg_kg", 0.0, 400.0),
            ("phosphore_mg_kg", 0.0, 100.0),
            ("potassium_mg_kg", 0.0, 400.0),
            ("ph", 4.0, 9.0),
        ]
        .into_iter()
        .map(|(m, min, max)| (m.to_string(), ThresholdRange::new(min, max)))
        .collect();
        Self { ranges }
    }
}
