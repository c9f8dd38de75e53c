//! Correction outcome and escalation types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How the pipeline resolved one raw reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CorrectionStatus {
    /// In range, smoothed against history
    Ok,
    /// Missing value imputed from the history mean
    FixedNan,
    /// Missing value with no history: midpoint of the valid range
    Default,
    /// Out-of-range value replaced by the history mean
    FixedOutlier,
    /// Out-of-range value with no history: clamped into range
    Clipped,
    /// Sensor stuck on one value past the streak limit
    FixedFreeze,
    /// Sensor silent past the streak limit
    FixedBroken,
}

impl CorrectionStatus {
    pub const ALL: [CorrectionStatus; 7] = [
        CorrectionStatus::Ok,
        CorrectionStatus::FixedNan,
        CorrectionStatus::Default,
        CorrectionStatus::FixedOutlier,
        CorrectionStatus::Clipped,
        CorrectionStatus::FixedFreeze,
        CorrectionStatus::FixedBroken,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            CorrectionStatus::Ok => "OK",
            CorrectionStatus::FixedNan => "FIXED_NAN",
            CorrectionStatus::Default => "DEFAULT",
            CorrectionStatus::FixedOutlier => "FIXED_OUTLIER",
            CorrectionStatus::Clipped => "CLIPPED",
            CorrectionStatus::FixedFreeze => "FIXED_FREEZE",
            CorrectionStatus::FixedBroken => "FIXED_BROKEN",
        }
    }

    /// Whether this status is worth an operator log line.
    ///
    /// `OK` and `DEFAULT` are routine and stay quiet.
    pub fn is_correction(&self) -> bool {
        !matches!(self, CorrectionStatus::Ok | CorrectionStatus::Default)
    }
}

impl std::fmt::Display for CorrectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Operational state pushed to the context store on a sensor-health transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceState {
    ErrorBroken,
    ErrorFrozen,
}

impl DeviceState {
    pub fn label(&self) -> &'static str {
        match self {
            DeviceState::ErrorBroken => "ERROR_BROKEN",
            DeviceState::ErrorFrozen => "ERROR_FROZEN",
        }
    }
}

impl std::fmt::Display for DeviceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Device-health transition, distinct from the per-cycle cleaned measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationEvent {
    pub device_id: String,
    pub metric: String,
    pub new_state: DeviceState,
    pub timestamp: DateTime<Utc>,
}

/// Output of one `clean` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionResult {
    pub value: f64,
    pub status: CorrectionStatus,
    pub escalation: Option<EscalationEvent>,
}

impl CorrectionResult {
    pub fn new(value: f64, status: CorrectionStatus) -> Self {
        Self {
            value,
            status,
            escalation: None,
        }
    }
}
