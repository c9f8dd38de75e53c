//! Correction pipeline: raw reading → trustworthy value
//!
//! ## Stage Order
//!
//! ```text
//! 1. Missing    absent/NaN → history mean (FIXED_NAN), range midpoint (DEFAULT),
//!               or sentinel once the missing streak passes the limit (FIXED_BROKEN)
//! 2. Reset      any present reading clears the missing streak
//! 3. Outlier    outside [min, max] → history mean (FIXED_OUTLIER) or clamp (CLIPPED)
//! 4. Freeze     repeat of the previous value → sentinel past the limit (FIXED_FREEZE)
//! 5. Smoothing  w·raw + (1-w)·mean(history) (OK)
//! ```
//!
//! The first stage that resolves the reading wins. Deciding is a pure
//! function of the current [`MetricState`] ([`decide`]); the pipeline then
//! commits the returned [`StateUpdate`] and stamps any escalation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::state::{MetricKey, MetricState, StateUpdate};
use super::thresholds::{ThresholdRange, ThresholdTable};
use crate::config::defaults::{SENTINEL_VALUE, SMOOTHING_WEIGHT, STREAK_LIMIT, WINDOW_CAPACITY};
use crate::types::{CorrectionResult, CorrectionStatus, DeviceState, EscalationEvent};

// ============================================================================
// Policy
// ============================================================================

/// How many history slots an accepted reading occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAppend {
    /// Freeze stage appends the raw value and smoothing appends the smoothed
    /// value, so one accepted reading can fill two slots. Freeze detection
    /// compares against the newest slot.
    #[default]
    Compat,
    /// Only the smoothed value is appended. Freeze detection compares against
    /// the previous in-range raw value.
    Single,
}

/// Tunable constants of the correction stages (`[correction]` in config).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionPolicy {
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,

    /// A streak strictly greater than this escalates
    #[serde(default = "default_streak_limit")]
    pub streak_limit: u32,

    /// Out-of-band value forwarded for broken/frozen sensors
    #[serde(default = "default_sentinel")]
    pub sentinel: f64,

    /// Weight of the raw value in the smoothing stage
    #[serde(default = "default_smoothing_weight")]
    pub smoothing_weight: f64,

    #[serde(default)]
    pub history_append: HistoryAppend,
}

fn default_window_capacity() -> usize {
    WINDOW_CAPACITY
}
fn default_streak_limit() -> u32 {
    STREAK_LIMIT
}
fn default_sentinel() -> f64 {
    SENTINEL_VALUE
}
fn default_smoothing_weight() -> f64 {
    SMOOTHING_WEIGHT
}

impl Default for CorrectionPolicy {
    fn default() -> Self {
        Self {
            window_capacity: default_window_capacity(),
            streak_limit: default_streak_limit(),
            sentinel: default_sentinel(),
            smoothing_weight: default_smoothing_weight(),
            history_append: HistoryAppend::default(),
        }
    }
}

// ============================================================================
// Pure Decision
// ============================================================================

/// Outcome of [`decide`]: what to return and how state must change.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub value: f64,
    pub status: CorrectionStatus,
    /// Set only on the cycle a streak first passes the limit
    pub escalate: Option<DeviceState>,
    pub update: StateUpdate,
}

impl Decision {
    fn resolved(value: f64, status: CorrectionStatus, update: StateUpdate) -> Self {
        Self {
            value,
            status,
            escalate: None,
            update,
        }
    }
}

/// Decide the corrected value for one reading without touching state.
pub fn decide(
    state: &MetricState,
    range: ThresholdRange,
    raw: Option<f64>,
    policy: &CorrectionPolicy,
) -> Decision {
    let mut update = StateUpdate::unchanged(state);
    let limit = policy.streak_limit;

    // 1. Missing value
    let Some(raw) = raw.filter(|v| !v.is_nan()) else {
        let Some(mean) = state.window.mean() else {
            return Decision::resolved(range.midpoint(), CorrectionStatus::Default, update);
        };
        let streak = state.missing_streak.saturating_add(1);
        update.missing_streak = streak;
        if streak > limit {
            return Decision {
                value: policy.sentinel,
                status: CorrectionStatus::FixedBroken,
                escalate: (streak == limit + 1).then_some(DeviceState::ErrorBroken),
                update,
            };
        }
        return Decision::resolved(mean, CorrectionStatus::FixedNan, update);
    };

    // 2. Present reading clears the missing streak
    update.missing_streak = 0;

    // 3. Outlier
    if !range.contains(raw) {
        update.freeze_streak = 0;
        return match state.window.mean() {
            Some(mean) => Decision::resolved(mean, CorrectionStatus::FixedOutlier, update),
            None => Decision::resolved(range.clamp(raw), CorrectionStatus::Clipped, update),
        };
    }

    // 4. Freeze
    let mut preview = state.window.clone();
    update.last_raw = Some(raw);
    if state.window.is_empty() {
        update.freeze_streak = 0;
    } else {
        let previous = match policy.history_append {
            HistoryAppend::Compat => state.window.last(),
            HistoryAppend::Single => state.last_raw.or_else(|| state.window.last()),
        };
        // An exact repeat is the freeze signal.
        #[allow(clippy::float_cmp)]
        let repeated = previous == Some(raw);
        update.freeze_streak = if repeated {
            state.freeze_streak.saturating_add(1)
        } else {
            0
        };
        if policy.history_append == HistoryAppend::Compat {
            update.append(raw);
            preview.push(raw);
        }
        if update.freeze_streak > limit {
            return Decision {
                value: policy.sentinel,
                status: CorrectionStatus::FixedFreeze,
                escalate: (update.freeze_streak == limit + 1).then_some(DeviceState::ErrorFrozen),
                update,
            };
        }
    }

    // 5. Smoothing
    let smoothed = match preview.mean() {
        // w·raw + (1-w)·mean, written so a constant stream stays exact
        Some(mean) => raw + (1.0 - policy.smoothing_weight) * (mean - raw),
        None => raw,
    };
    update.append(smoothed);
    Decision::resolved(smoothed, CorrectionStatus::Ok, update)
}

// ============================================================================
// Stateful Pipeline
// ============================================================================

/// Owns every [`MetricState`] of one gateway shard, addressed by
/// `(device, metric)`. Calls for the same key must arrive in order.
#[derive(Debug)]
pub struct CorrectionPipeline {
    thresholds: Arc<ThresholdTable>,
    policy: CorrectionPolicy,
    states: HashMap<MetricKey, MetricState>,
}

impl CorrectionPipeline {
    pub fn new(thresholds: Arc<ThresholdTable>, policy: CorrectionPolicy) -> Self {
        Self {
            thresholds,
            policy,
            states: HashMap::new(),
        }
    }

    /// Clean one reading, stamping any escalation with the current time.
    pub fn clean(&mut self, device_id: &str, metric: &str, raw: Option<f64>) -> CorrectionResult {
        self.clean_at(device_id, metric, raw, Utc::now())
    }

    /// Clean one reading, stamping any escalation with `timestamp`.
    pub fn clean_at(
        &mut self,
        device_id: &str,
        metric: &str,
        raw: Option<f64>,
        timestamp: DateTime<Utc>,
    ) -> CorrectionResult {
        let range = self.thresholds.range_for(metric);
        let capacity = self.policy.window_capacity;
        let state = self
            .states
            .entry(MetricKey::new(device_id, metric))
            .or_insert_with(|| MetricState::new(capacity));

        let decision = decide(state, range, raw, &self.policy);
        state.apply(&decision.update);

        if decision.status == CorrectionStatus::FixedNan {
            debug!(
                device = %device_id,
                metric = %metric,
                streak = state.missing_streak,
                limit = self.policy.streak_limit,
                "Missing value imputed from history"
            );
        }

        let escalation = decision.escalate.map(|new_state| {
            warn!(
                device = %device_id,
                metric = %metric,
                state = %new_state,
                sentinel = self.policy.sentinel,
                "Sensor health escalation"
            );
            EscalationEvent {
                device_id: device_id.to_string(),
                metric: metric.to_string(),
                new_state,
                timestamp,
            }
        });

        CorrectionResult {
            value: decision.value,
            status: decision.status,
            escalation,
        }
    }

    /// Replace the history of one stream (warm start, tests).
    pub fn seed_history(&mut self, device_id: &str, metric: &str, history: &[f64]) {
        self.states.insert(
            MetricKey::new(device_id, metric),
            MetricState::with_history(self.policy.window_capacity, history),
        );
    }

    pub fn state(&self, device_id: &str, metric: &str) -> Option<&MetricState> {
        self.states.get(&MetricKey::new(device_id, metric))
    }

    pub fn tracked_streams(&self) -> usize {
        self.states.len()
    }

    pub fn thresholds(&self) -> &ThresholdTable {
        &self.thresholds
    }

    pub fn policy(&self) -> &CorrectionPolicy {
        &self.policy
    }
}
