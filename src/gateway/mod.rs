//! Sensor gateway core
//!
//! Per-device, per-metric streaming correction:
//! - [`thresholds`]: metric → valid physical range
//! - [`state`]: rolling history window and streak counters per stream
//! - [`pipeline`]: the ordered correction stages
//! - [`registry`]: provisioning gate, consulted on a device's first cycle
//! - [`geo`]: grid → lat/lon projection for provisioning

pub mod geo;
pub mod pipeline;
pub mod registry;
pub mod state;
pub mod thresholds;

pub use geo::{GeoOrigin, GeoPosition, GridPosition};
pub use pipeline::{decide, CorrectionPipeline, CorrectionPolicy, Decision, HistoryAppend};
pub use registry::{DeviceRegistry, RegistrySettings};
pub use state::{MetricKey, MetricState, MetricWindow, StateUpdate};
pub use thresholds::{ThresholdRange, ThresholdTable, FALLBACK_RANGE};
