//! Sensor Gateway: streaming correction for field IoT sensors
//!
//! Raw per-cycle readings from soil and weather sensor clusters are cleaned
//! (gap filling, outlier replacement, freeze detection, smoothing), device
//! health transitions are escalated, and the cleaned payloads are forwarded
//! to a FIWARE context platform.
//!
//! ## Architecture
//!
//! - **gateway**: per-(device, metric) correction pipeline, thresholds,
//!   device registry and position projection
//! - **runner**: batch sources and the per-device worker fan-out
//! - **delivery**: ingestion, context and provisioning collaborators
//! - **config**: TOML configuration with validated defaults

pub mod config;
pub mod delivery;
pub mod gateway;
pub mod runner;
pub mod types;

pub use config::GatewayConfig;

pub use types::{
    Batch, CorrectionResult, CorrectionStatus, DeviceState, EscalationEvent, Reading,
};

pub use gateway::{
    CorrectionPipeline, CorrectionPolicy, DeviceRegistry, HistoryAppend, ThresholdRange,
    ThresholdTable,
};

pub use delivery::{ContextSink, DeliveryError, IngestionSink, Provisioner};

pub use runner::{CycleRunner, RunnerSettings, RunnerStats};
