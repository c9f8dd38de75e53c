//! Shared data structures for the sensor gateway
//!
//! This module defines the types that flow through the correction pipeline:
//! - Ingestion: Reading, Batch (one arrival of readings across devices)
//! - Correction: CorrectionStatus, CorrectionResult
//! - Escalation: DeviceState, EscalationEvent (device-health transitions)

mod correction;
mod reading;

pub use correction::*;
pub use reading::*;
