//! Log-only delivery for dry runs
//!
//! Accepts everything and writes it to the log, so the full cycle can be
//! exercised without a context platform.

use async_trait::async_trait;
use tracing::info;

use super::payload::{MeasurementPayload, ProvisioningRequest};
use super::{ContextSink, DeliveryError, IngestionSink, ProvisionOutcome, Provisioner};
use crate::types::EscalationEvent;

#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl IngestionSink for LogSink {
    async fn push_measurement(
        &self,
        device_id: &str,
        payload: &MeasurementPayload,
    ) -> Result<(), DeliveryError> {
        info!(device = %device_id, payload = %payload.to_json(), "[dry-run] measurement");
        Ok(())
    }
}

#[async_trait]
impl ContextSink for LogSink {
    async fn push_state(&self, event: &EscalationEvent) -> Result<(), DeliveryError> {
        info!(
            device = %event.device_id,
            metric = %event.metric,
            state = %event.new_state,
            "[dry-run] state update"
        );
        Ok(())
    }
}

#[async_trait]
impl Provisioner for LogSink {
    async fn provision(
        &self,
        request: &ProvisioningRequest,
    ) -> Result<ProvisionOutcome, DeliveryError> {
        info!(
            device = %request.device_id,
            entity = %request.entity_name,
            "[dry-run] provisioning"
        );
        Ok(ProvisionOutcome::Created)
    }
}
