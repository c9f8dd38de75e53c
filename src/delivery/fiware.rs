//! FIWARE client: IoT-agent measures, device provisioning, Orion state updates

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::payload::{MeasurementPayload, ProvisioningRequest};
use super::{ContextSink, DeliveryError, IngestionSink, ProvisionOutcome, Provisioner};
use crate::config::{DeliveryConfig, GatewayInfo};
use crate::types::EscalationEvent;

/// HTTP client for the IoT agent (south) and the context broker (north).
#[derive(Clone)]
pub struct FiwareClient {
    http: reqwest::Client,
    iot_agent_url: String,
    admin_url: String,
    orion_url: String,
    agent_endpoint: String,
    api_key: String,
    service: String,
    service_path: String,
    entity_prefix: String,
}

impl FiwareClient {
    pub fn new(delivery: &DeliveryConfig, gateway: &GatewayInfo) -> Result<Self, DeliveryError> {
        let request_timeout = delivery
            .timeout_secs
            .max(delivery.provisioning_timeout_secs);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(request_timeout))
            .build()?;

        Ok(Self {
            http,
            iot_agent_url: delivery.iot_agent_url.trim_end_matches('/').to_string(),
            admin_url: delivery.admin_url.trim_end_matches('/').to_string(),
            orion_url: delivery.orion_url.trim_end_matches('/').to_string(),
            agent_endpoint: delivery.agent_endpoint.clone(),
            api_key: delivery.api_key.clone(),
            service: delivery.service.clone(),
            service_path: delivery.service_path.clone(),
            entity_prefix: gateway.entity_prefix.clone(),
        })
    }

    fn with_fiware_headers(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        req.header("fiware-service", &self.service)
            .header("fiware-servicepath", &self.service_path)
    }

    /// Body of the IoT-agent provisioning call.
    pub fn provisioning_body(&self, request: &ProvisioningRequest) -> serde_json::Value {
        json!({
            "devices": [{
                "device_id": request.device_id,
                "apikey": self.api_key,
                "entity_name": request.entity_name,
                "entity_type": request.entity_type,
                "protocol": "IoTA-JSON",
                "transport": "HTTP",
                "endpoint": self.agent_endpoint,
                "attributes": request.attributes,
                "static_attributes": [
                    {"name": "longitude", "type": "Number", "value": request.position.longitude},
                    {"name": "latitude", "type": "Number", "value": request.position.latitude},
                ],
            }]
        })
    }

    /// Body of the Orion attribute update for a health transition.
    pub fn state_body(event: &EscalationEvent) -> serde_json::Value {
        json!({
            "state": {
                "value": event.new_state.label(),
                "type": "String",
                "metadata": {
                    "timestamp": {
                        "value": event.timestamp.to_rfc3339(),
                        "type": "DateTime",
                    }
                }
            }
        })
    }

    pub fn orion_url(&self) -> &str {
        &self.orion_url
    }
}

#[async_trait]
impl IngestionSink for FiwareClient {
    async fn push_measurement(
        &self,
        device_id: &str,
        payload: &MeasurementPayload,
    ) -> Result<(), DeliveryError> {
        let resp = self
            .http
            .post(&self.iot_agent_url)
            .query(&[("k", self.api_key.as_str()), ("i", device_id)])
            .json(&payload.to_json())
            .send()
            .await?;

        let status = resp.status();
        if status.is_success() {
            debug!(device = %device_id, "Measurement accepted by IoT agent");
            Ok(())
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(DeliveryError::ServerError {
                status: status.as_u16(),
                body,
            })
        }
    }
}

#[async_trait]
impl ContextSink for FiwareClient {
    async fn push_state(&self, event: &EscalationEvent) -> Result<(), DeliveryError> {
        let url = format!(
            "{}/{}{}/attrs",
            self.orion_url, self.entity_prefix, event.device_id
        );
        debug!(device = %event.device_id, url = %url, "Pushing state to Orion");

        let resp = self
            .with_fiware_headers(self.http.post(&url))
            .json(&Self::state_body(event))
            .send()
            .await?;

        let status = resp.status();
        if status.as_u16() >= 400 {
            let body = resp.text().await.unwrap_or_default();
            return Err(DeliveryError::ServerError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Provisioner for FiwareClient {
    async fn provision(
        &self,
        request: &ProvisioningRequest,
    ) -> Result<ProvisionOutcome, DeliveryError> {
        let resp = self
            .with_fiware_headers(self.http.post(&self.admin_url))
            .json(&self.provisioning_body(request))
            .send()
            .await?;

        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Ok(ProvisionOutcome::from_status(status, body))
    }
}
