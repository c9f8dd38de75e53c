//! Downstream delivery: ingestion sink, context-update sink, provisioner
//!
//! The correction pipeline never talks to the network. The cycle runner hands
//! cleaned payloads and escalation events to implementations of these traits,
//! always under a short timeout; failures are logged and dropped by callers.

pub mod fiware;
pub mod log_sink;
pub mod payload;

pub use fiware::FiwareClient;
pub use log_sink::LogSink;
pub use payload::{MeasurementPayload, ProvisioningRequest};

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;

use crate::types::EscalationEvent;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned status {status}: {body}")]
    ServerError { status: u16, body: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

/// Result of a provisioning call, as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionOutcome {
    /// 201
    Created,
    /// 200
    Ok,
    /// 409
    AlreadyExists,
    Rejected { status: u16, body: String },
}

impl ProvisionOutcome {
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            201 => ProvisionOutcome::Created,
            200 => ProvisionOutcome::Ok,
            409 => ProvisionOutcome::AlreadyExists,
            _ => ProvisionOutcome::Rejected { status, body },
        }
    }

    /// Device may be considered registered.
    pub fn is_accepted(&self) -> bool {
        !matches!(self, ProvisionOutcome::Rejected { .. })
    }
}

impl std::fmt::Display for ProvisionOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProvisionOutcome::Created => write!(f, "created"),
            ProvisionOutcome::Ok => write!(f, "ok"),
            ProvisionOutcome::AlreadyExists => write!(f, "already exists"),
            ProvisionOutcome::Rejected { status, body } => write!(f, "rejected ({status}): {body}"),
        }
    }
}

// ============================================================================
// Collaborator Traits
// ============================================================================

/// Receives one flat cleaned payload per device per cycle.
#[async_trait]
pub trait IngestionSink: Send + Sync {
    async fn push_measurement(
        &self,
        device_id: &str,
        payload: &MeasurementPayload,
    ) -> Result<(), DeliveryError>;
}

/// Receives device-health transitions.
#[async_trait]
pub trait ContextSink: Send + Sync {
    async fn push_state(&self, event: &EscalationEvent) -> Result<(), DeliveryError>;
}

/// Registers a device with the downstream platform.
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn provision(
        &self,
        request: &ProvisioningRequest,
    ) -> Result<ProvisionOutcome, DeliveryError>;
}

/// Run a delivery future under `limit`, folding an elapsed deadline into
/// [`DeliveryError::Timeout`].
pub async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T, DeliveryError>
where
    F: Future<Output = Result<T, DeliveryError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(DeliveryError::Timeout(limit)),
    }
}
