//! Device registry: provisioning gate in front of the ingestion sink
//!
//! A device must be registered downstream before its first cleaned payload
//! is forwarded. Registration happens at most once per device per registry;
//! failed attempts leave the device unmarked so the next cycle retries.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::geo::{project, GeoOrigin, GridPosition};
use crate::delivery::payload::{default_attribute_schema, ProvisioningRequest};
use crate::delivery::{bounded, Provisioner};

/// Static inputs the registry needs to describe a device.
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub origin: GeoOrigin,
    pub positions: Arc<BTreeMap<String, GridPosition>>,
    pub entity_prefix: String,
    pub entity_type: String,
    pub timeout: Duration,
}

/// Set of devices known to be provisioned downstream.
pub struct DeviceRegistry {
    provisioner: Arc<dyn Provisioner>,
    settings: RegistrySettings,
    known: HashSet<String>,
    attempts: u64,
}

impl DeviceRegistry {
    pub fn new(provisioner: Arc<dyn Provisioner>, settings: RegistrySettings) -> Self {
        Self {
            provisioner,
            settings,
            known: HashSet::new(),
            attempts: 0,
        }
    }

    /// Ensure `device_id` is provisioned. Returns `true` when it is (already
    /// or now), `false` when this attempt failed.
    pub async fn ensure_known(&mut self, device_id: &str) -> bool {
        if self.known.contains(device_id) {
            return true;
        }

        info!(device = %device_id, "New device detected, provisioning");
        let request = self.build_request(device_id);
        info!(
            device = %device_id,
            lat = request.position.latitude,
            lon = request.position.longitude,
            "Computed device position"
        );

        self.attempts += 1;
        let outcome = bounded(self.settings.timeout, self.provisioner.provision(&request)).await;

        match outcome {
            Ok(outcome) if outcome.is_accepted() => {
                info!(device = %device_id, outcome = %outcome, "Device provisioned");
                self.known.insert(device_id.to_string());
                true
            }
            Ok(outcome) => {
                warn!(device = %device_id, outcome = %outcome, "Provisioning rejected");
                false
            }
            Err(e) => {
                warn!(device = %device_id, error = %e, "Provisioning call failed");
                false
            }
        }
    }

    /// Provisioning request for a device. Devices with no configured grid
    /// position sit at the origin.
    pub fn build_request(&self, device_id: &str) -> ProvisioningRequest {
        let grid = self
            .settings
            .positions
            .get(device_id)
            .copied()
            .unwrap_or_default();

        ProvisioningRequest {
            device_id: device_id.to_string(),
            entity_name: format!("{}{}", self.settings.entity_prefix, device_id),
            entity_type: self.settings.entity_type.clone(),
            position: project(self.settings.origin, grid),
            attributes: default_attribute_schema(),
        }
    }

    pub fn is_known(&self, device_id: &str) -> bool {
        self.known.contains(device_id)
    }

    pub fn known_count(&self) -> usize {
        self.known.len()
    }

    /// Provisioning calls issued so far (successful or not).
    pub fn attempts(&self) -> u64 {
        self.attempts
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("known", &self.known)
            .field("attempts", &self.attempts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{DeliveryError, ProvisionOutcome};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    /// Provisioner that replays a scripted list of outcomes.
    struct ScriptedProvisioner {
        script: Mutex<Vec<Result<ProvisionOutcome, DeliveryError>>>,
        calls: AtomicU64,
    }

    impl ScriptedProvisioner {
        fn new(mut script: Vec<Result<ProvisionOutcome, DeliveryError>>) -> Arc<Self> {
            script.reverse();
            Arc::new(Self {
                script: Mutex::new(script),
                calls: AtomicU64::new(0),
            })
        }
    }

    #[async_trait]
    impl Provisioner for ScriptedProvisioner {
        async fn provision(
            &self,
            _request: &ProvisioningRequest,
        ) -> Result<ProvisionOutcome, DeliveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Ok(ProvisionOutcome::Ok))
        }
    }

    fn settings() -> RegistrySettings {
        let mut positions = BTreeMap::new();
        positions.insert("cluster_01".to_string(), GridPosition::new(8.0, 32.0));
        RegistrySettings {
            origin: GeoOrigin::default(),
            positions: Arc::new(positions),
            entity_prefix: "urn:ngsi-ld:Cluster:".to_string(),
            entity_type: "Cluster".to_string(),
            timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_conflict_counts_as_known() {
        let prov = ScriptedProvisioner::new(vec![Ok(ProvisionOutcome::AlreadyExists)]);
        let mut registry = DeviceRegistry::new(prov.clone(), settings());
        assert!(registry.ensure_known("cluster_01").await);
        assert!(registry.is_known("cluster_01"));
    }

    #[tokio::test]
    async fn test_failure_leaves_device_unmarked_and_retries() {
        let prov = ScriptedProvisioner::new(vec![
            Err(DeliveryError::Transport("connection refused".to_string())),
            Ok(ProvisionOutcome::Rejected {
                status: 500,
                body: "boom".to_string(),
            }),
            Ok(ProvisionOutcome::Created),
        ]);
        let mut registry = DeviceRegistry::new(prov.clone(), settings());

        assert!(!registry.ensure_known("cluster_01").await);
        assert!(!registry.ensure_known("cluster_01").await);
        assert!(!registry.is_known("cluster_01"));
        assert!(registry.ensure_known("cluster_01").await);
        assert_eq!(prov.calls.load(Ordering::SeqCst), 3);
        assert_eq!(registry.attempts(), 3);
    }

    #[test]
    fn test_request_uses_grid_position() {
        let prov = ScriptedProvisioner::new(Vec::new());
        let registry = DeviceRegistry::new(prov, settings());

        let req = registry.build_request("cluster_01");
        assert_eq!(req.entity_name, "urn:ngsi-ld:Cluster:cluster_01");
        assert!(req.position.latitude > GeoOrigin::default().lat);
        assert!(req.position.longitude > GeoOrigin::default().lon);

        let unknown = registry.build_request("cluster_99");
        assert_eq!(unknown.position.latitude, GeoOrigin::default().lat);
    }
}
