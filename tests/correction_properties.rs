//! Correction Pipeline Property Tests
//!
//! Black-box checks of the per-reading correction contract, driven through
//! the public `CorrectionPipeline` and `DeviceRegistry` APIs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sensor_gateway::config::GatewayConfig;
use sensor_gateway::delivery::{DeliveryError, ProvisionOutcome, Provisioner, ProvisioningRequest};
use sensor_gateway::gateway::{
    CorrectionPipeline, CorrectionPolicy, DeviceRegistry, GeoOrigin, RegistrySettings,
    ThresholdTable,
};
use sensor_gateway::types::{CorrectionStatus, DeviceState};

const SENTINEL: f64 = -0.001;

fn pipeline() -> CorrectionPipeline {
    CorrectionPipeline::new(Arc::new(ThresholdTable::default()), CorrectionPolicy::default())
}

// ============================================================================
// Empty-history behaviour
// ============================================================================

#[test]
fn in_range_value_with_empty_history_is_returned_unchanged() {
    let table = ThresholdTable::default();
    for (metric, range) in table.iter() {
        for v in [range.min, range.midpoint(), range.max] {
            let mut p = pipeline();
            let r = p.clean("cluster_01", metric, Some(v));
            assert_eq!(r.status, CorrectionStatus::Ok, "{metric}={v}");
            assert_eq!(r.value, v, "{metric}={v}");
            assert!(r.escalation.is_none());
        }
    }
}

#[test]
fn missing_value_with_empty_history_is_range_midpoint() {
    let table = ThresholdTable::default();
    for (metric, range) in table.iter() {
        let mut p = pipeline();
        let r = p.clean("cluster_01", metric, None);
        assert_eq!(r.status, CorrectionStatus::Default, "{metric}");
        assert_eq!(r.value, (range.min + range.max) / 2.0, "{metric}");
        // Nothing was learned
        assert!(p.state("cluster_01", metric).map_or(true, |s| s.window.is_empty()));
    }
}

#[test]
fn nan_is_treated_as_missing() {
    let mut p = pipeline();
    let r = p.clean("cluster_01", "ph", Some(f64::NAN));
    assert_eq!(r.status, CorrectionStatus::Default);
    assert_eq!(r.value, 6.5);
}

#[test]
fn temperature_outlier_with_empty_history_is_clamped_to_max() {
    let mut p = pipeline();
    let r = p.clean("cluster_01", "temperature", Some(1000.0));
    assert_eq!(r.status, CorrectionStatus::Clipped);
    assert_eq!(r.value, 70.0);

    let r = p.clean("cluster_02", "temperature", Some(-40.0));
    assert_eq!(r.status, CorrectionStatus::Clipped);
    assert_eq!(r.value, -15.0);
}

// ============================================================================
// History-dependent behaviour
// ============================================================================

#[test]
fn missing_value_is_imputed_from_history_without_appending() {
    let mut p = pipeline();
    p.seed_history("cluster_01", "temperature", &[20.0, 21.0, 19.0]);

    let r = p.clean("cluster_01", "temperature", None);
    assert_eq!(r.status, CorrectionStatus::FixedNan);
    assert_eq!(r.value, 20.0);

    let state = p.state("cluster_01", "temperature").unwrap();
    assert_eq!(state.window.len(), 3);
    assert_eq!(state.missing_streak, 1);
}

#[test]
fn outlier_with_history_is_replaced_by_mean() {
    let mut p = pipeline();
    p.seed_history("cluster_01", "humidity", &[50.0, 60.0]);

    let r = p.clean("cluster_01", "humidity", Some(250.0));
    assert_eq!(r.status, CorrectionStatus::FixedOutlier);
    assert_eq!(r.value, 55.0);
    assert_eq!(p.state("cluster_01", "humidity").unwrap().window.len(), 2);
}

#[test]
fn window_never_exceeds_capacity() {
    let mut p = pipeline();
    for i in 0..50 {
        p.clean("cluster_01", "soilMoisture", Some(20.0 + f64::from(i % 7)));
        let state = p.state("cluster_01", "soilMoisture").unwrap();
        assert!(state.window.len() <= 5);
        assert!(state.window.values().iter().all(|v| v.is_finite()));
    }
}

// ============================================================================
// Sensor-health escalation
// ============================================================================

#[test]
fn frozen_sensor_escalates_on_sixth_identical_reading() {
    let mut p = pipeline();
    p.seed_history("cluster_03", "soilTemperature", &[10.0; 5]);

    for call in 1..=5 {
        let r = p.clean("cluster_03", "soilTemperature", Some(10.0));
        assert_eq!(r.status, CorrectionStatus::Ok, "call {call}");
        assert_eq!(r.value, 10.0, "call {call}");
        assert!(r.escalation.is_none(), "call {call}");
    }

    let r = p.clean("cluster_03", "soilTemperature", Some(10.0));
    assert_eq!(r.status, CorrectionStatus::FixedFreeze);
    assert_eq!(r.value, SENTINEL);
    let event = r.escalation.expect("ERROR_FROZEN escalation");
    assert_eq!(event.new_state, DeviceState::ErrorFrozen);
    assert_eq!(event.device_id, "cluster_03");
    assert_eq!(event.metric, "soilTemperature");

    // Still frozen, but the transition is announced only once
    let r = p.clean("cluster_03", "soilTemperature", Some(10.0));
    assert_eq!(r.status, CorrectionStatus::FixedFreeze);
    assert!(r.escalation.is_none());
}

#[test]
fn changed_reading_clears_freeze_streak() {
    let mut p = pipeline();
    p.seed_history("cluster_03", "ph", &[6.0; 5]);
    for _ in 0..5 {
        p.clean("cluster_03", "ph", Some(6.0));
    }
    let r = p.clean("cluster_03", "ph", Some(6.2));
    assert_eq!(r.status, CorrectionStatus::Ok);
    assert_eq!(p.state("cluster_03", "ph").unwrap().freeze_streak, 0);
}

#[test]
fn silent_sensor_escalates_once_and_stays_broken_without_recovery_event() {
    let mut p = pipeline();
    p.seed_history("cluster_04", "azote_mg_kg", &[100.0, 110.0]);

    for call in 1..=5 {
        let r = p.clean("cluster_04", "azote_mg_kg", None);
        assert_eq!(r.status, CorrectionStatus::FixedNan, "call {call}");
        assert!(r.escalation.is_none(), "call {call}");
    }

    let r = p.clean("cluster_04", "azote_mg_kg", None);
    assert_eq!(r.status, CorrectionStatus::FixedBroken);
    assert_eq!(r.value, SENTINEL);
    assert_eq!(
        r.escalation.map(|e| e.new_state),
        Some(DeviceState::ErrorBroken)
    );

    let r = p.clean("cluster_04", "azote_mg_kg", None);
    assert_eq!(r.status, CorrectionStatus::FixedBroken);
    assert!(r.escalation.is_none());

    // One valid reading: corrected normally, but no recovery transition is
    // emitted. The downstream device state stays ERROR_BROKEN until an
    // operator intervenes.
    let r = p.clean("cluster_04", "azote_mg_kg", Some(105.0));
    assert_eq!(r.status, CorrectionStatus::Ok);
    assert!(r.escalation.is_none());
}

#[test]
fn streams_are_independent_per_device_and_metric() {
    let mut p = pipeline();
    p.seed_history("cluster_01", "ph", &[7.0; 5]);
    for _ in 0..6 {
        p.clean("cluster_01", "ph", Some(7.0));
    }
    let other_metric = p.clean("cluster_01", "humidity", Some(40.0));
    let other_device = p.clean("cluster_02", "ph", Some(7.0));
    assert_eq!(other_metric.status, CorrectionStatus::Ok);
    assert_eq!(other_device.status, CorrectionStatus::Ok);
    assert_eq!(p.tracked_streams(), 3);
}

// ============================================================================
// Provisioning gate
// ============================================================================

#[derive(Default)]
struct CountingProvisioner {
    calls: AtomicU64,
}

#[async_trait]
impl Provisioner for CountingProvisioner {
    async fn provision(
        &self,
        _request: &ProvisioningRequest,
    ) -> Result<ProvisionOutcome, DeliveryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ProvisionOutcome::Created)
    }
}

#[tokio::test]
async fn ensure_known_provisions_at_most_once() {
    let provisioner = Arc::new(CountingProvisioner::default());
    let settings = RegistrySettings {
        origin: GeoOrigin::default(),
        positions: Arc::new(BTreeMap::new()),
        entity_prefix: "urn:ngsi-ld:Cluster:".to_string(),
        entity_type: "Cluster".to_string(),
        timeout: Duration::from_secs(1),
    };
    let mut registry = DeviceRegistry::new(provisioner.clone(), settings);

    assert!(registry.ensure_known("cluster_07").await);
    assert!(registry.ensure_known("cluster_07").await);
    assert_eq!(provisioner.calls.load(Ordering::SeqCst), 1);
    assert!(registry.is_known("cluster_07"));
}

#[tokio::test]
async fn ensure_known_uses_configured_grid_position() {
    let provisioner = Arc::new(CountingProvisioner::default());
    let config = GatewayConfig::default();
    let registry = DeviceRegistry::new(provisioner, config.registry_settings());

    let request = registry.build_request("cluster_05");
    // 91 grid units east, 28 north of the origin
    assert!(request.position.longitude > config.origin.lon);
    assert!(request.position.latitude > config.origin.lat);
    assert_eq!(request.entity_name, "urn:ngsi-ld:Cluster:cluster_05");
}
