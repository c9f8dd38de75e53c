//! Cycle Runner Integration Tests
//!
//! Drives whole batches through `CycleRunner` with in-memory recording
//! sinks standing in for the FIWARE platform.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use sensor_gateway::config::GatewayConfig;
use sensor_gateway::delivery::{
    ContextSink, DeliveryError, IngestionSink, MeasurementPayload, ProvisionOutcome, Provisioner,
    ProvisioningRequest,
};
use sensor_gateway::runner::{CsvReplaySource, CycleRunner, DeliverySinks, RunnerSettings};
use sensor_gateway::types::{Batch, CorrectionStatus, DeviceState, EscalationEvent};

// ============================================================================
// Recording sinks
// ============================================================================

#[derive(Default)]
struct RecordingPlatform {
    measurements: Mutex<Vec<(String, MeasurementPayload)>>,
    states: Mutex<Vec<EscalationEvent>>,
    provision_calls: AtomicU64,
    /// Devices whose provisioning is rejected
    reject: Mutex<Vec<String>>,
    /// Make every ingestion call hang past the timeout
    stall_ingestion: AtomicBool,
}

impl RecordingPlatform {
    fn payloads_for(&self, device: &str) -> Vec<MeasurementPayload> {
        self.measurements
            .lock()
            .unwrap()
            .iter()
            .filter(|(d, _)| d == device)
            .map(|(_, p)| p.clone())
            .collect()
    }
}

#[async_trait]
impl IngestionSink for RecordingPlatform {
    async fn push_measurement(
        &self,
        device_id: &str,
        payload: &MeasurementPayload,
    ) -> Result<(), DeliveryError> {
        if self.stall_ingestion.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        self.measurements
            .lock()
            .unwrap()
            .push((device_id.to_string(), payload.clone()));
        Ok(())
    }
}

#[async_trait]
impl ContextSink for RecordingPlatform {
    async fn push_state(&self, event: &EscalationEvent) -> Result<(), DeliveryError> {
        self.states.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[async_trait]
impl Provisioner for RecordingPlatform {
    async fn provision(
        &self,
        request: &ProvisioningRequest,
    ) -> Result<ProvisionOutcome, DeliveryError> {
        self.provision_calls.fetch_add(1, Ordering::SeqCst);
        if self.reject.lock().unwrap().contains(&request.device_id) {
            return Ok(ProvisionOutcome::from_status(500, "boom".to_string()));
        }
        Ok(ProvisionOutcome::AlreadyExists)
    }
}

fn settings() -> RunnerSettings {
    let mut settings = RunnerSettings::from_config(&GatewayConfig::default());
    settings.delivery_timeout = Duration::from_millis(100);
    settings
}

fn batch(hour: u32, rows: &[(&str, &str, Option<f64>)]) -> Batch {
    let ts = Utc.with_ymd_and_hms(2025, 6, 1, hour, 0, 0).unwrap();
    let mut batch = Batch::new(ts);
    for (device, metric, value) in rows {
        batch.push(device, metric, *value);
    }
    batch
}

async fn run(platform: &Arc<RecordingPlatform>, batches: Vec<Batch>) -> sensor_gateway::RunnerStats {
    let runner = CycleRunner::new(
        settings(),
        DeliverySinks::uniform(Arc::clone(platform)),
        CancellationToken::new(),
    );
    let mut source = CsvReplaySource::new(batches, 0);
    runner.run(&mut source).await
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn each_device_gets_one_payload_per_cycle() {
    let platform = Arc::new(RecordingPlatform::default());
    let batches = vec![
        batch(0, &[("cluster_01", "temperature", Some(20.0)), ("cluster_02", "temperature", Some(18.0))]),
        batch(1, &[("cluster_01", "temperature", Some(21.0)), ("cluster_02", "humidity", None)]),
    ];

    let stats = run(&platform, batches).await;

    assert_eq!(stats.batches, 2);
    assert_eq!(stats.devices, 2);
    assert_eq!(stats.device_cycles, 4);
    assert_eq!(stats.readings, 4);
    assert_eq!(stats.payloads_delivered, 4);
    assert_eq!(platform.payloads_for("cluster_01").len(), 2);
    assert_eq!(platform.payloads_for("cluster_02").len(), 2);
    // Provisioned once per device; 409 counts as known
    assert_eq!(platform.provision_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn payload_is_flat_with_attribute_ids_and_initial_context_once() {
    let platform = Arc::new(RecordingPlatform::default());
    let batches = vec![
        batch(0, &[("cluster_01", "temperature", Some(20.123)), ("cluster_01", "ph", None)]),
        batch(1, &[("cluster_01", "temperature", Some(20.123))]),
    ];
    run(&platform, batches).await;

    let payloads = platform.payloads_for("cluster_01");
    assert_eq!(payloads.len(), 2);

    let first = &payloads[0];
    assert_eq!(first.get("date").and_then(|v| v.as_str()), Some("2025-06-01T00:00:00Z"));
    assert_eq!(first.get("ta").and_then(|v| v.as_f64()), Some(20.12));
    assert_eq!(first.get("ph").and_then(|v| v.as_f64()), Some(6.5));
    assert_eq!(first.get("state").and_then(|v| v.as_str()), Some("ACTIVE"));
    assert_eq!(first.get("fieldState").and_then(|v| v.as_i64()), Some(0));
    assert_eq!(
        first.get("irrigationrecommendation").and_then(|v| v.as_str()),
        Some("NO_IRRIGATION")
    );
    assert!(first.get("status").is_none());

    assert!(payloads[1].get("state").is_none());
}

#[tokio::test]
async fn rejected_provisioning_drops_payload_and_retries_next_cycle() {
    let platform = Arc::new(RecordingPlatform::default());
    platform.reject.lock().unwrap().push("cluster_09".to_string());

    let batches = (0..3)
        .map(|h| batch(h, &[("cluster_09", "humidity", Some(50.0)), ("cluster_01", "humidity", Some(50.0))]))
        .collect();
    let stats = run(&platform, batches).await;

    assert!(platform.payloads_for("cluster_09").is_empty());
    assert_eq!(platform.payloads_for("cluster_01").len(), 3);
    assert_eq!(stats.provisioning_failures, 3);
    assert_eq!(stats.payloads_dropped, 3);
    // 3 attempts for the rejected device, 1 for the accepted one
    assert_eq!(platform.provision_calls.load(Ordering::SeqCst), 4);
    // Cleaning still ran for the unprovisioned device
    assert_eq!(stats.readings, 6);
}

#[tokio::test]
async fn frozen_sensor_pushes_one_state_update() {
    let platform = Arc::new(RecordingPlatform::default());
    let batches = (0..10)
        .map(|h| batch(h, &[("cluster_03", "soilMoisture", Some(42.0))]))
        .collect();
    let stats = run(&platform, batches).await;

    let states = platform.states.lock().unwrap().clone();
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].new_state, DeviceState::ErrorFrozen);
    assert_eq!(states[0].device_id, "cluster_03");
    assert_eq!(stats.escalations, 1);
    assert!(stats.count(CorrectionStatus::FixedFreeze) >= 1);

    // Sentinel goes out unrounded
    let last = platform.payloads_for("cluster_03").pop().unwrap();
    assert_eq!(last.get("hs").and_then(|v| v.as_f64()), Some(-0.001));
}

#[tokio::test]
async fn delivery_timeout_drops_payload_but_keeps_state() {
    let platform = Arc::new(RecordingPlatform::default());
    platform.stall_ingestion.store(true, Ordering::SeqCst);

    let batches = vec![
        batch(0, &[("cluster_01", "ph", Some(6.0))]),
        batch(1, &[("cluster_01", "ph", None)]),
    ];
    let stats = run(&platform, batches).await;

    assert_eq!(stats.payloads_delivered, 0);
    assert_eq!(stats.payloads_dropped, 2);
    // The second reading was imputed from the first: history survived the failure
    assert_eq!(stats.count(CorrectionStatus::FixedNan), 1);
}

#[tokio::test]
async fn cancelled_runner_stops_reading_the_source() {
    let platform = Arc::new(RecordingPlatform::default());
    let token = CancellationToken::new();
    token.cancel();

    let runner = CycleRunner::new(
        settings(),
        DeliverySinks::uniform(Arc::clone(&platform)),
        token,
    );
    let mut source = CsvReplaySource::new(vec![batch(0, &[("cluster_01", "ph", Some(6.0))])], 0);
    let stats = runner.run(&mut source).await;

    assert_eq!(stats.batches, 0);
    assert!(platform.measurements.lock().unwrap().is_empty());
}

#[tokio::test]
async fn per_device_order_is_preserved_across_many_batches() {
    let platform = Arc::new(RecordingPlatform::default());
    let batches: Vec<Batch> = (0..20)
        .map(|h| {
            batch(
                h,
                &[
                    ("cluster_01", "temperature", Some(10.0 + f64::from(h))),
                    ("cluster_02", "temperature", Some(30.0 - f64::from(h))),
                ],
            )
        })
        .collect();
    run(&platform, batches).await;

    let mut last_seen: HashMap<String, String> = HashMap::new();
    for (device, payload) in platform.measurements.lock().unwrap().iter() {
        let date = payload.get("date").and_then(|v| v.as_str()).unwrap().to_string();
        if let Some(prev) = last_seen.get(device) {
            assert!(prev < &date, "{device}: {prev} then {date}");
        }
        last_seen.insert(device.clone(), date);
    }
    assert_eq!(last_seen.len(), 2);
}
