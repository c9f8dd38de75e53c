//! Per-device worker: clean, escalate, provision, deliver.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::stats::RunnerStats;
use crate::delivery::{bounded, ContextSink, IngestionSink, MeasurementPayload, Provisioner};
use crate::gateway::{CorrectionPipeline, DeviceRegistry};
use crate::types::{EscalationEvent, Reading};

/// One device's readings for one cycle.
#[derive(Debug, Clone)]
pub struct DeviceCycle {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    pub readings: Vec<Reading>,
}

/// Downstream collaborators shared by every worker.
#[derive(Clone)]
pub struct DeliverySinks {
    pub ingestion: Arc<dyn IngestionSink>,
    pub context: Arc<dyn ContextSink>,
    pub provisioner: Arc<dyn Provisioner>,
}

impl DeliverySinks {
    /// Use one implementation for all three roles.
    pub fn uniform<T>(sink: Arc<T>) -> Self
    where
        T: IngestionSink + ContextSink + Provisioner + 'static,
    {
        Self {
            ingestion: sink.clone(),
            context: sink.clone(),
            provisioner: sink,
        }
    }
}

impl std::fmt::Debug for DeliverySinks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliverySinks").finish_non_exhaustive()
    }
}

/// Owns all mutable state for a single device. Cycles are handled strictly
/// in arrival order.
pub struct DeviceWorker {
    device_id: String,
    pipeline: CorrectionPipeline,
    registry: DeviceRegistry,
    ingestion: Arc<dyn IngestionSink>,
    context: Arc<dyn ContextSink>,
    timeout: Duration,
    context_sent: bool,
    stats: RunnerStats,
}

impl DeviceWorker {
    pub fn new(
        device_id: impl Into<String>,
        pipeline: CorrectionPipeline,
        registry: DeviceRegistry,
        sinks: &DeliverySinks,
        timeout: Duration,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            pipeline,
            registry,
            ingestion: Arc::clone(&sinks.ingestion),
            context: Arc::clone(&sinks.context),
            timeout,
            context_sent: false,
            stats: RunnerStats {
                devices: 1,
                ..RunnerStats::default()
            },
        }
    }

    /// Drain `rx` until every sender is dropped, then return this worker's
    /// counters.
    pub async fn run(mut self, mut rx: mpsc::Receiver<DeviceCycle>) -> RunnerStats {
        while let Some(cycle) = rx.recv().await {
            self.process_cycle(cycle).await;
        }
        debug!(
            device = %self.device_id,
            cycles = self.stats.device_cycles,
            "Worker finished"
        );
        self.stats
    }

    /// Process one cycle. Returns the payload that was handed to the
    /// ingestion sink, or `None` when it was dropped.
    pub async fn process_cycle(&mut self, cycle: DeviceCycle) -> Option<MeasurementPayload> {
        self.stats.device_cycles += 1;
        let mut payload = MeasurementPayload::new(cycle.timestamp);

        for reading in &cycle.readings {
            let result = self.pipeline.clean_at(
                &self.device_id,
                &reading.metric,
                reading.value,
                cycle.timestamp,
            );
            self.stats.record(&result);

            if result.status.is_correction() {
                info!(
                    device = %self.device_id,
                    metric = %reading.metric,
                    raw = ?reading.value,
                    value = result.value,
                    status = %result.status,
                    "Correction applied"
                );
            }

            if let Some(ref event) = result.escalation {
                self.forward_escalation(event).await;
            }

            payload.insert_metric(&reading.metric, &result);
        }

        if !self.registry.ensure_known(&self.device_id).await {
            self.stats.provisioning_failures += 1;
            self.stats.payloads_dropped += 1;
            warn!(device = %self.device_id, "Device not provisioned, payload dropped");
            return None;
        }

        if !self.context_sent {
            payload = payload.with_initial_context();
        }

        match bounded(
            self.timeout,
            self.ingestion.push_measurement(&self.device_id, &payload),
        )
        .await
        {
            Ok(()) => {
                self.stats.payloads_delivered += 1;
                self.context_sent = true;
                debug!(
                    device = %self.device_id,
                    metrics = payload.metric_count(),
                    "Payload delivered"
                );
                Some(payload)
            }
            Err(e) => {
                self.stats.payloads_dropped += 1;
                warn!(device = %self.device_id, error = %e, "Payload delivery failed");
                None
            }
        }
    }

    async fn forward_escalation(&mut self, event: &EscalationEvent) {
        if let Err(e) = bounded(self.timeout, self.context.push_state(event)).await {
            self.stats.escalations_failed += 1;
            warn!(
                device = %event.device_id,
                metric = %event.metric,
                state = %event.new_state,
                error = %e,
                "Failed to forward sensor state"
            );
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn pipeline(&self) -> &CorrectionPipeline {
        &self.pipeline
    }

    pub fn stats(&self) -> &RunnerStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::delivery::{DeliveryError, LogSink};
    use crate::types::CorrectionStatus;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Ingestion sink that rejects its first push and records the rest.
    #[derive(Default)]
    struct FlakyIngestion {
        calls: Mutex<u32>,
        accepted: Mutex<Vec<MeasurementPayload>>,
    }

    #[async_trait]
    impl IngestionSink for FlakyIngestion {
        async fn push_measurement(
            &self,
            _device_id: &str,
            payload: &MeasurementPayload,
        ) -> Result<(), DeliveryError> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            if *calls == 1 {
                return Err(DeliveryError::Transport("connection reset".into()));
            }
            self.accepted.lock().unwrap().push(payload.clone());
            Ok(())
        }
    }

    fn worker() -> DeviceWorker {
        worker_with(DeliverySinks::uniform(Arc::new(LogSink)))
    }

    fn worker_with(sinks: DeliverySinks) -> DeviceWorker {
        let cfg = GatewayConfig::default();
        let pipeline =
            CorrectionPipeline::new(Arc::new(cfg.thresholds.clone()), cfg.correction.clone());
        let registry = DeviceRegistry::new(Arc::clone(&sinks.provisioner), cfg.registry_settings());
        DeviceWorker::new("cluster_01", pipeline, registry, &sinks, Duration::from_secs(1))
    }

    fn cycle(value: Option<f64>) -> DeviceCycle {
        let ts = Utc::now();
        DeviceCycle {
            device_id: "cluster_01".to_string(),
            timestamp: ts,
            readings: vec![Reading::new("cluster_01", "temperature", value, ts)],
        }
    }

    #[tokio::test]
    async fn test_initial_context_only_on_first_payload() {
        let mut w = worker();
        let first = w.process_cycle(cycle(Some(20.0))).await.unwrap();
        let second = w.process_cycle(cycle(Some(21.0))).await.unwrap();
        assert_eq!(first.get("state").and_then(|v| v.as_str()), Some("ACTIVE"));
        assert!(second.get("state").is_none());
        // window [20] + raw 21 → mean 20.5 → 0.7·21 + 0.3·20.5
        let ta = second.get("ta").and_then(|v| v.as_f64()).unwrap();
        assert!((ta - 20.85).abs() < 1e-9, "got {ta}");
    }

    #[tokio::test]
    async fn test_stats_track_statuses() {
        let mut w = worker();
        w.process_cycle(cycle(None)).await;
        w.process_cycle(cycle(Some(500.0))).await;
        let stats = w.stats();
        assert_eq!(stats.device_cycles, 2);
        assert_eq!(stats.count(CorrectionStatus::Default), 1);
        assert_eq!(stats.count(CorrectionStatus::Clipped), 1);
        assert_eq!(stats.payloads_delivered, 2);
    }

    #[tokio::test]
    async fn test_initial_context_resent_after_failed_delivery() {
        let ingestion = Arc::new(FlakyIngestion::default());
        let log = Arc::new(LogSink);
        let mut w = worker_with(DeliverySinks {
            ingestion: ingestion.clone(),
            context: log.clone(),
            provisioner: log,
        });

        assert!(w.process_cycle(cycle(Some(20.0))).await.is_none());
        w.process_cycle(cycle(Some(21.0))).await;
        w.process_cycle(cycle(Some(22.0))).await;

        let accepted = ingestion.accepted.lock().unwrap();
        assert_eq!(accepted.len(), 2);
        assert_eq!(accepted[0].get("state").and_then(|v| v.as_str()), Some("ACTIVE"));
        assert!(accepted[1].get("state").is_none());
        assert_eq!(w.stats().payloads_dropped, 1);
    }
}
