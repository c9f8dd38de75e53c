//! Cycle runner: batch source → per-device workers → delivery.
//!
//! The distribution stage reads batches in arrival order, splits each one
//! by device and hands every device's slice to a dedicated worker task over
//! a bounded channel. Workers own their correction state and provisioning
//! memo, so no mutable state is shared between devices.

pub mod source;
pub mod stats;
pub mod worker;

pub use source::{BatchEvent, BatchSource, CsvReplaySource, SourceError, StdinSource};
pub use stats::RunnerStats;
pub use worker::{DeliverySinks, DeviceCycle, DeviceWorker};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::defaults::WORKER_CHANNEL_CAPACITY;
use crate::config::GatewayConfig;
use crate::gateway::{CorrectionPipeline, CorrectionPolicy, DeviceRegistry, RegistrySettings, ThresholdTable};
use crate::types::{Batch, Reading};

/// Everything a worker needs besides the sinks.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub thresholds: Arc<ThresholdTable>,
    pub policy: CorrectionPolicy,
    pub registry: RegistrySettings,
    pub delivery_timeout: Duration,
    pub channel_capacity: usize,
}

impl RunnerSettings {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            thresholds: Arc::new(config.thresholds.clone()),
            policy: config.correction.clone(),
            registry: config.registry_settings(),
            delivery_timeout: config.delivery.timeout(),
            channel_capacity: WORKER_CHANNEL_CAPACITY,
        }
    }
}

/// Splits a batch into per-device cycles, devices in first-seen order.
pub fn partition(batch: Batch) -> Vec<DeviceCycle> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut cycles: Vec<DeviceCycle> = Vec::new();

    for reading in batch.readings {
        let slot = match index.get(&reading.device_id) {
            Some(&i) => i,
            None => {
                index.insert(reading.device_id.clone(), cycles.len());
                cycles.push(DeviceCycle {
                    device_id: reading.device_id.clone(),
                    timestamp: batch.timestamp,
                    readings: Vec::new(),
                });
                cycles.len() - 1
            }
        };
        cycles[slot].readings.push(Reading {
            cycle_time: batch.timestamp,
            ..reading
        });
    }
    cycles
}

/// Drives one run from a [`BatchSource`] to completion or cancellation.
pub struct CycleRunner {
    settings: RunnerSettings,
    sinks: DeliverySinks,
    cancel_token: CancellationToken,
    workers: HashMap<String, mpsc::Sender<DeviceCycle>>,
    tasks: JoinSet<RunnerStats>,
    batches: u64,
}

impl CycleRunner {
    pub fn new(settings: RunnerSettings, sinks: DeliverySinks, cancel_token: CancellationToken) -> Self {
        Self {
            settings,
            sinks,
            cancel_token,
            workers: HashMap::new(),
            tasks: JoinSet::new(),
            batches: 0,
        }
    }

    /// Run until the source is exhausted or cancellation, then let every
    /// worker drain its queue. Returns the merged statistics.
    pub async fn run<S: BatchSource + ?Sized>(mut self, source: &mut S) -> RunnerStats {
        info!("Processing batches from {}", source.source_name());

        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => {
                    info!("[CycleRunner] Shutdown signal received");
                    break;
                }
                result = source.next_batch() => {
                    match result {
                        Ok(ev) => ev,
                        Err(e) => {
                            warn!("[CycleRunner] Source error: {}", e);
                            break;
                        }
                    }
                }
            };

            let batch = match event {
                BatchEvent::Batch(b) => b,
                BatchEvent::Eof => {
                    info!("[CycleRunner] Source reached end ({} batches)", self.batches);
                    break;
                }
            };

            self.batches += 1;
            if !self.dispatch(batch).await {
                break;
            }

            if self.batches % 10 == 0 {
                info!(
                    batches = self.batches,
                    devices = self.workers.len(),
                    "Progress"
                );
            }
        }

        self.finish().await
    }

    /// Send each device's slice to its worker. Returns `false` if cancelled
    /// while waiting on a full channel.
    async fn dispatch(&mut self, batch: Batch) -> bool {
        for cycle in partition(batch) {
            let device_id = cycle.device_id.clone();
            let tx = self.sender_for(&device_id);
            let sent = tokio::select! {
                biased;
                _ = self.cancel_token.cancelled() => return false,
                sent = tx.send(cycle) => sent,
            };
            if sent.is_err() {
                warn!(device = %device_id, "Worker gone, cycle discarded");
                self.workers.remove(&device_id);
            }
        }
        true
    }

    fn sender_for(&mut self, device_id: &str) -> mpsc::Sender<DeviceCycle> {
        if let Some(tx) = self.workers.get(device_id) {
            return tx.clone();
        }

        let (tx, rx) = mpsc::channel(self.settings.channel_capacity.max(1));
        let pipeline = CorrectionPipeline::new(
            Arc::clone(&self.settings.thresholds),
            self.settings.policy.clone(),
        );
        let registry = DeviceRegistry::new(
            Arc::clone(&self.sinks.provisioner),
            self.settings.registry.clone(),
        );
        let worker = DeviceWorker::new(
            device_id,
            pipeline,
            registry,
            &self.sinks,
            self.settings.delivery_timeout,
        );
        self.tasks.spawn(worker.run(rx));
        info!(device = %device_id, "Spawned device worker");

        self.workers.insert(device_id.to_string(), tx.clone());
        tx
    }

    async fn finish(mut self) -> RunnerStats {
        // Closing the channels lets each worker drain and exit
        self.workers.clear();

        let mut stats = RunnerStats {
            batches: self.batches,
            ..RunnerStats::default()
        };
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(worker_stats) => stats.merge(&worker_stats),
                Err(e) => warn!("Device worker failed: {}", e),
            }
        }

        log_final_stats(&stats);
        stats
    }
}

fn log_final_stats(stats: &RunnerStats) {
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("FINAL STATISTICS");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("   Batches:              {}", stats.batches);
    info!("   Devices:              {}", stats.devices);
    info!("   Readings:             {}", stats.readings);
    for (status, n) in &stats.by_status {
        info!("     {:<18} {}", status.label(), n);
    }
    info!("   Escalations:          {}", stats.escalations);
    info!("   Payloads delivered:   {}", stats.payloads_delivered);
    info!("   Payloads dropped:     {}", stats.payloads_dropped);
    info!("   Provisioning failures: {}", stats.provisioning_failures);
}
