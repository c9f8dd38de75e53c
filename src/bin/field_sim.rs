//! Field Sensor Simulation
//!
//! Generates dirty sensor readings for the gateway: background noise plus
//! injected outliers, missing values and one frozen sensor.
//!
//! # Usage
//! ```bash
//! ./field-sim --cycles 200 --seed 7 | ./sensor-gateway --stdin
//! ./field-sim --format csv > sensor_data_raw_dirty.csv
//! ```

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use clap::Parser;
use rand::prelude::*;
use rand_distr::{Distribution, Normal};
use std::io::{self, Write};
use std::time::Duration;

use sensor_gateway::config::GatewayConfig;
use sensor_gateway::types::Batch;

// ============================================================================
// Field Baselines
// ============================================================================

/// (metric, mean, spread) for a healthy plot.
const BASELINES: &[(&str, f64, f64)] = &[
    ("temperature", 18.0, 4.0),
    ("soilTemperature", 14.0, 3.0),
    ("humidity", 60.0, 10.0),
    ("soilMoisture", 35.0, 8.0),
    ("azote_mg_kg", 120.0, 30.0),
    ("phosphore_mg_kg", 40.0, 10.0),
    ("potassium_mg_kg", 180.0, 40.0),
    ("ph", 6.5, 0.5),
];

/// Chance per reading of an extreme value
const PROB_OUTLIER: f64 = 0.02;
/// Chance per reading of a missing value
const PROB_MISSING: f64 = 0.03;
/// Multipliers applied to produce an outlier
const OUTLIER_FACTORS: [f64; 3] = [-1.0, 0.2, 5.0];

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "field-sim")]
#[command(about = "Dirty field sensor data generator for sensor-gateway testing")]
#[command(version = "1.0")]
struct Args {
    /// Number of cycles to generate
    #[arg(short, long, default_value = "100")]
    cycles: u32,

    /// Simulated time between cycles (seconds)
    #[arg(long, default_value = "3600")]
    interval_secs: i64,

    /// Real delay between emitted cycles (ms)
    #[arg(long, default_value = "0")]
    delay_ms: u64,

    /// Output format: json or csv
    #[arg(short, long, default_value = "json")]
    format: String,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Suppress the injection log on stderr
    #[arg(short, long)]
    quiet: bool,
}

// ============================================================================
// Simulation State
// ============================================================================

struct FieldSimulation {
    rng: StdRng,
    devices: Vec<String>,
    /// Per-device offset from the field baseline, indexed like BASELINES
    offsets: Vec<Vec<f64>>,
    frozen_device: usize,
    frozen_metric: usize,
    freeze_from_cycle: u32,
    frozen_value: Option<f64>,
    injected_outliers: u64,
    injected_missing: u64,
}

impl FieldSimulation {
    fn new(devices: Vec<String>, cycles: u32, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };

        let offsets = devices
            .iter()
            .map(|_| {
                BASELINES
                    .iter()
                    .map(|(_, _, spread)| rng.gen_range(-spread..=*spread))
                    .collect()
            })
            .collect();

        let frozen_device = rng.gen_range(0..devices.len().max(1));
        let frozen_metric = rng.gen_range(0..BASELINES.len());
        let freeze_from_cycle = rng.gen_range(0..cycles.max(1));

        Self {
            rng,
            devices,
            offsets,
            frozen_device,
            frozen_metric,
            freeze_from_cycle,
            frozen_value: None,
            injected_outliers: 0,
            injected_missing: 0,
        }
    }

    fn reading(&mut self, device: usize, metric: usize, cycle: u32) -> Option<f64> {
        let (_, mean, spread) = BASELINES[metric];
        let noise = Normal::new(0.0, spread * 0.1).map_or(0.0, |n| n.sample(&mut self.rng));
        let mut value = Some(mean + self.offsets[device][metric] + noise);

        let dice: f64 = self.rng.gen();
        if dice < PROB_OUTLIER {
            let factor = OUTLIER_FACTORS[self.rng.gen_range(0..OUTLIER_FACTORS.len())];
            value = value.map(|v| v * factor);
            self.injected_outliers += 1;
        } else if dice < PROB_OUTLIER + PROB_MISSING {
            value = None;
            self.injected_missing += 1;
        }

        if device == self.frozen_device && metric == self.frozen_metric && cycle >= self.freeze_from_cycle {
            let frozen = *self.frozen_value.get_or_insert(value.unwrap_or(mean));
            value = Some(frozen);
        }

        value.map(|v| (v * 100.0).round() / 100.0)
    }

    fn batch(&mut self, cycle: u32, timestamp: chrono::DateTime<Utc>) -> Batch {
        let mut batch = Batch::new(timestamp);
        for d in 0..self.devices.len() {
            for m in 0..BASELINES.len() {
                let value = self.reading(d, m, cycle);
                let device = self.devices[d].clone();
                batch.push(&device, BASELINES[m].0, value);
            }
        }
        batch
    }
}

fn log_mission(message: &str, quiet: bool) {
    if !quiet {
        eprintln!("[field-sim] {}", message);
    }
}

fn write_csv_header(out: &mut impl Write) -> io::Result<()> {
    let metrics: Vec<&str> = BASELINES.iter().map(|(m, _, _)| *m).collect();
    writeln!(out, "timestamp,cluster_id,{}", metrics.join(","))
}

fn write_csv_rows(out: &mut impl Write, batch: &Batch) -> io::Result<()> {
    let ts = batch.timestamp.format("%Y-%m-%d %H:%M:%S");
    for chunk in batch.readings.chunks(BASELINES.len()) {
        let Some(first) = chunk.first() else { continue };
        let cells: Vec<String> = chunk
            .iter()
            .map(|r| r.value.map(|v| v.to_string()).unwrap_or_default())
            .collect();
        writeln!(out, "{},{},{}", ts, first.device_id, cells.join(","))?;
    }
    Ok(())
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let csv = args.format == "csv";

    let devices: Vec<String> = GatewayConfig::default().devices.into_keys().collect();
    let mut sim = FieldSimulation::new(devices, args.cycles, args.seed);

    log_mission(
        &format!(
            "{} devices x {} metrics, {} cycles",
            sim.devices.len(),
            BASELINES.len(),
            args.cycles
        ),
        args.quiet,
    );
    log_mission(
        &format!(
            "Sensor {}/{} freezes from cycle {}",
            sim.devices.get(sim.frozen_device).map_or("-", String::as_str),
            BASELINES[sim.frozen_metric].0,
            sim.freeze_from_cycle
        ),
        args.quiet,
    );

    let stdout = io::stdout();
    let mut out = stdout.lock();
    if csv {
        write_csv_header(&mut out)?;
    }

    let start = Utc
        .with_ymd_and_hms(2025, 6, 1, 0, 0, 0)
        .single()
        .unwrap_or_else(Utc::now);

    for cycle in 0..args.cycles {
        let ts = start + ChronoDuration::seconds(args.interval_secs * i64::from(cycle));
        let batch = sim.batch(cycle, ts);

        if csv {
            write_csv_rows(&mut out, &batch)?;
        } else {
            writeln!(out, "{}", serde_json::to_string(&batch)?)?;
        }
        out.flush()?;

        if args.delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(args.delay_ms));
        }
    }

    log_mission(
        &format!(
            "Done: {} outliers, {} missing values injected",
            sim.injected_outliers, sim.injected_missing
        ),
        args.quiet,
    );
    Ok(())
}
