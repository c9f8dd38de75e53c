//! Batch source abstraction for sensor ingestion.
//!
//! A unified trait for reading reading batches from different sources:
//! CSV files (replay) and stdin (JSON, one batch per line).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use crate::types::Batch;

/// Column holding the cycle time.
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// Column holding the device id.
pub const DEVICE_COLUMN: &str = "cluster_id";

/// Events produced by a batch source.
#[derive(Debug)]
pub enum BatchEvent {
    /// One cycle's worth of readings.
    Batch(Batch),
    /// Source reached end of data.
    Eof,
}

/// Trait abstracting where reading batches come from.
///
/// Implementations handle format parsing and pacing internally. The runner
/// calls [`next_batch`](BatchSource::next_batch) in a `select!` with
/// cancellation.
#[async_trait]
pub trait BatchSource: Send + 'static {
    /// Read the next batch. Returns `BatchEvent::Eof` when exhausted.
    async fn next_batch(&mut self) -> Result<BatchEvent>;

    /// Human-readable name for logging.
    fn source_name(&self) -> &str;
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV input is empty")]
    Empty,

    #[error("CSV header is missing required column '{0}'")]
    MissingColumn(&'static str),
}

// ============================================================================
// CSV Replay Source
// ============================================================================

/// Replays a dirty sensor CSV as timestamp-ordered batches.
///
/// Rows are grouped by timestamp and ordered by `(timestamp, device)`.
/// Empty, `nan` and unparseable cells become missing readings.
#[derive(Debug)]
pub struct CsvReplaySource {
    batches: std::vec::IntoIter<Batch>,
    delay_ms: u64,
    yielded_first: bool,
}

impl CsvReplaySource {
    pub fn new(batches: Vec<Batch>, delay_ms: u64) -> Self {
        Self {
            batches: batches.into_iter(),
            delay_ms,
            yielded_first: false,
        }
    }

    /// Load a CSV file. When `metrics` is given, only those columns are
    /// replayed; otherwise every non-key column is a metric.
    pub fn load(path: &Path, metrics: Option<&[&str]>, delay_ms: u64) -> Result<Self, SourceError> {
        let text = std::fs::read_to_string(path).map_err(|source| SourceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let batches = parse_csv_batches(&text, metrics)?;
        info!(
            path = %path.display(),
            batches = batches.len(),
            "Loaded CSV replay"
        );
        Ok(Self::new(batches, delay_ms))
    }

    /// Batches not yet yielded.
    pub fn remaining(&self) -> usize {
        self.batches.len()
    }
}

#[async_trait]
impl BatchSource for CsvReplaySource {
    async fn next_batch(&mut self) -> Result<BatchEvent> {
        if self.yielded_first && self.delay_ms > 0 {
            tokio::time::sleep(tokio::time::Duration::from_millis(self.delay_ms)).await;
        }
        match self.batches.next() {
            Some(b) => {
                self.yielded_first = true;
                Ok(BatchEvent::Batch(b))
            }
            None => Ok(BatchEvent::Eof),
        }
    }

    fn source_name(&self) -> &str {
        "CSV"
    }
}

/// Parse CSV text into batches sorted by timestamp, rows within a batch
/// sorted by device id.
pub fn parse_csv_batches(text: &str, metrics: Option<&[&str]>) -> Result<Vec<Batch>, SourceError> {
    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    let header = lines.next().ok_or(SourceError::Empty)?;
    let columns: Vec<String> = csv_split(header)
        .into_iter()
        .map(|c| c.trim().to_string())
        .collect();

    let ts_idx = columns
        .iter()
        .position(|c| c == TIMESTAMP_COLUMN)
        .ok_or(SourceError::MissingColumn(TIMESTAMP_COLUMN))?;
    let dev_idx = columns
        .iter()
        .position(|c| c == DEVICE_COLUMN)
        .ok_or(SourceError::MissingColumn(DEVICE_COLUMN))?;

    let metric_cols: Vec<(usize, &str)> = columns
        .iter()
        .enumerate()
        .filter(|(i, name)| *i != ts_idx && *i != dev_idx && !name.is_empty())
        .filter(|(_, name)| metrics.map_or(true, |m| m.contains(&name.as_str())))
        .map(|(i, name)| (i, name.as_str()))
        .collect();

    let mut rows: BTreeMap<(DateTime<Utc>, String), Vec<(String, Option<f64>)>> = BTreeMap::new();
    let mut skipped = 0usize;

    for (line_no, line) in lines.enumerate() {
        let fields = csv_split(line);
        let Some(ts) = fields.get(ts_idx).and_then(|s| parse_timestamp(s)) else {
            skipped += 1;
            warn!(line = line_no + 2, "Skipping CSV row with unparseable timestamp");
            continue;
        };
        let device = fields.get(dev_idx).map(|s| s.trim()).unwrap_or_default();
        if device.is_empty() {
            skipped += 1;
            warn!(line = line_no + 2, "Skipping CSV row without device id");
            continue;
        }

        let values = metric_cols
            .iter()
            .map(|(i, name)| ((*name).to_string(), fields.get(*i).and_then(|s| parse_cell(s))))
            .collect();
        if rows.insert((ts, device.to_string()), values).is_some() {
            warn!(
                line = line_no + 2,
                device = %device,
                timestamp = %ts,
                "Duplicate CSV row replaces an earlier one"
            );
        }
    }

    if skipped > 0 {
        warn!(skipped, "CSV rows skipped");
    }

    let mut batches: Vec<Batch> = Vec::new();
    for ((ts, device), values) in rows {
        if batches.last().map_or(true, |b| b.timestamp != ts) {
            batches.push(Batch::new(ts));
        }
        if let Some(batch) = batches.last_mut() {
            for (metric, value) in values {
                batch.push(&device, &metric, value);
            }
        }
    }
    Ok(batches)
}

/// A numeric cell, or `None` for empty / `nan` / garbage.
fn parse_cell(cell: &str) -> Option<f64> {
    let cell = cell.trim();
    if cell.is_empty() {
        return None;
    }
    cell.parse::<f64>().ok().filter(|v| !v.is_nan())
}

/// Accepts RFC 3339 and the naive `YYYY-MM-DD[ HH:MM:SS]` forms pandas writes.
/// Naive times are taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Split a CSV line respecting quoted fields.
fn csv_split(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(ch),
        }
    }
    fields.push(current);
    fields
}

// ============================================================================
// Stdin Source (JSON batches, one per line)
// ============================================================================

/// Reads JSON-encoded [`Batch`]es from stdin.
///
/// `python send-data.py | sensor-gateway --stdin`
pub struct StdinSource {
    reader: Box<dyn tokio::io::AsyncBufRead + Unpin + Send>,
    line_buffer: String,
}

impl StdinSource {
    pub fn new() -> Self {
        Self::from_reader(tokio::io::BufReader::new(tokio::io::stdin()))
    }

    /// Same line protocol over any buffered reader.
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: tokio::io::AsyncBufRead + Unpin + Send + 'static,
    {
        Self {
            reader: Box::new(reader),
            line_buffer: String::with_capacity(4096),
        }
    }
}

impl Default for StdinSource {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode one stdin line. A missing reading is `null` or an absent `value`.
pub fn parse_batch_line(line: &str) -> Result<Batch, serde_json::Error> {
    serde_json::from_str::<Batch>(line)
}

#[async_trait]
impl BatchSource for StdinSource {
    async fn next_batch(&mut self) -> Result<BatchEvent> {
        use tokio::io::AsyncBufReadExt;
        loop {
            self.line_buffer.clear();
            let bytes = self.reader.read_line(&mut self.line_buffer).await?;
            if bytes == 0 {
                return Ok(BatchEvent::Eof);
            }
            let line = self.line_buffer.trim();
            if line.is_empty() {
                continue;
            }
            match parse_batch_line(line) {
                Ok(batch) => return Ok(BatchEvent::Batch(batch)),
                Err(e) => {
                    warn!("[StdinSource] Failed to parse batch: {}", e);
                }
            }
        }
    }

    fn source_name(&self) -> &str {
        "stdin"
    }
}
