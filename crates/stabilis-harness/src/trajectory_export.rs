//! Per-tick export rows and the artifact index.
//!
//! One [`TrajectoryRow`] per tick carries the stability vector, the decision
//! and every queueing snapshot field, enough to rebuild the trajectory
//! without recomputation. `E[W] = +∞` is written as `null`.

use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use stabilis_engine::monitor::TickRecord;

use crate::error::Result;
use crate::structured_log::now_utc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrajectoryRow {
    pub session_id: String,
    pub tick: u64,
    pub timestamp: f64,
    // Stability vector
    pub capacity: f64,
    pub load: f64,
    pub quality: f64,
    pub resources: f64,
    pub anomaly: f64,
    pub sust: f64,
    pub status: String,
    // Decision
    pub mode: u8,
    pub action: String,
    pub triggering_component: String,
    pub valid: bool,
    pub degradations: Vec<String>,
    // Queueing snapshot
    pub arrival_rate: f64,
    pub offered_load: f64,
    pub utilization: f64,
    pub wait_probability: f64,
    pub blocking_probability: f64,
    pub loss_fraction: f64,
    pub expected_wait: Option<f64>,
    pub expected_time_to_failure: f64,
    pub expected_queue_length: f64,
    pub throughput: f64,
    pub service_cv2: f64,
    // Context
    pub markov_state: String,
    pub anomaly_detected: bool,
    pub anomaly_confidence: f64,
    pub sla_compliant: bool,
}

impl TrajectoryRow {
    #[must_use]
    pub fn from_record(session_id: &str, r: &TickRecord) -> Self {
        let [capacity, load, quality, resources, anomaly] = r.vector.components;
        let s = &r.snapshot;
        let d = &r.decision;
        Self {
            session_id: session_id.to_string(),
            tick: r.tick,
            timestamp: r.timestamp,
            capacity,
            load,
            quality,
            resources,
            anomaly,
            sust: r.vector.sust,
            status: r.vector.status.as_str().to_string(),
            mode: d.mode.number(),
            action: d.mode.action().to_string(),
            triggering_component: d.triggering_component.symbol().to_string(),
            valid: d.valid,
            degradations: d.degradations.iter().map(|g| g.as_str().to_string()).collect(),
            arrival_rate: s.arrival_rate,
            offered_load: s.offered_load,
            utilization: s.utilization,
            wait_probability: s.wait_probability,
            blocking_probability: s.blocking_probability,
            loss_fraction: s.loss_fraction,
            expected_wait: s.expected_wait.is_finite().then_some(s.expected_wait),
            expected_time_to_failure: s.expected_time_to_failure,
            expected_queue_length: s.expected_queue_length,
            throughput: s.throughput,
            service_cv2: s.service_cv2,
            markov_state: r.markov.state.as_str().to_string(),
            anomaly_detected: r.anomaly.is_anomaly(),
            anomaly_confidence: r.anomaly.verdict().map_or(0.0, |v| v.confidence),
            sla_compliant: r.sla.is_compliant(),
        }
    }

    /// `E[W]` with `null` mapped back to `+∞`.
    #[must_use]
    pub fn expected_wait_or_inf(&self) -> f64 {
        self.expected_wait.unwrap_or(f64::INFINITY)
    }
}

#[must_use]
pub fn rows_for(session_id: &str, records: &[TickRecord]) -> Vec<TrajectoryRow> {
    records
        .iter()
        .map(|r| TrajectoryRow::from_record(session_id, r))
        .collect()
}

/// Write rows as JSONL.
pub fn write_jsonl(path: &Path, rows: &[TrajectoryRow]) -> Result<()> {
    let mut w = BufWriter::new(std::fs::File::create(path)?);
    for row in rows {
        serde_json::to_writer(&mut w, row)?;
        w.write_all(b"\n")?;
    }
    w.flush()?;
    Ok(())
}

pub fn read_jsonl(path: &Path) -> Result<Vec<TrajectoryRow>> {
    let reader = BufReader::new(std::fs::File::open(path)?);
    let mut rows = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        rows.push(serde_json::from_str(&line)?);
    }
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Artifact index
// ---------------------------------------------------------------------------

#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// A single artifact entry in the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub path: String,
    pub kind: String,
    pub sha256: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Index of the files a run produced, with integrity digests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactIndex {
    pub index_version: u32,
    pub run_id: String,
    pub generated_utc: String,
    /// Hex BLAKE3 trajectory fingerprint of the run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    pub artifacts: Vec<ArtifactEntry>,
}

impl ArtifactIndex {
    #[must_use]
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            index_version: 1,
            run_id: run_id.into(),
            generated_utc: now_utc(),
            fingerprint: None,
            artifacts: Vec::new(),
        }
    }

    /// Hash the file at `path` and add it.
    pub fn add_file(&mut self, path: &Path, kind: impl Into<String>) -> Result<&mut Self> {
        let bytes = std::fs::read(path)?;
        self.artifacts.push(ArtifactEntry {
            path: path.display().to_string(),
            kind: kind.into(),
            sha256: sha256_hex(&bytes),
            size_bytes: Some(bytes.len() as u64),
            description: None,
        });
        Ok(self)
    }

    /// Re-hash every listed file; returns the paths whose digest changed or
    /// that can no longer be read.
    #[must_use]
    pub fn verify(&self) -> Vec<String> {
        self.artifacts
            .iter()
            .filter(|a| std::fs::read(&a.path).map_or(true, |b| sha256_hex(&b) != a.sha256))
            .map(|a| a.path.clone())
            .collect()
    }

    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
