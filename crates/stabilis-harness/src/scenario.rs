//! Deterministic scenario runner.
//!
//! A scenario file describes a traffic curve, a queueing system and monitor
//! settings. The runner samples arrivals with the scenario seed, derives
//! service-time, latency and resource samples from the queueing model,
//! evaluates one tick every `tick_interval` seconds and collects the
//! trajectory. The same file always produces the same fingerprint.

use std::path::Path;
use std::time::Instant;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use stabilis_engine::config::{AnomalyConfig, AnomalyQuorum, MonitorConfig, QueueingConfig};
use stabilis_engine::fingerprint::{Fingerprint, to_hex, trajectory_fingerprint};
use stabilis_engine::metrics::MetricsSnapshot;
use stabilis_engine::monitor::TickRecord;
use stabilis_engine::samples::{
    ArrivalSample, DistributionKind, LatencySample, ResourceSample, ServiceTimeSample,
};
use stabilis_engine::traffic_flow::{AnomalyParams, AnomalyShape, BackgroundParams};
use stabilis_engine::{QueueingModel, SessionId, SessionRegistry, TrafficFlowModel};

use crate::error::{HarnessError, Result};
use crate::structured_log::{LogEmitter, LogEntry, LogLevel, Outcome};
use crate::trajectory_export::{TrajectoryRow, rows_for};

// ---------------------------------------------------------------------------
// Scenario file
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScenarioFile {
    pub name: String,
    pub seed: u64,
    pub start: f64,
    pub end: f64,
    /// Width of one arrival sampling step (seconds).
    pub sample_step: f64,
    pub tick_interval: f64,
    pub queueing: QueueingSpec,
    pub traffic: TrafficSpec,
    pub monitor: MonitorSpec,
    pub service: ServiceSpec,
}

impl Default for ScenarioFile {
    fn default() -> Self {
        Self {
            name: "baseline".to_string(),
            seed: 42,
            start: 0.0,
            end: 600.0,
            sample_step: 1.0,
            tick_interval: 10.0,
            queueing: QueueingSpec::default(),
            traffic: TrafficSpec::default(),
            monitor: MonitorSpec::default(),
            service: ServiceSpec::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueingSpec {
    pub server_count: u32,
    pub queue_capacity: u32,
    pub service_rate: f64,
    pub rho_threshold: f64,
    pub sla_epsilon: f64,
    pub sla_delta: f64,
}

impl Default for QueueingSpec {
    fn default() -> Self {
        let q = QueueingConfig::default();
        Self {
            server_count: q.server_count,
            queue_capacity: q.queue_capacity,
            service_rate: q.service_rate,
            rho_threshold: q.rho_threshold,
            sla_epsilon: q.sla_epsilon,
            sla_delta: q.sla_delta,
        }
    }
}

impl QueueingSpec {
    #[must_use]
    pub fn to_config(&self) -> QueueingConfig {
        QueueingConfig {
            server_count: self.server_count,
            queue_capacity: self.queue_capacity,
            service_rate: self.service_rate,
            rho_threshold: self.rho_threshold,
            sla_epsilon: self.sla_epsilon,
            sla_delta: self.sla_delta,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrafficSpec {
    pub amplitude: f64,
    pub peak_time: f64,
    pub spread: f64,
    /// `None` runs background traffic only.
    pub anomaly: Option<AnomalySpec>,
}

impl Default for TrafficSpec {
    fn default() -> Self {
        let bg = BackgroundParams::default();
        Self {
            amplitude: bg.amplitude,
            peak_time: bg.peak_time,
            spread: bg.spread,
            anomaly: Some(AnomalySpec::default()),
        }
    }
}

/// Injected anomaly. Shape parameters left out take the distribution's
/// defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnomalySpec {
    pub distribution: String,
    pub start_time: f64,
    pub duration: f64,
    pub total_volume: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alpha: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x_m: Option<f64>,
}

impl Default for AnomalySpec {
    fn default() -> Self {
        let a = AnomalyParams::default();
        Self {
            distribution: a.shape.kind().as_str().to_string(),
            start_time: a.start_time,
            duration: a.duration,
            total_volume: a.total_volume,
            mean: None,
            variance: None,
            rate: None,
            alpha: None,
            x_m: None,
        }
    }
}

impl AnomalySpec {
    pub fn to_params(&self) -> Result<AnomalyParams> {
        let kind = DistributionKind::parse(&self.distribution).ok_or_else(|| {
            HarnessError::Scenario(format!("unknown distribution '{}'", self.distribution))
        })?;
        let shape = match AnomalyShape::default_for(kind) {
            AnomalyShape::Gaussian { mean, variance } => AnomalyShape::Gaussian {
                mean: self.mean.unwrap_or(mean),
                variance: self.variance.unwrap_or(variance),
            },
            AnomalyShape::Exponential { rate } => AnomalyShape::Exponential {
                rate: self.rate.unwrap_or(rate),
            },
            AnomalyShape::Poisson { rate } => AnomalyShape::Poisson {
                rate: self.rate.unwrap_or(rate),
            },
            AnomalyShape::Pareto { alpha, x_m } => AnomalyShape::Pareto {
                alpha: self.alpha.unwrap_or(alpha),
                x_m: self.x_m.unwrap_or(x_m),
            },
        };
        Ok(AnomalyParams {
            shape,
            start_time: self.start_time,
            duration: self.duration,
            total_volume: self.total_volume,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorSpec {
    pub window_seconds: f64,
    pub retention_seconds: f64,
    pub trajectory_capacity: usize,
    pub blocked_threshold: f64,
    pub baseline_capacity: usize,
    /// `any`, `majority` or `all`.
    pub quorum: String,
}

impl Default for MonitorSpec {
    fn default() -> Self {
        let m = MonitorConfig::default();
        Self {
            window_seconds: m.window_seconds,
            retention_seconds: m.retention_seconds,
            trajectory_capacity: m.trajectory_capacity,
            blocked_threshold: m.blocked_threshold,
            baseline_capacity: m.anomaly.window_capacity,
            quorum: "any".to_string(),
        }
    }
}

impl MonitorSpec {
    /// Scenario runs never read the quorum from the environment.
    #[must_use]
    pub fn to_config(&self) -> MonitorConfig {
        let base = MonitorConfig::default();
        MonitorConfig {
            window_seconds: self.window_seconds,
            retention_seconds: self.retention_seconds,
            trajectory_capacity: self.trajectory_capacity,
            blocked_threshold: self.blocked_threshold,
            anomaly: AnomalyConfig {
                window_capacity: self.baseline_capacity,
                quorum: AnomalyQuorum::from_str_loose(&self.quorum),
                ..base.anomaly
            },
            ..base
        }
    }
}

/// How synthetic service, latency and resource samples are derived.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceSpec {
    /// Exponential service-time draws per sampling step; 0 disables them.
    pub service_samples_per_step: u32,
    /// Fixed network/processing overhead added to every latency (ms).
    pub latency_base_ms: f64,
    /// Latency reported while the system is saturated (ms).
    pub saturated_latency_ms: f64,
    /// CPU share per unit of utilization.
    pub cpu_per_utilization: f64,
    pub ram_base: f64,
}

impl Default for ServiceSpec {
    fn default() -> Self {
        Self {
            service_samples_per_step: 4,
            latency_base_ms: 10.0,
            saturated_latency_ms: 5_000.0,
            cpu_per_utilization: 0.8,
            ram_base: 0.3,
        }
    }
}

impl ScenarioFile {
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn validate(&self) -> Result<()> {
        let bad = |msg: &str| Err(HarnessError::Scenario(msg.to_string()));
        if self.name.trim().is_empty() {
            return bad("name must not be empty");
        }
        if !(self.start.is_finite() && self.end.is_finite() && self.end > self.start) {
            return bad("end must be finite and after start");
        }
        if !(self.sample_step.is_finite() && self.sample_step > 0.0) {
            return bad("sample_step must be > 0");
        }
        if !(self.tick_interval.is_finite() && self.tick_interval > 0.0) {
            return bad("tick_interval must be > 0");
        }
        self.queueing.to_config().validate()?;
        self.monitor.to_config().validate()?;
        Ok(())
    }

    fn flow(&self) -> Result<TrafficFlowModel> {
        let background = BackgroundParams {
            amplitude: self.traffic.amplitude,
            peak_time: self.traffic.peak_time,
            spread: self.traffic.spread,
        };
        let anomaly = match &self.traffic.anomaly {
            Some(anomaly) => anomaly.to_params()?,
            None => AnomalyParams {
                duration: 0.0,
                ..AnomalyParams::default()
            },
        };
        Ok(TrafficFlowModel::new(background, anomaly)?)
    }
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsReport {
    pub samples_ingested: u64,
    pub samples_stale: u64,
    pub samples_clamped: u64,
    pub ticks_evaluated: u64,
    pub ticks_degraded: u64,
    pub ticks_rejected: u64,
    pub anomalies_flagged: u64,
}

impl From<MetricsSnapshot> for MetricsReport {
    fn from(m: MetricsSnapshot) -> Self {
        Self {
            samples_ingested: m.samples_ingested,
            samples_stale: m.samples_stale,
            samples_clamped: m.samples_clamped,
            ticks_evaluated: m.ticks_evaluated,
            ticks_degraded: m.ticks_degraded,
            ticks_rejected: m.ticks_rejected,
            anomalies_flagged: m.anomalies_flagged,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub name: String,
    pub seed: u64,
    pub ticks: usize,
    pub final_status: Option<String>,
    pub final_mode: Option<u8>,
    pub mean_sust: f64,
    pub min_sust: f64,
    pub max_sust: f64,
    /// Least-squares slope of Sust per tick over the last ten ticks.
    pub sust_trend: Option<f64>,
    /// Index `m - 1` holds the count of mode `m`.
    pub mode_counts: [u64; 9],
    pub region_violations: usize,
    pub degraded_ticks: usize,
    pub anomalous_ticks: usize,
    pub sla_violations: usize,
    pub peak_utilization: f64,
    pub fingerprint: String,
    pub metrics: MetricsReport,
}

/// Everything one run produced.
#[derive(Debug, Clone)]
pub struct ScenarioRun {
    pub report: ScenarioReport,
    pub records: Vec<TickRecord>,
    pub rows: Vec<TrajectoryRow>,
    pub fingerprint: Fingerprint,
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

struct Synthesizer {
    model: QueueingModel,
    service: ServiceSpec,
    rng: ChaCha8Rng,
}

impl Synthesizer {
    /// Service-time, latency and resource samples for one step whose
    /// arrival rate was `lambda`.
    fn step(&mut self, registry: &SessionRegistry, id: &SessionId, t: f64, lambda: f64) -> Result<()> {
        let mu = self.model.config().service_rate;
        for _ in 0..self.service.service_samples_per_step {
            let u: f64 = self.rng.random();
            registry.ingest(
                id,
                ServiceTimeSample {
                    timestamp: t,
                    seconds: -(1.0 - u).ln() / mu,
                },
            )?;
        }
        let rho = self.model.utilization(lambda);
        let saturated = rho >= 1.0;
        let millis = if saturated {
            self.service.saturated_latency_ms
        } else {
            let sojourn = self.model.expected_wait(rho, 1.0) + 1.0 / mu;
            (self.service.latency_base_ms + 1000.0 * sojourn).min(self.service.saturated_latency_ms)
        };
        registry.ingest(
            id,
            LatencySample {
                timestamp: t,
                millis,
                blocked: saturated,
            },
        )?;
        registry.ingest(
            id,
            ResourceSample {
                timestamp: t,
                cpu: rho * self.service.cpu_per_utilization,
                ram: self.service.ram_base,
            },
        )?;
        Ok(())
    }
}

/// Run a scenario, optionally logging one JSONL line per tick.
pub fn run_scenario(scenario: &ScenarioFile, log: Option<&mut LogEmitter>) -> Result<ScenarioRun> {
    run_scenario_with_artifacts(scenario, log, &[])
}

/// [`run_scenario`], recording `artifact_refs` (paths the caller will write
/// the run's outputs to) on the `scenario_end` log entry.
pub fn run_scenario_with_artifacts(
    scenario: &ScenarioFile,
    mut log: Option<&mut LogEmitter>,
    artifact_refs: &[String],
) -> Result<ScenarioRun> {
    scenario.validate()?;
    let started = Instant::now();
    let queueing = scenario.queueing.to_config();
    let registry = SessionRegistry::new(queueing, scenario.monitor.to_config())?;
    let id = SessionId::new(scenario.name.clone());
    let samples = scenario.flow()?.sample(
        scenario.start,
        scenario.end,
        scenario.sample_step,
        scenario.seed,
    )?;
    let mut synth = Synthesizer {
        model: QueueingModel::new(queueing)?,
        service: scenario.service,
        rng: ChaCha8Rng::seed_from_u64(scenario.seed.wrapping_add(1)),
    };

    if let Some(log) = log.as_deref_mut() {
        let entry = LogEntry::new("", LogLevel::Info, "scenario_start")
            .with_session(id.as_str())
            .with_details(serde_json::json!({
                "seed": scenario.seed,
                "start": scenario.start,
                "end": scenario.end,
                "tick_interval": scenario.tick_interval,
                "samples": samples.len(),
            }));
        log.emit_entry(entry)?;
    }

    let tick_at = |k: u64| scenario.start + k as f64 * scenario.tick_interval;
    let mut k = 1_u64;
    let run_tick = |t: f64, log: &mut Option<&mut LogEmitter>| -> Result<()> {
        registry.evaluate_at(&id, &queueing, t)?;
        if let Some(log) = log.as_deref_mut()
            && let Some(record) = registry.with_session(&id, |m| m.latest().cloned())?
        {
            log.emit_tick(id.as_str(), &record)?;
        }
        Ok(())
    };

    for group in samples.chunk_by(|a, b| a.timestamp == b.timestamp) {
        let stamp = group[0].timestamp;
        while stamp > tick_at(k) {
            run_tick(tick_at(k), &mut log)?;
            k += 1;
        }
        let total: f64 = group.iter().map(|s: &ArrivalSample| s.count).sum();
        for s in group {
            registry.ingest(&id, *s)?;
        }
        synth.step(&registry, &id, stamp, total / scenario.sample_step)?;
    }
    while tick_at(k) <= scenario.end {
        run_tick(tick_at(k), &mut log)?;
        k += 1;
    }

    let records = registry.get_trajectory(&id, f64::NEG_INFINITY, f64::INFINITY)?;
    let (stats, trend) = registry.with_session(&id, |m| (m.statistics(), m.sust_trend(10)))?;
    let fingerprint = trajectory_fingerprint(&records);
    let last = records.last();
    let report = ScenarioReport {
        name: scenario.name.clone(),
        seed: scenario.seed,
        ticks: records.len(),
        final_status: last.map(|r| r.decision.status.as_str().to_string()),
        final_mode: last.map(|r| r.decision.mode.number()),
        mean_sust: stats.mean_sust,
        min_sust: stats.min_sust,
        max_sust: stats.max_sust,
        sust_trend: trend,
        mode_counts: stats.mode_counts,
        region_violations: stats.region_violations,
        degraded_ticks: stats.degraded_ticks,
        anomalous_ticks: stats.anomalous_ticks,
        sla_violations: records.iter().filter(|r| !r.sla.is_compliant()).count(),
        peak_utilization: records
            .iter()
            .map(|r| r.snapshot.utilization)
            .fold(0.0, f64::max),
        fingerprint: to_hex(&fingerprint),
        metrics: registry.metrics().snapshot().into(),
    };

    if let Some(log) = log.as_deref_mut() {
        let mut entry = LogEntry::new("", LogLevel::Info, "scenario_end")
            .with_session(id.as_str())
            .with_outcome(Outcome::Pass)
            .with_duration_ms(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX))
            .with_details(serde_json::json!({
                "ticks": report.ticks,
                "fingerprint": report.fingerprint,
            }));
        if !artifact_refs.is_empty() {
            entry = entry.with_artifacts(artifact_refs.to_vec());
        }
        log.emit_entry(entry)?;
        log.flush()?;
    }

    Ok(ScenarioRun {
        rows: rows_for(id.as_str(), &records),
        report,
        records,
        fingerprint,
    })
}
