//! Per-session orchestrator.
//!
//! A tick aggregates the trailing window of ingested samples, runs the
//! queueing model, the anomaly detector and the Markov tracker, joins their
//! results into the stability vector, and maps that to a response mode.
//!
//! Ticks are atomic. Stateful components are advanced on working copies and
//! committed together with the new trajectory record only after every step
//! has succeeded; a failed or abandoned tick leaves the session untouched.

use std::collections::VecDeque;

use crate::anomaly::{AnomalyDetector, Detection};
use crate::config::{MonitorConfig, QueueingConfig};
use crate::decision::{DecisionMatrix, ModeDecision, ResponseMode};
use crate::error::{Degradation, EngineError, Result};
use crate::forecast::{ForecastOutcome, StabilityForecaster};
use crate::markov::{MarkovState, MarkovStateTracker, MarkovSummary, MeanTimeToAttack};
use crate::queueing::{LossAccumulator, QueueingModel, QueueingSnapshot, estimate_arrival_rate};
use crate::samples::{
    ArrivalSample, LatencySample, Observation, ResourceSample, SampleBuffer, ServiceTimeSample,
};
use crate::sla::{SlaReport, SlaValidator};
use crate::vrps::{OperatingRegion, StabilityVector, StabilityVectorCalculator, VrpsInputs};

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Aggregates of the samples that fed one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStats {
    pub arrival_samples: usize,
    pub offered: f64,
    pub anomalous_count: f64,
    pub background_count: f64,
    pub service_samples: usize,
    /// Mean latency (ms); `None` without latency samples.
    pub mean_latency_ms: Option<f64>,
    pub blocked_requests: usize,
    /// Latest resource utilization in the window, 0 without samples.
    pub resource_utilization: f64,
}

/// Everything one tick produced.
#[derive(Debug, Clone, PartialEq)]
pub struct TickRecord {
    /// 1-based tick counter within the session.
    pub tick: u64,
    pub timestamp: f64,
    pub window: WindowStats,
    pub snapshot: QueueingSnapshot,
    pub anomaly: Detection,
    pub markov: MarkovSummary,
    pub vector: StabilityVector,
    pub decision: ModeDecision,
    pub sla: SlaReport,
    pub forecast: ForecastOutcome,
    /// `min(component − threshold)` over the operating region.
    pub region_distance: f64,
}

impl TickRecord {
    #[must_use]
    pub fn markov_state(&self) -> MarkovState {
        self.markov.state
    }
}

/// Result of accepting one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Accepted,
    /// Accepted after clamping a non-finite or negative value to 0.
    Clamped,
}

/// Summary over the retained trajectory.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrajectoryStatistics {
    pub ticks: usize,
    pub mean_sust: f64,
    pub min_sust: f64,
    pub max_sust: f64,
    /// Index `m - 1` holds the count of mode `m`.
    pub mode_counts: [u64; 9],
    pub region_violations: usize,
    pub degraded_ticks: usize,
    pub anomalous_ticks: usize,
}

impl TrajectoryStatistics {
    #[must_use]
    pub fn mode_count(&self, mode: ResponseMode) -> u64 {
        self.mode_counts[usize::from(mode.number() - 1)]
    }
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StabilityMonitor {
    config: MonitorConfig,
    queueing: QueueingModel,
    sla: SlaValidator,
    calculator: StabilityVectorCalculator,
    matrix: DecisionMatrix,
    detector: AnomalyDetector,
    tracker: MarkovStateTracker,
    forecaster: StabilityForecaster,
    loss: LossAccumulator,
    arrivals: SampleBuffer<ArrivalSample>,
    service: SampleBuffer<ServiceTimeSample>,
    latency: SampleBuffer<LatencySample>,
    resources: SampleBuffer<ResourceSample>,
    trajectory: VecDeque<TickRecord>,
    last_tick: Option<f64>,
    latest_observation: Option<f64>,
    ticks: u64,
    clamped_since_tick: bool,
}

impl StabilityMonitor {
    pub fn new(queueing: QueueingConfig, config: MonitorConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            queueing: QueueingModel::new(queueing)?,
            sla: SlaValidator::from_config(&queueing)?,
            calculator: StabilityVectorCalculator::new(config.vrps)?,
            matrix: DecisionMatrix::new(OperatingRegion::from_config(&config.vrps)),
            detector: AnomalyDetector::new(config.anomaly)?,
            tracker: MarkovStateTracker::new(config.markov)?,
            forecaster: StabilityForecaster::new(config.forecast)?,
            loss: LossAccumulator::new(),
            arrivals: SampleBuffer::new(),
            service: SampleBuffer::new(),
            latency: SampleBuffer::new(),
            resources: SampleBuffer::new(),
            trajectory: VecDeque::with_capacity(config.trajectory_capacity.min(1024)),
            last_tick: None,
            latest_observation: None,
            ticks: 0,
            clamped_since_tick: false,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    #[must_use]
    pub fn queueing_config(&self) -> &QueueingConfig {
        self.queueing.config()
    }

    /// Replace the queueing configuration. Only allowed before the first
    /// tick; afterwards the configuration is fixed for the session.
    pub fn rebind_queueing(&mut self, queueing: QueueingConfig) -> Result<()> {
        if *self.queueing.config() == queueing {
            return Ok(());
        }
        if self.ticks > 0 {
            return Err(EngineError::config(
                "queueing",
                "differs from the configuration the session was evaluated with",
            ));
        }
        self.queueing = QueueingModel::new(queueing)?;
        self.sla = SlaValidator::from_config(&queueing)?;
        Ok(())
    }

    /// Time used when the caller does not supply one: the newest sample or
    /// tick seen, 0 for a fresh session.
    #[must_use]
    pub fn default_tick_time(&self) -> f64 {
        match (self.latest_observation, self.last_tick) {
            (Some(a), Some(b)) => a.max(b),
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => 0.0,
        }
    }

    /// Samples older than this are refused.
    #[must_use]
    pub fn retention_horizon(&self) -> f64 {
        let newest = match (self.latest_observation, self.last_tick) {
            (Some(a), Some(b)) => a.max(b),
            (Some(a), None) | (None, Some(a)) => a,
            (None, None) => return f64::NEG_INFINITY,
        };
        newest - self.config.retention_seconds
    }

    #[must_use]
    pub fn latest_observation(&self) -> Option<f64> {
        self.latest_observation
    }

    #[must_use]
    pub fn last_tick(&self) -> Option<f64> {
        self.last_tick
    }

    /// Store one observation. Out-of-order timestamps are fine; samples
    /// behind the retention horizon are dropped with `StaleInput`.
    pub fn ingest(&mut self, observation: impl Into<Observation>) -> Result<IngestOutcome> {
        let mut obs = observation.into();
        let ts = obs.timestamp();
        if !ts.is_finite() {
            return Err(EngineError::NumericDegeneracy {
                what: "non-finite sample timestamp",
            });
        }
        let horizon = self.retention_horizon();
        if ts < horizon {
            return Err(EngineError::StaleInput {
                timestamp: ts,
                horizon,
            });
        }
        let clamped = obs.sanitize();
        match obs {
            Observation::Arrival(s) => self.arrivals.insert(s),
            Observation::ServiceTime(s) => self.service.insert(s),
            Observation::Latency(s) => self.latency.insert(s),
            Observation::Resource(s) => self.resources.insert(s),
        };
        self.latest_observation = Some(self.latest_observation.map_or(ts, |t| t.max(ts)));
        self.advance_horizon();
        self.clamped_since_tick |= clamped;
        Ok(if clamped {
            IngestOutcome::Clamped
        } else {
            IngestOutcome::Accepted
        })
    }

    fn advance_horizon(&mut self) {
        let h = self.retention_horizon();
        self.arrivals.advance_horizon(h);
        self.service.advance_horizon(h);
        self.latency.advance_horizon(h);
        self.resources.advance_horizon(h);
    }

    fn window_stats(&self, now: f64) -> (WindowStats, Vec<f64>) {
        let w = self.config.window_seconds;
        let arrivals = self.arrivals.window(now, w);
        let (mut anomalous, mut background) = (0.0, 0.0);
        for s in arrivals {
            if s.is_anomalous {
                anomalous += s.count;
            } else {
                background += s.count;
            }
        }
        let service: Vec<f64> = self.service.window(now, w).iter().map(|s| s.seconds).collect();
        let latency = self.latency.window(now, w);
        let mean_latency_ms = (!latency.is_empty())
            .then(|| latency.iter().map(|s| s.millis).sum::<f64>() / latency.len() as f64);
        let resource_utilization = self
            .resources
            .window(now, w)
            .last()
            .map_or(0.0, ResourceSample::utilization);
        (
            WindowStats {
                arrival_samples: arrivals.len(),
                offered: anomalous + background,
                anomalous_count: anomalous,
                background_count: background,
                service_samples: service.len(),
                mean_latency_ms,
                blocked_requests: latency.iter().filter(|s| s.blocked).count(),
                resource_utilization,
            },
            service,
        )
    }

    fn classify(&self, snapshot: &QueueingSnapshot, detection: &Detection) -> MarkovState {
        if snapshot.blocking_probability >= self.config.blocked_threshold {
            MarkovState::Blocked
        } else if detection.is_anomaly() {
            MarkovState::Attack
        } else if detection.z_score().abs() > self.config.anomaly.suspicious_z {
            MarkovState::Suspicious
        } else {
            MarkovState::Normal
        }
    }

    /// Evaluate one tick at time `now` and append it to the trajectory.
    pub fn tick(&mut self, now: f64) -> Result<ModeDecision> {
        if !now.is_finite() {
            return Err(EngineError::NumericDegeneracy {
                what: "non-finite tick time",
            });
        }
        if let Some(previous) = self.last_tick
            && now < previous
        {
            return Err(EngineError::NonMonotonicTick {
                previous,
                requested: now,
            });
        }

        let (window, service_times) = self.window_stats(now);
        let lambda = estimate_arrival_rate(
            self.arrivals.window(now, self.config.window_seconds),
            self.config.window_seconds,
        );

        let mut loss = self.loss;
        let mut detector = self.detector.clone();
        let mut tracker = self.tracker.clone();
        let mut forecaster = self.forecaster.clone();

        let snapshot = self
            .queueing
            .snapshot(lambda, &service_times, window.offered, &mut loss);

        let detection = detector.detect(snapshot.arrival_rate);
        detector.update_baseline(snapshot.arrival_rate);

        tracker.observe(self.classify(&snapshot, &detection));
        let markov = tracker.summary().ok_or(EngineError::NumericDegeneracy {
            what: "markov tracker has no state",
        })?;

        let vector = self.calculator.compute(&VrpsInputs {
            processing_time_ms: window.mean_latency_ms,
            utilization: snapshot.utilization,
            blocking_probability: snapshot.blocking_probability,
            resource_utilization: window.resource_utilization,
            anomalous_count: window.anomalous_count,
            background_count: window.background_count,
        });

        let mut degradations = Vec::new();
        if matches!(detection, Detection::InsufficientData { .. }) {
            degradations.push(Degradation::InsufficientBaseline);
        }
        if snapshot.is_saturated() {
            degradations.push(Degradation::Saturated);
        }
        if markov.mean_time_to_attack == MeanTimeToAttack::Undefined && attack_observed(&tracker) {
            degradations.push(Degradation::MttaUndefined);
        }
        if !markov.stationary.converged {
            degradations.push(Degradation::StationaryNotConverged);
        }
        if snapshot.input_clamped || self.clamped_since_tick {
            degradations.push(Degradation::NonFiniteInput);
        }
        if window.arrival_samples == 0 {
            degradations.push(Degradation::EmptyArrivalWindow);
        }
        let decision = self.matrix.decide(&vector, now).with_degradations(degradations);

        let sla = self.sla.validate(&snapshot);
        let forecast = forecaster.observe(&vector.components);
        let region_distance = self.matrix.region().distance_to_boundary(&vector);

        let record = TickRecord {
            tick: self.ticks + 1,
            timestamp: now,
            window,
            snapshot,
            anomaly: detection,
            markov,
            vector,
            decision: decision.clone(),
            sla,
            forecast,
            region_distance,
        };

        // Commit.
        self.loss = loss;
        self.detector = detector;
        self.tracker = tracker;
        self.forecaster = forecaster;
        if self.trajectory.len() == self.config.trajectory_capacity {
            self.trajectory.pop_front();
        }
        self.trajectory.push_back(record);
        self.ticks += 1;
        self.last_tick = Some(now);
        self.clamped_since_tick = false;
        self.advance_horizon();
        Ok(decision)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    #[must_use]
    pub fn records(&self) -> &VecDeque<TickRecord> {
        &self.trajectory
    }

    /// Records with `from_t ≤ t ≤ to_t`, oldest first.
    pub fn trajectory(&self, from_t: f64, to_t: f64) -> impl Iterator<Item = &TickRecord> {
        self.trajectory
            .iter()
            .filter(move |r| r.timestamp >= from_t && r.timestamp <= to_t)
    }

    #[must_use]
    pub fn latest(&self) -> Option<&TickRecord> {
        self.trajectory.back()
    }

    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.ticks
    }

    #[must_use]
    pub fn anomaly_detector(&self) -> &AnomalyDetector {
        &self.detector
    }

    #[must_use]
    pub fn markov_tracker(&self) -> &MarkovStateTracker {
        &self.tracker
    }

    /// Least-squares slope of `Sust` per tick over the last `last_n` records.
    /// `None` with fewer than two.
    #[must_use]
    pub fn sust_trend(&self, last_n: usize) -> Option<f64> {
        let n = last_n.min(self.trajectory.len());
        if n < 2 {
            return None;
        }
        let ys: Vec<f64> = self
            .trajectory
            .iter()
            .skip(self.trajectory.len() - n)
            .map(|r| r.vector.sust)
            .collect();
        let nf = n as f64;
        let x_mean = (nf - 1.0) / 2.0;
        let y_mean = ys.iter().sum::<f64>() / nf;
        let (mut num, mut den) = (0.0, 0.0);
        for (i, y) in ys.iter().enumerate() {
            let dx = i as f64 - x_mean;
            num += dx * (y - y_mean);
            den += dx * dx;
        }
        Some(num / den)
    }

    #[must_use]
    pub fn statistics(&self) -> TrajectoryStatistics {
        let mut stats = TrajectoryStatistics {
            ticks: self.trajectory.len(),
            mean_sust: 0.0,
            min_sust: 0.0,
            max_sust: 0.0,
            mode_counts: [0; 9],
            region_violations: 0,
            degraded_ticks: 0,
            anomalous_ticks: 0,
        };
        if self.trajectory.is_empty() {
            return stats;
        }
        let (mut sum, mut min, mut max) = (0.0, f64::INFINITY, f64::NEG_INFINITY);
        for r in &self.trajectory {
            let s = r.vector.sust;
            sum += s;
            min = min.min(s);
            max = max.max(s);
            stats.mode_counts[usize::from(r.decision.mode.number() - 1)] += 1;
            if !r.decision.violations.is_empty() {
                stats.region_violations += 1;
            }
            if !r.decision.valid {
                stats.degraded_ticks += 1;
            }
            if r.anomaly.is_anomaly() {
                stats.anomalous_ticks += 1;
            }
        }
        stats.mean_sust = sum / self.trajectory.len() as f64;
        stats.min_sust = min;
        stats.max_sust = max;
        stats
    }
}

fn attack_observed(tracker: &MarkovStateTracker) -> bool {
    MarkovState::ALL
        .iter()
        .any(|from| tracker.matrix().count(*from, MarkovState::Attack) > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::samples::DistributionKind;
    use crate::vrps::SystemStatus;

    fn monitor() -> StabilityMonitor {
        StabilityMonitor::new(QueueingConfig::default(), MonitorConfig::default()).unwrap()
    }

    /// Feed `rate` tx/s as one sample per second over `[t0, t1)`.
    fn feed(m: &mut StabilityMonitor, t0: u32, t1: u32, rate: f64) {
        for t in t0..t1 {
            m.ingest(ArrivalSample::background(f64::from(t) + 1.0, rate))
                .unwrap();
        }
    }

    #[test]
    fn light_load_is_healthy() {
        let mut m = monitor();
        feed(&mut m, 0, 10, 50.0);
        let d = m.tick(10.0).unwrap();
        assert_eq!(d.status, SystemStatus::Healthy);
        assert_eq!(d.mode, ResponseMode::Monitoring);
        let r = m.latest().unwrap();
        assert!((r.snapshot.utilization - 0.05).abs() < 1e-12);
        assert!(r.snapshot.blocking_probability < 1e-9);
        // First tick has no baseline yet.
        assert!(!d.valid);
        assert_eq!(d.degradations, vec![Degradation::InsufficientBaseline]);
    }

    #[test]
    fn saturation_is_flagged() {
        let mut m = monitor();
        feed(&mut m, 0, 10, 1050.0);
        let d = m.tick(10.0).unwrap();
        assert!(d.degradations.contains(&Degradation::Saturated));
        assert_eq!(d.status, SystemStatus::Critical);
        let r = m.latest().unwrap();
        assert!(r.snapshot.expected_wait.is_infinite());
        assert_eq!(r.snapshot.expected_time_to_failure, 0.0);
        assert_eq!(r.markov_state(), MarkovState::Blocked);
    }

    #[test]
    fn non_monotonic_tick_leaves_state_untouched() {
        let mut m = monitor();
        feed(&mut m, 0, 10, 50.0);
        m.tick(10.0).unwrap();
        let before = m.records().clone();
        let err = m.tick(5.0).unwrap_err();
        assert!(matches!(err, EngineError::NonMonotonicTick { .. }));
        assert_eq!(m.records(), &before);
        assert_eq!(m.tick_count(), 1);
        assert_eq!(m.anomaly_detector().baseline().len(), 1);
    }

    #[test]
    fn stale_samples_are_refused() {
        let mut m = monitor();
        feed(&mut m, 0, 100, 10.0);
        let err = m.ingest(ArrivalSample::background(5.0, 1.0)).unwrap_err();
        assert!(matches!(err, EngineError::StaleInput { .. }));
    }

    #[test]
    fn out_of_order_samples_aggregate_the_same() {
        let mut a = monitor();
        let mut b = monitor();
        for t in 1..=10 {
            a.ingest(ArrivalSample::background(f64::from(t), 100.0)).unwrap();
        }
        for t in (1..=10).rev() {
            b.ingest(ArrivalSample::background(f64::from(t), 100.0)).unwrap();
        }
        a.tick(10.0).unwrap();
        b.tick(10.0).unwrap();
        assert_eq!(a.latest().unwrap().snapshot, b.latest().unwrap().snapshot);
    }

    #[test]
    fn clamped_input_marks_tick_degraded() {
        let mut m = monitor();
        assert_eq!(
            m.ingest(ArrivalSample::background(1.0, f64::NAN)).unwrap(),
            IngestOutcome::Clamped
        );
        let d = m.tick(1.0).unwrap();
        assert!(d.degradations.contains(&Degradation::NonFiniteInput));
        let d = m.tick(2.0).unwrap();
        assert!(!d.degradations.contains(&Degradation::NonFiniteInput));
    }

    #[test]
    fn empty_window_is_flagged() {
        let mut m = monitor();
        let d = m.tick(0.0).unwrap();
        assert!(d.degradations.contains(&Degradation::EmptyArrivalWindow));
        assert_eq!(m.latest().unwrap().snapshot.utilization, 0.0);
    }

    #[test]
    fn anomalous_traffic_lowers_a() {
        let mut m = monitor();
        for t in 1..=10 {
            m.ingest(ArrivalSample::background(f64::from(t), 30.0)).unwrap();
            m.ingest(ArrivalSample::anomalous(f64::from(t), 10.0, DistributionKind::Pareto))
                .unwrap();
        }
        m.tick(10.0).unwrap();
        let r = m.latest().unwrap();
        assert!((r.vector.anomaly_ratio - 0.25).abs() < 1e-12);
        assert!((r.vector.components[4] - 0.75).abs() < 1e-12);
    }

    #[test]
    fn spike_after_baseline_is_attack() {
        let mut m = monitor();
        let mut t = 0;
        for _ in 0..30 {
            t += 10;
            feed(&mut m, t - 10, t, 100.0 + f64::from(t % 7));
            m.tick(f64::from(t)).unwrap();
        }
        feed(&mut m, t, t + 10, 700.0);
        m.tick(f64::from(t + 10)).unwrap();
        let r = m.latest().unwrap();
        assert!(r.anomaly.is_anomaly());
        assert_eq!(r.markov_state(), MarkovState::Attack);
        assert_eq!(m.statistics().anomalous_ticks, 1);
    }

    #[test]
    fn queueing_config_fixed_after_first_tick() {
        let mut m = monitor();
        let other = QueueingConfig {
            server_count: 20,
            ..QueueingConfig::default()
        };
        m.rebind_queueing(other).unwrap();
        assert_eq!(m.queueing_config().server_count, 20);
        m.tick(0.0).unwrap();
        m.rebind_queueing(other).unwrap();
        let err = m.rebind_queueing(QueueingConfig::default()).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn default_tick_time_follows_samples() {
        let mut m = monitor();
        assert_eq!(m.default_tick_time(), 0.0);
        m.ingest(ArrivalSample::background(4.0, 1.0)).unwrap();
        m.ingest(ArrivalSample::background(2.0, 1.0)).unwrap();
        assert_eq!(m.default_tick_time(), 4.0);
    }

    #[test]
    fn trajectory_is_bounded() {
        let cfg = MonitorConfig {
            trajectory_capacity: 5,
            ..MonitorConfig::default()
        };
        let mut m = StabilityMonitor::new(QueueingConfig::default(), cfg).unwrap();
        for i in 0..12 {
            m.tick(f64::from(i)).unwrap();
        }
        assert_eq!(m.records().len(), 5);
        assert_eq!(m.records().front().unwrap().timestamp, 7.0);
        assert_eq!(m.tick_count(), 12);
        assert_eq!(m.latest().unwrap().tick, 12);
    }

    #[test]
    fn trajectory_range_is_inclusive() {
        let mut m = monitor();
        for i in 0..10 {
            m.tick(f64::from(i)).unwrap();
        }
        let ts: Vec<f64> = m.trajectory(3.0, 6.0).map(|r| r.timestamp).collect();
        assert_eq!(ts, vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn trend_and_statistics() {
        let mut m = monitor();
        assert_eq!(m.sust_trend(10), None);
        // Rising load makes Sust fall.
        for (i, rate) in [100.0, 300.0, 500.0, 700.0].iter().enumerate() {
            let t = (i as u32 + 1) * 10;
            feed(&mut m, t - 10, t, *rate);
            m.tick(f64::from(t)).unwrap();
        }
        assert!(m.sust_trend(4).unwrap() < 0.0);
        let s = m.statistics();
        assert_eq!(s.ticks, 4);
        assert!(s.min_sust <= s.mean_sust && s.mean_sust <= s.max_sust);
        assert_eq!(s.mode_counts.iter().sum::<u64>(), 4);
    }
}
