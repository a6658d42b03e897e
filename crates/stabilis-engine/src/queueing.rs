//! G/G/c/K queueing model of the protected service.
//!
//! Given the current arrival-rate estimate `λ` and the session's
//! [`QueueingConfig`], a [`QueueingSnapshot`] carries:
//!
//! - utilization `ρ = λ / (c·μ)` (reported unclamped, so overload is visible)
//! - offered load `a = λ / μ` and Erlang-C waiting probability `P_wait`
//! - finite-buffer blocking `P_block`
//! - cumulative loss fraction `D_loss = Σ P_block·n / Σ n`
//! - Pollaczek–Khinchine expected wait `E[W]` (`+∞` when `ρ ≥ 1`)
//! - expected time to threshold crossing `E[T_fail]`
//!
//! Erlang C is evaluated through the Erlang-B recurrence, which stays finite
//! for any `c` where the factorial form overflows.

use crate::config::QueueingConfig;
use crate::error::{Result, sanitize_non_negative};
use crate::samples::ArrivalSample;

/// Squared coefficient of variation assumed with fewer than two service
/// samples (exponential service).
const DEFAULT_SERVICE_CV2: f64 = 1.0;

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Queueing metrics for one evaluation tick. Never mutated after creation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueingSnapshot {
    pub arrival_rate: f64,
    pub offered_load: f64,
    pub utilization: f64,
    pub wait_probability: f64,
    pub blocking_probability: f64,
    /// Cumulative over the session.
    pub loss_fraction: f64,
    /// Seconds; `f64::INFINITY` when saturated.
    pub expected_wait: f64,
    /// Seconds until `ρ` reaches the threshold; 0 when already past it.
    pub expected_time_to_failure: f64,
    /// `min(ρ·c, K)`.
    pub expected_queue_length: f64,
    /// `λ·(1 - P_block)`.
    pub throughput: f64,
    /// Squared coefficient of variation of service time used for `E[W]`.
    pub service_cv2: f64,
    /// `λ` was non-finite or negative and was clamped to 0.
    pub input_clamped: bool,
}

impl QueueingSnapshot {
    /// `ρ ≥ 1`.
    #[must_use]
    pub fn is_saturated(&self) -> bool {
        self.utilization >= 1.0
    }
}

// ---------------------------------------------------------------------------
// Loss accumulator
// ---------------------------------------------------------------------------

/// Running sums behind the cumulative loss fraction.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LossAccumulator {
    blocked: f64,
    offered: f64,
}

impl LossAccumulator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            blocked: 0.0,
            offered: 0.0,
        }
    }

    /// Add one sub-interval with `offered` transactions at blocking `p_block`.
    pub fn record(&mut self, p_block: f64, offered: f64) {
        let (n, _) = sanitize_non_negative(offered);
        let (p, _) = sanitize_non_negative(p_block);
        self.blocked += p.min(1.0) * n;
        self.offered += n;
    }

    /// `Σ P_block·n / Σ n`, or 0 before any traffic.
    #[must_use]
    pub fn fraction(&self) -> f64 {
        if self.offered > 0.0 {
            self.blocked / self.offered
        } else {
            0.0
        }
    }

    #[must_use]
    pub fn offered(&self) -> f64 {
        self.offered
    }
}

// ---------------------------------------------------------------------------
// Utilization series
// ---------------------------------------------------------------------------

/// Utilization over a `(t, λ)` series.
#[derive(Debug, Clone, PartialEq)]
pub struct UtilizationSeries {
    pub timestamps: Vec<f64>,
    pub instantaneous: Vec<f64>,
    /// Trailing mean over up to `window` points.
    pub moving_average: Vec<f64>,
    /// Maximal `(start, end)` runs with `ρ > 1`; an open run ends at the last
    /// timestamp.
    pub overload_periods: Vec<(f64, f64)>,
    pub max: f64,
    pub mean: f64,
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Erlang-B blocking `B(c, a)` by the stable recurrence.
#[must_use]
pub fn erlang_b(c: u32, a: f64) -> f64 {
    if a.is_nan() || a <= 0.0 {
        return 0.0;
    }
    let mut b = 1.0;
    for n in 1..=c {
        b = a * b / (f64::from(n) + a * b);
    }
    b
}

/// Erlang-C waiting probability. 1 when `a ≥ c`.
#[must_use]
pub fn erlang_c(c: u32, a: f64) -> f64 {
    if a.is_nan() || a <= 0.0 {
        return 0.0;
    }
    let cf = f64::from(c);
    if a >= cf {
        return 1.0;
    }
    let b = erlang_b(c, a);
    (cf * b / (cf - a * (1.0 - b))).clamp(0.0, 1.0)
}

/// Arrival rate over a trailing window: total count divided by its width.
#[must_use]
pub fn estimate_arrival_rate(window: &[ArrivalSample], window_seconds: f64) -> f64 {
    if window_seconds.is_nan() || window_seconds <= 0.0 {
        return 0.0;
    }
    window.iter().map(|s| s.count).sum::<f64>() / window_seconds
}

/// Squared coefficient of variation of a service-time sample.
#[must_use]
pub fn service_cv2(service_times: &[f64]) -> f64 {
    if service_times.len() < 2 {
        return DEFAULT_SERVICE_CV2;
    }
    let n = service_times.len() as f64;
    let mean = service_times.iter().sum::<f64>() / n;
    if mean.is_nan() || mean <= 0.0 {
        return DEFAULT_SERVICE_CV2;
    }
    let var = service_times
        .iter()
        .map(|x| (x - mean).powi(2))
        .sum::<f64>()
        / (n - 1.0);
    var / (mean * mean)
}

/// Stateless G/G/c/K model for one session's configuration.
#[derive(Debug, Clone)]
pub struct QueueingModel {
    config: QueueingConfig,
}

impl QueueingModel {
    pub fn new(config: QueueingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub fn config(&self) -> &QueueingConfig {
        &self.config
    }

    /// `ρ = λ / (c·μ)`.
    #[must_use]
    pub fn utilization(&self, lambda: f64) -> f64 {
        lambda / self.config.capacity()
    }

    /// `(P_wait, P_block)` at arrival rate `λ`.
    #[must_use]
    pub fn blocking(&self, lambda: f64) -> (f64, f64) {
        let c = self.config.server_count;
        let k = self.config.queue_capacity;
        let a = lambda / self.config.service_rate;
        let rho = self.utilization(lambda);
        let p_wait = erlang_c(c, a);
        if rho >= 1.0 {
            return (p_wait, 1.0);
        }
        if k == 0 {
            // No waiting room: pure loss system.
            return (p_wait, erlang_b(c, a));
        }
        let queue = p_wait * rho / (1.0 - rho);
        if queue > f64::from(k) {
            return (p_wait, 1.0);
        }
        (p_wait, (p_wait * rho.powf(f64::from(k))).clamp(0.0, 1.0))
    }

    /// Pollaczek–Khinchine `E[W]`; `+∞` when `ρ ≥ 1`.
    #[must_use]
    pub fn expected_wait(&self, rho: f64, cv2: f64) -> f64 {
        if rho >= 1.0 {
            return f64::INFINITY;
        }
        (rho / (1.0 - rho)) * ((1.0 + cv2) / 2.0) / self.config.service_rate
    }

    /// `1 / ((ρ_threshold - ρ)·c·μ)`, or 0 once past the threshold.
    #[must_use]
    pub fn expected_time_to_failure(&self, rho: f64) -> f64 {
        let margin = (self.config.rho_threshold - rho) * self.config.capacity();
        if margin <= 0.0 { 0.0 } else { 1.0 / margin }
    }

    /// Evaluate one tick. `offered` transactions in the window are folded
    /// into `loss` at this tick's blocking probability before `D_loss` is read.
    pub fn snapshot(
        &self,
        lambda: f64,
        service_times: &[f64],
        offered: f64,
        loss: &mut LossAccumulator,
    ) -> QueueingSnapshot {
        let (lambda, input_clamped) = sanitize_non_negative(lambda);
        let rho = self.utilization(lambda);
        let (p_wait, p_block) = self.blocking(lambda);
        let cv2 = service_cv2(service_times);
        loss.record(p_block, offered);
        QueueingSnapshot {
            arrival_rate: lambda,
            offered_load: lambda / self.config.service_rate,
            utilization: rho,
            wait_probability: p_wait,
            blocking_probability: p_block,
            loss_fraction: loss.fraction(),
            expected_wait: self.expected_wait(rho, cv2),
            expected_time_to_failure: self.expected_time_to_failure(rho),
            expected_queue_length: (rho * f64::from(self.config.server_count))
                .min(f64::from(self.config.queue_capacity)),
            throughput: lambda * (1.0 - p_block),
            service_cv2: cv2,
            input_clamped,
        }
    }

    /// Utilization analysis over a `(t, λ)` series with a trailing moving
    /// average of `window` points.
    #[must_use]
    pub fn utilization_series(&self, series: &[(f64, f64)], window: usize) -> UtilizationSeries {
        let window = window.max(1);
        let timestamps: Vec<f64> = series.iter().map(|(t, _)| *t).collect();
        let instantaneous: Vec<f64> = series
            .iter()
            .map(|(_, l)| self.utilization(sanitize_non_negative(*l).0))
            .collect();

        let mut overload_periods = Vec::new();
        let mut open: Option<f64> = None;
        for (&t, &rho) in timestamps.iter().zip(&instantaneous) {
            match (rho > 1.0, open) {
                (true, None) => open = Some(t),
                (false, Some(start)) => {
                    overload_periods.push((start, t));
                    open = None;
                }
                _ => {}
            }
        }
        if let (Some(start), Some(&last)) = (open, timestamps.last()) {
            overload_periods.push((start, last));
        }

        let mut moving_average = Vec::with_capacity(instantaneous.len());
        let mut running = 0.0;
        for i in 0..instantaneous.len() {
            running += instantaneous[i];
            if i >= window {
                running -= instantaneous[i - window];
            }
            moving_average.push(running / (i + 1).min(window) as f64);
        }

        let max = instantaneous.iter().copied().fold(0.0, f64::max);
        let mean = if instantaneous.is_empty() {
            0.0
        } else {
            instantaneous.iter().sum::<f64>() / instantaneous.len() as f64
        };
        UtilizationSeries {
            timestamps,
            instantaneous,
            moving_average,
            overload_periods,
            max,
            mean,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model() -> QueueingModel {
        QueueingModel::new(QueueingConfig {
            server_count: 10,
            queue_capacity: 1000,
            service_rate: 100.0,
            rho_threshold: 0.85,
            sla_epsilon: 0.01,
            sla_delta: 0.05,
        })
        .unwrap()
    }

    #[test]
    fn erlang_c_matches_textbook_value() {
        // c = 2, a = 1: C = 1/3.
        assert!((erlang_c(2, 1.0) - 1.0 / 3.0).abs() < 1e-12);
        // c = 1 reduces to ρ.
        assert!((erlang_c(1, 0.4) - 0.4).abs() < 1e-12);
    }

    #[test]
    fn erlang_c_saturates_at_c() {
        assert_eq!(erlang_c(10, 10.0), 1.0);
        assert_eq!(erlang_c(10, 10.5), 1.0);
        assert_eq!(erlang_c(10, 0.0), 0.0);
    }

    #[test]
    fn erlang_b_large_c_stays_finite() {
        let b = erlang_b(500, 450.0);
        assert!(b.is_finite() && b > 0.0 && b < 1.0);
    }

    #[test]
    fn light_load_scenario() {
        let m = model();
        let mut loss = LossAccumulator::new();
        let s = m.snapshot(50.0, &[], 500.0, &mut loss);
        assert!((s.utilization - 0.05).abs() < 1e-12);
        assert!(s.blocking_probability < 1e-9);
        assert!(s.expected_wait.is_finite());
        assert!(s.expected_time_to_failure > 0.0);
    }

    #[test]
    fn heavy_but_stable_scenario() {
        let m = model();
        let mut loss = LossAccumulator::new();
        let s = m.snapshot(950.0, &[], 9500.0, &mut loss);
        assert!((s.offered_load - 9.5).abs() < 1e-12);
        assert!((s.utilization - 0.95).abs() < 1e-12);
        assert!(s.wait_probability > 0.5 && s.wait_probability < 1.0);
        assert!(s.expected_wait.is_finite());
        // (0.95/0.05) · 1 / 100
        assert!((s.expected_wait - 0.19).abs() < 1e-9);
        assert_eq!(s.expected_time_to_failure, 0.0);
    }

    #[test]
    fn saturated_scenario() {
        let m = model();
        let mut loss = LossAccumulator::new();
        let s = m.snapshot(1050.0, &[], 10_500.0, &mut loss);
        assert!(s.is_saturated());
        assert_eq!(s.wait_probability, 1.0);
        assert_eq!(s.blocking_probability, 1.0);
        assert!(s.expected_wait.is_infinite());
        assert_eq!(s.expected_time_to_failure, 0.0);
        assert_eq!(s.loss_fraction, 1.0);
    }

    #[test]
    fn utilization_monotone_in_lambda() {
        let m = model();
        let mut prev = -1.0;
        for i in 0..200 {
            let rho = m.utilization(f64::from(i) * 7.5);
            assert!(rho > prev);
            prev = rho;
        }
    }

    #[test]
    fn blocking_non_decreasing_in_lambda() {
        for k in [0, 1, 5, 50, 1000] {
            let m = QueueingModel::new(QueueingConfig {
                queue_capacity: k,
                ..QueueingConfig::default()
            })
            .unwrap();
            let mut prev = 0.0;
            for i in 0..=240 {
                let (_, p) = m.blocking(f64::from(i) * 5.0);
                assert!(p >= prev - 1e-12, "K={k} λ={} p={p} prev={prev}", i * 5);
                prev = p;
            }
            assert_eq!(prev, 1.0);
        }
    }

    #[test]
    fn negative_or_nan_lambda_is_clamped() {
        let m = model();
        let mut loss = LossAccumulator::new();
        for bad in [-5.0, f64::NAN, f64::NEG_INFINITY] {
            let s = m.snapshot(bad, &[], 0.0, &mut loss);
            assert!(s.input_clamped);
            assert_eq!(s.utilization, 0.0);
            assert_eq!(s.blocking_probability, 0.0);
        }
    }

    #[test]
    fn cv2_defaults_and_estimates() {
        assert_eq!(service_cv2(&[]), 1.0);
        assert_eq!(service_cv2(&[0.01]), 1.0);
        assert!(service_cv2(&[0.01, 0.01, 0.01]) < 1e-20);
        let cv2 = service_cv2(&[0.005, 0.015]);
        // mean 0.01, sample var 5e-5
        assert!((cv2 - 0.5).abs() < 1e-9);
    }

    #[test]
    fn deterministic_service_halves_wait() {
        let m = model();
        let exp = m.expected_wait(0.5, 1.0);
        let det = m.expected_wait(0.5, 0.0);
        assert!((exp - 2.0 * det).abs() < 1e-15);
    }

    #[test]
    fn loss_fraction_is_weighted() {
        let mut loss = LossAccumulator::new();
        assert_eq!(loss.fraction(), 0.0);
        loss.record(1.0, 10.0);
        loss.record(0.0, 30.0);
        assert!((loss.fraction() - 0.25).abs() < 1e-12);
        loss.record(0.5, 0.0);
        assert!((loss.fraction() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn arrival_rate_is_count_over_window() {
        let w = [
            ArrivalSample::background(1.0, 100.0),
            ArrivalSample::background(2.0, 400.0),
        ];
        assert!((estimate_arrival_rate(&w, 10.0) - 50.0).abs() < 1e-12);
        assert_eq!(estimate_arrival_rate(&[], 10.0), 0.0);
        assert_eq!(estimate_arrival_rate(&w, 0.0), 0.0);
    }

    #[test]
    fn utilization_series_overloads() {
        let m = model();
        let series: Vec<(f64, f64)> = [500.0, 1200.0, 1500.0, 800.0, 1100.0]
            .iter()
            .enumerate()
            .map(|(i, l)| (i as f64, *l))
            .collect();
        let u = m.utilization_series(&series, 2);
        assert_eq!(u.overload_periods, vec![(1.0, 3.0), (4.0, 4.0)]);
        assert!((u.max - 1.5).abs() < 1e-12);
        assert!((u.mean - 1.02).abs() < 1e-12);
        assert!((u.moving_average[0] - 0.5).abs() < 1e-12);
        assert!((u.moving_average[2] - 1.35).abs() < 1e-12);
    }
}
