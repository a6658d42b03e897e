//! Arrival-rate model: a smooth background curve plus one injected anomalous
//! component.
//!
//! `N(t) = N_bg(t) + N_anom(t)` where
//!
//! - `N_bg(t) = A · exp(-(t - t_m)² / (2σ²))`
//! - `N_anom(t)` is a shape over relative time `x = (t - start) / duration`,
//!   zero outside `[start, start + duration]`, scaled so that its integral
//!   over that interval equals `total_volume`.
//!
//! Both curves are pure functions of configuration and `t`. `sample` turns
//! them into integer arrival counts with a seeded ChaCha8 stream.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::error::{EngineError, Result};
use crate::samples::{ArrivalSample, DistributionKind};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Sub-intervals used to normalize the anomalous shape.
const NORMALIZATION_STEPS: usize = 2000;

/// Upper bound on the stepped Poisson shape's `k`.
const POISSON_K_CAP: u32 = 20;

/// Largest number of steps `generate` or `sample` will materialize.
pub const MAX_STEPS: usize = 10_000_000;

/// Means at or above this switch from Knuth's method to a normal
/// approximation.
const KNUTH_MEAN_LIMIT: f64 = 30.0;

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Parameters of the background curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackgroundParams {
    /// Peak rate `A` (tx/s).
    pub amplitude: f64,
    /// Time of the peak `t_m` (s).
    pub peak_time: f64,
    /// Spread `σ` (s).
    pub spread: f64,
}

impl Default for BackgroundParams {
    fn default() -> Self {
        Self {
            amplitude: 100.0,
            peak_time: 300.0,
            spread: 150.0,
        }
    }
}

/// Shape of the anomalous component, over relative time `x ∈ [0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AnomalyShape {
    Gaussian { mean: f64, variance: f64 },
    Exponential { rate: f64 },
    /// Stepped pmf `λ^k e^{-λ} / k!` with `k = ⌊10x⌋`, `k ≤ 20`.
    Poisson { rate: f64 },
    Pareto { alpha: f64, x_m: f64 },
}

impl AnomalyShape {
    /// Shape with its usual defaults.
    #[must_use]
    pub const fn default_for(kind: DistributionKind) -> Self {
        match kind {
            DistributionKind::Gaussian => Self::Gaussian {
                mean: 0.5,
                variance: 0.1,
            },
            DistributionKind::Exponential => Self::Exponential { rate: 2.0 },
            DistributionKind::Poisson => Self::Poisson { rate: 5.0 },
            DistributionKind::Pareto => Self::Pareto {
                alpha: 2.0,
                x_m: 0.1,
            },
        }
    }

    #[must_use]
    pub const fn kind(&self) -> DistributionKind {
        match self {
            Self::Gaussian { .. } => DistributionKind::Gaussian,
            Self::Exponential { .. } => DistributionKind::Exponential,
            Self::Poisson { .. } => DistributionKind::Poisson,
            Self::Pareto { .. } => DistributionKind::Pareto,
        }
    }

    /// Unnormalized density at relative time `x`.
    fn raw(&self, x: f64) -> f64 {
        match *self {
            Self::Gaussian { mean, variance } => {
                let std = if variance > 0.0 { variance.sqrt() } else { 0.1 };
                (-(x - mean).powi(2) / (2.0 * std * std)).exp()
            }
            Self::Exponential { rate } => rate * (-rate * x).exp(),
            Self::Poisson { rate } => {
                // Truncation toward zero; x is never negative here.
                let k = ((x * 10.0) as u32).min(POISSON_K_CAP);
                poisson_pmf(rate, k)
            }
            Self::Pareto { alpha, x_m } => {
                let v = x.max(x_m);
                alpha * x_m.powf(alpha) / v.powf(alpha + 1.0)
            }
        }
    }

    fn validate(&self) -> Result<()> {
        let ok = match *self {
            Self::Gaussian { mean, variance } => mean.is_finite() && variance.is_finite(),
            Self::Exponential { rate } | Self::Poisson { rate } => rate.is_finite() && rate > 0.0,
            Self::Pareto { alpha, x_m } => {
                alpha.is_finite() && alpha > 0.0 && x_m.is_finite() && x_m > 0.0
            }
        };
        if ok {
            Ok(())
        } else {
            Err(EngineError::config("anomaly.shape", "invalid shape parameters"))
        }
    }
}

fn poisson_pmf(rate: f64, k: u32) -> f64 {
    let log_fact: f64 = (2..=k).map(|i| f64::from(i).ln()).sum();
    (f64::from(k) * rate.ln() - rate - log_fact).exp()
}

/// Injected anomalous component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnomalyParams {
    pub shape: AnomalyShape,
    pub start_time: f64,
    /// Non-positive duration disables the component.
    pub duration: f64,
    /// Integral of the component over its interval (transactions).
    pub total_volume: f64,
}

impl Default for AnomalyParams {
    fn default() -> Self {
        Self {
            shape: AnomalyShape::default_for(DistributionKind::Gaussian),
            start_time: 200.0,
            duration: 60.0,
            total_volume: 30_000.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

/// One point of the generated series, split by originating component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowPoint {
    pub t: f64,
    pub background: f64,
    pub anomalous: f64,
    pub distribution: DistributionKind,
}

impl FlowPoint {
    #[must_use]
    pub fn total(&self) -> f64 {
        self.background + self.anomalous
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Background plus anomalous arrival-rate model.
#[derive(Debug, Clone)]
pub struct TrafficFlowModel {
    background: BackgroundParams,
    anomaly: AnomalyParams,
    /// Scales the raw shape so its integral is `total_volume`.
    scale: f64,
}

impl TrafficFlowModel {
    pub fn new(background: BackgroundParams, anomaly: AnomalyParams) -> Result<Self> {
        if !(background.amplitude.is_finite() && background.amplitude > 0.0) {
            return Err(EngineError::config("background.amplitude", "must be > 0"));
        }
        if !(background.spread.is_finite() && background.spread > 0.0) {
            return Err(EngineError::config("background.spread", "must be > 0"));
        }
        if !background.peak_time.is_finite() {
            return Err(EngineError::config("background.peak_time", "must be finite"));
        }
        if !anomaly.start_time.is_finite() || !anomaly.duration.is_finite() {
            return Err(EngineError::config("anomaly.interval", "must be finite"));
        }
        if !(anomaly.total_volume.is_finite() && anomaly.total_volume >= 0.0) {
            return Err(EngineError::config("anomaly.total_volume", "must be >= 0"));
        }
        anomaly.shape.validate()?;

        let mut model = Self {
            background,
            anomaly,
            scale: 0.0,
        };
        model.scale = model.normalization();
        Ok(model)
    }

    fn normalization(&self) -> f64 {
        if self.anomaly.duration <= 0.0 {
            return 0.0;
        }
        // Midpoint rule over relative time; raw integral over t is
        // duration × integral over x.
        let h = 1.0 / NORMALIZATION_STEPS as f64;
        let raw: f64 = (0..NORMALIZATION_STEPS)
            .map(|i| self.anomaly.shape.raw((i as f64 + 0.5) * h) * h)
            .sum::<f64>()
            * self.anomaly.duration;
        if raw > 0.0 && raw.is_finite() {
            self.anomaly.total_volume / raw
        } else {
            0.0
        }
    }

    #[must_use]
    pub fn background_params(&self) -> &BackgroundParams {
        &self.background
    }

    #[must_use]
    pub fn anomaly_params(&self) -> &AnomalyParams {
        &self.anomaly
    }

    /// `N_bg(t)`.
    #[must_use]
    pub fn background_rate(&self, t: f64) -> f64 {
        let b = &self.background;
        let d = t - b.peak_time;
        b.amplitude * (-(d * d) / (2.0 * b.spread * b.spread)).exp()
    }

    /// `N_anom(t)`; exactly 0 outside the injection interval.
    #[must_use]
    pub fn anomalous_rate(&self, t: f64) -> f64 {
        let a = &self.anomaly;
        if a.duration <= 0.0 || t < a.start_time || t > a.start_time + a.duration {
            return 0.0;
        }
        let x = (t - a.start_time) / a.duration;
        self.scale * a.shape.raw(x)
    }

    /// `N(t) = N_bg(t) + N_anom(t)`.
    #[must_use]
    pub fn rate(&self, t: f64) -> f64 {
        self.background_rate(t) + self.anomalous_rate(t)
    }

    /// Evaluate both components on `t0, t0+dt, …` up to and including `t1`.
    pub fn generate(&self, t0: f64, t1: f64, dt: f64) -> Result<Vec<FlowPoint>> {
        let steps = step_count(t0, t1, dt)?;
        let kind = self.anomaly.shape.kind();
        Ok((0..=steps)
            .map(|i| {
                let t = t0 + i as f64 * dt;
                FlowPoint {
                    t,
                    background: self.background_rate(t),
                    anomalous: self.anomalous_rate(t),
                    distribution: kind,
                }
            })
            .collect())
    }

    /// Draw integer arrival counts per step of width `dt` over `[t0, t1)`.
    ///
    /// Each step yields a background sample and, while the injection is
    /// active, an anomalous one, both stamped at the end of the step. The
    /// same seed always produces the same samples.
    pub fn sample(&self, t0: f64, t1: f64, dt: f64, seed: u64) -> Result<Vec<ArrivalSample>> {
        let steps = step_count(t0, t1, dt)?;
        let kind = self.anomaly.shape.kind();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let cap = steps
            .checked_mul(2)
            .ok_or_else(|| EngineError::config("dt", "step count overflows"))?;
        let mut out = Vec::with_capacity(cap);
        for i in 0..steps {
            let t = t0 + i as f64 * dt;
            let stamp = t + dt;
            let bg = draw_poisson(&mut rng, self.background_rate(t) * dt);
            out.push(ArrivalSample::background(stamp, bg));
            let anom_mean = self.anomalous_rate(t) * dt;
            if anom_mean > 0.0 {
                let n = draw_poisson(&mut rng, anom_mean);
                out.push(ArrivalSample::anomalous(stamp, n, kind));
            }
        }
        Ok(out)
    }

    /// Integral of `N_bg` over `[t0, t1]` (midpoint rule).
    #[must_use]
    pub fn background_volume(&self, t0: f64, t1: f64) -> f64 {
        integrate(|t| self.background_rate(t), t0, t1)
    }

    /// Integral of `N_anom` over `[t0, t1]`.
    #[must_use]
    pub fn anomalous_volume(&self, t0: f64, t1: f64) -> f64 {
        integrate(|t| self.anomalous_rate(t), t0, t1)
    }
}

fn step_count(t0: f64, t1: f64, dt: f64) -> Result<usize> {
    if !(dt.is_finite() && dt > 0.0) {
        return Err(EngineError::config("dt", "must be finite and > 0"));
    }
    if !(t0.is_finite() && t1.is_finite()) || t1 < t0 {
        return Err(EngineError::config("t1", "must be finite and >= t0"));
    }
    // Tolerate accumulated rounding so that e.g. (0, 1, 0.1) includes t = 1.
    let steps = ((t1 - t0) / dt + 1e-9).floor();
    if !steps.is_finite() || steps >= MAX_STEPS as f64 {
        return Err(EngineError::config(
            "dt",
            format!("(t1 - t0) / dt must stay below {MAX_STEPS} steps"),
        ));
    }
    Ok(steps as usize)
}

fn integrate(f: impl Fn(f64) -> f64, t0: f64, t1: f64) -> f64 {
    const STEPS: usize = 1000;
    if t1.is_nan() || t1 <= t0 {
        return 0.0;
    }
    let h = (t1 - t0) / STEPS as f64;
    (0..STEPS).map(|i| f(t0 + (i as f64 + 0.5) * h) * h).sum()
}

fn draw_poisson(rng: &mut ChaCha8Rng, mean: f64) -> f64 {
    if !(mean.is_finite() && mean > 0.0) {
        return 0.0;
    }
    if mean < KNUTH_MEAN_LIMIT {
        let limit = (-mean).exp();
        let mut k = 0u32;
        let mut p = 1.0;
        loop {
            p *= rng.random::<f64>();
            if p <= limit {
                return f64::from(k);
            }
            k += 1;
        }
    }
    // Box-Muller; 1 - u keeps the log argument in (0, 1].
    let u1 = 1.0 - rng.random::<f64>();
    let u2 = rng.random::<f64>();
    let z = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
    (mean + mean.sqrt() * z).round().max(0.0)
}
