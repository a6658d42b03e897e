//! Engine configuration.
//!
//! Every component receives its configuration explicitly at construction
//! and validates it there; nothing is read from ambient state except the
//! default anomaly quorum, which comes from `STABILIS_ANOMALY_QUORUM`:
//! - `any` (default): one firing rule flags an anomaly.
//! - `majority`: at least two of the three rules must fire.
//! - `all`: every rule must fire.

use std::sync::OnceLock;

use crate::error::{EngineError, Result};

/// How many anomaly rules must fire before a value is flagged.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnomalyQuorum {
    #[default]
    Any,
    Majority,
    All,
}

impl AnomalyQuorum {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "majority" | "two" | "2" => Self::Majority,
            "all" | "unanimous" | "three" | "3" => Self::All,
            _ => Self::Any,
        }
    }

    /// Number of rules (out of three) that must fire.
    #[must_use]
    pub const fn required_rules(self) -> usize {
        match self {
            Self::Any => 1,
            Self::Majority => 2,
            Self::All => 3,
        }
    }
}

static DEFAULT_QUORUM: OnceLock<AnomalyQuorum> = OnceLock::new();

/// Quorum used by `AnomalyConfig::default()` (reads env var on first call,
/// caches thereafter).
#[must_use]
pub fn default_quorum() -> AnomalyQuorum {
    *DEFAULT_QUORUM.get_or_init(|| {
        std::env::var("STABILIS_ANOMALY_QUORUM")
            .map(|v| AnomalyQuorum::from_str_loose(&v))
            .unwrap_or_default()
    })
}

fn require(ok: bool, field: &'static str, reason: &str) -> Result<()> {
    if ok {
        Ok(())
    } else {
        Err(EngineError::config(field, reason))
    }
}

fn finite_positive(x: f64) -> bool {
    x.is_finite() && x > 0.0
}

fn unit_interval(x: f64) -> bool {
    x.is_finite() && (0.0..=1.0).contains(&x)
}

fn open_unit_interval(x: f64) -> bool {
    x.is_finite() && x > 0.0 && x < 1.0
}

// ---------------------------------------------------------------------------
// Queueing
// ---------------------------------------------------------------------------

/// Parameters of the protected service, constant for a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueueingConfig {
    /// Parallel servers `c`.
    pub server_count: u32,
    /// Waiting room `K`.
    pub queue_capacity: u32,
    /// Per-server service rate `μ` (tx/s).
    pub service_rate: f64,
    /// Utilization at which the service is considered failing.
    pub rho_threshold: f64,
    /// SLA bound on blocking probability.
    pub sla_epsilon: f64,
    /// SLA bound on loss fraction.
    pub sla_delta: f64,
}

impl QueueingConfig {
    pub fn validate(&self) -> Result<()> {
        require(self.server_count >= 1, "server_count", "must be >= 1")?;
        require(
            finite_positive(self.service_rate),
            "service_rate",
            "must be finite and > 0",
        )?;
        require(
            self.rho_threshold.is_finite() && self.rho_threshold > 0.0 && self.rho_threshold < 1.0,
            "rho_threshold",
            "must lie in (0, 1)",
        )?;
        require(unit_interval(self.sla_epsilon), "sla_epsilon", "must lie in [0, 1]")?;
        require(unit_interval(self.sla_delta), "sla_delta", "must lie in [0, 1]")?;
        Ok(())
    }

    /// Aggregate capacity `c·μ`.
    #[must_use]
    pub fn capacity(&self) -> f64 {
        f64::from(self.server_count) * self.service_rate
    }
}

impl Default for QueueingConfig {
    fn default() -> Self {
        Self {
            server_count: 10,
            queue_capacity: 1000,
            service_rate: 100.0,
            rho_threshold: 0.85,
            sla_epsilon: 0.01,
            sla_delta: 0.05,
        }
    }
}

// ---------------------------------------------------------------------------
// Stability vector
// ---------------------------------------------------------------------------

/// Weights of the five components in the stability index, ordered C, L, Q, R, A.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComponentWeights(pub [f64; 5]);

impl Default for ComponentWeights {
    fn default() -> Self {
        Self([0.25, 0.20, 0.35, 0.10, 0.10])
    }
}

/// Normalization bounds and weights for the stability vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VrpsConfig {
    /// Baseline processing time (ms).
    pub t_base: f64,
    /// Critical processing time (ms).
    pub t_crit: f64,
    pub rho_thresh: f64,
    pub p_thresh: f64,
    pub u_crit: f64,
    pub weights: ComponentWeights,
    /// Operational stability region thresholds, ordered C, L, Q, R, A.
    pub osr_thresholds: [f64; 5],
}

impl VrpsConfig {
    pub fn validate(&self) -> Result<()> {
        require(
            self.t_base.is_finite() && self.t_base >= 0.0,
            "t_base",
            "must be finite and >= 0",
        )?;
        require(
            self.t_crit.is_finite() && self.t_crit > self.t_base,
            "t_crit",
            "must be finite and > t_base",
        )?;
        require(finite_positive(self.rho_thresh), "rho_thresh", "must be > 0")?;
        require(finite_positive(self.p_thresh), "p_thresh", "must be > 0")?;
        require(finite_positive(self.u_crit), "u_crit", "must be > 0")?;
        let w = &self.weights.0;
        require(
            w.iter().all(|x| x.is_finite() && *x >= 0.0),
            "weights",
            "must be finite and non-negative",
        )?;
        let sum: f64 = w.iter().sum();
        if (sum - 1.0).abs() > 1e-9 {
            return Err(EngineError::config(
                "weights",
                format!("must sum to 1, got {sum}"),
            ));
        }
        require(
            self.osr_thresholds.iter().all(|x| unit_interval(*x)),
            "osr_thresholds",
            "must lie in [0, 1]",
        )?;
        Ok(())
    }
}

impl Default for VrpsConfig {
    fn default() -> Self {
        Self {
            t_base: 10.0,
            t_crit: 500.0,
            rho_thresh: 0.85,
            p_thresh: 0.05,
            u_crit: 0.95,
            weights: ComponentWeights::default(),
            osr_thresholds: [0.7, 0.7, 0.8, 0.6, 0.9],
        }
    }
}

// ---------------------------------------------------------------------------
// Anomaly detection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnomalyConfig {
    /// Ring capacity of the rolling baseline.
    pub window_capacity: usize,
    pub quorum: AnomalyQuorum,
    /// IQR fence multiplier.
    pub iqr_k: f64,
    /// |z| above this fires the Z rule.
    pub z_threshold: f64,
    /// MAD multiplier (applied to the 1.4826-scaled MAD).
    pub mad_k: f64,
    /// |z| above this (without an anomaly) marks a tick suspicious.
    pub suspicious_z: f64,
    /// Confidence level of interval estimates and two-sample tests;
    /// the significance level is `1 - confidence_level`.
    pub confidence_level: f64,
}

impl AnomalyConfig {
    pub fn validate(&self) -> Result<()> {
        require(self.window_capacity >= 2, "window_capacity", "must be >= 2")?;
        require(finite_positive(self.iqr_k), "iqr_k", "must be > 0")?;
        require(finite_positive(self.z_threshold), "z_threshold", "must be > 0")?;
        require(finite_positive(self.mad_k), "mad_k", "must be > 0")?;
        require(
            finite_positive(self.suspicious_z) && self.suspicious_z <= self.z_threshold,
            "suspicious_z",
            "must be > 0 and <= z_threshold",
        )?;
        require(
            open_unit_interval(self.confidence_level),
            "confidence_level",
            "must lie in (0, 1)",
        )?;
        Ok(())
    }
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            window_capacity: 100,
            quorum: default_quorum(),
            iqr_k: 1.5,
            z_threshold: 3.0,
            mad_k: 3.0,
            suspicious_z: 2.0,
            confidence_level: 0.95,
        }
    }
}

// ---------------------------------------------------------------------------
// Markov tracking
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkovConfig {
    /// Power-iteration cap.
    pub max_iterations: u32,
    /// L1 convergence tolerance for power iteration.
    pub tolerance: f64,
    /// `|det(I - Q)|` below this makes MTTA undefined.
    pub singular_epsilon: f64,
}

impl MarkovConfig {
    pub fn validate(&self) -> Result<()> {
        require(self.max_iterations >= 1, "max_iterations", "must be >= 1")?;
        require(finite_positive(self.tolerance), "tolerance", "must be > 0")?;
        require(
            finite_positive(self.singular_epsilon),
            "singular_epsilon",
            "must be > 0",
        )?;
        Ok(())
    }
}

impl Default for MarkovConfig {
    fn default() -> Self {
        Self {
            max_iterations: 1000,
            tolerance: 1e-9,
            singular_epsilon: 1e-9,
        }
    }
}

// ---------------------------------------------------------------------------
// Forecast
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastConfig {
    pub process_noise: f64,
    pub measurement_noise: f64,
    pub initial_covariance: f64,
    pub initial_estimate: f64,
    /// Trailing window for the similarity moving average.
    pub similarity_window: usize,
    /// Similarity strictly above this is `High`.
    pub similarity_high: f64,
    /// Similarity at or above this (and not `High`) is `Medium`.
    pub similarity_medium: f64,
    /// Similarity strictly below this raises an alert.
    pub similarity_alert: f64,
    /// Moving average below this starts the retraining countdown.
    pub retrain_threshold: f64,
    /// Consecutive low-average observations tolerated before retraining is
    /// requested.
    pub retrain_after: usize,
}

impl ForecastConfig {
    pub fn validate(&self) -> Result<()> {
        require(finite_positive(self.process_noise), "process_noise", "must be > 0")?;
        require(
            finite_positive(self.measurement_noise),
            "measurement_noise",
            "must be > 0",
        )?;
        require(
            finite_positive(self.initial_covariance),
            "initial_covariance",
            "must be > 0",
        )?;
        require(
            unit_interval(self.initial_estimate),
            "initial_estimate",
            "must lie in [0, 1]",
        )?;
        require(self.similarity_window >= 1, "similarity_window", "must be >= 1")?;
        let cosine = |x: f64| x.is_finite() && (-1.0..=1.0).contains(&x);
        require(cosine(self.similarity_high), "similarity_high", "must lie in [-1, 1]")?;
        require(
            cosine(self.similarity_medium) && self.similarity_medium <= self.similarity_high,
            "similarity_medium",
            "must lie in [-1, similarity_high]",
        )?;
        require(cosine(self.similarity_alert), "similarity_alert", "must lie in [-1, 1]")?;
        require(cosine(self.retrain_threshold), "retrain_threshold", "must lie in [-1, 1]")?;
        Ok(())
    }
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            process_noise: 0.01,
            measurement_noise: 0.05,
            initial_covariance: 1.0,
            initial_estimate: 0.8,
            similarity_window: 10,
            similarity_high: 0.9,
            similarity_medium: 0.6,
            similarity_alert: 0.7,
            retrain_threshold: 0.6,
            // Five minutes of one-second ticks.
            retrain_after: 300,
        }
    }
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

/// Orchestrator settings plus the configs of every owned component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorConfig {
    /// Trailing window used to aggregate samples into rates (seconds).
    pub window_seconds: f64,
    /// Samples older than `now - retention_seconds` are dropped as stale.
    pub retention_seconds: f64,
    /// Maximum number of tick records kept in the trajectory.
    pub trajectory_capacity: usize,
    /// Blocking probability at which a tick is classified `blocked`.
    pub blocked_threshold: f64,
    pub vrps: VrpsConfig,
    pub anomaly: AnomalyConfig,
    pub markov: MarkovConfig,
    pub forecast: ForecastConfig,
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<()> {
        require(
            finite_positive(self.window_seconds),
            "window_seconds",
            "must be > 0",
        )?;
        require(
            self.retention_seconds.is_finite() && self.retention_seconds >= self.window_seconds,
            "retention_seconds",
            "must be >= window_seconds",
        )?;
        require(
            self.trajectory_capacity >= 1,
            "trajectory_capacity",
            "must be >= 1",
        )?;
        require(
            self.blocked_threshold.is_finite()
                && self.blocked_threshold > 0.0
                && self.blocked_threshold <= 1.0,
            "blocked_threshold",
            "must lie in (0, 1]",
        )?;
        self.vrps.validate()?;
        self.anomaly.validate()?;
        self.markov.validate()?;
        self.forecast.validate()?;
        Ok(())
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            window_seconds: 10.0,
            retention_seconds: 60.0,
            trajectory_capacity: 1000,
            blocked_threshold: 0.5,
            vrps: VrpsConfig::default(),
            anomaly: AnomalyConfig::default(),
            markov: MarkovConfig::default(),
            forecast: ForecastConfig::default(),
        }
    }
}
