//! Rolling-baseline anomaly detector.
//!
//! The baseline is a fixed-capacity ring of the most recent raw values. Mean
//! and variance are kept incrementally (Welford, with the inverse update on
//! eviction) and recomputed exactly from the ring each time it wraps, so
//! eviction rounding never accumulates. Quartiles, median and MAD are
//! recomputed from the ring on demand since they do not compose.
//!
//! Three independent rules test a new value:
//!
//! | Rule   | Fires when                            |
//! |--------|---------------------------------------|
//! | IQR    | `x > Q3 + k·IQR`                      |
//! | Z      | `|z| > z_threshold` (population std)  |
//! | MAD    | `x > median + k·1.4826·MAD`           |
//!
//! A value is anomalous when at least the configured quorum of rules fire.
//! Confidence is `1 − exp(−e)` where `e` is the largest excess past a
//! threshold, in units of that rule's spread.

use crate::config::AnomalyConfig;
use crate::error::{EngineError, Result};
use crate::inference::{StatisticalInference, TwoSampleTest};

/// Consistency constant relating MAD to σ under normality.
const MAD_SCALE: f64 = 1.4826;

/// Minimum baseline length before any rule is evaluated.
const MIN_BASELINE: usize = 2;

/// A spread at or below this fraction of `max(|mean|, 1)` is rounding noise.
const RELATIVE_SPREAD_FLOOR: f64 = 1e-12;

// ---------------------------------------------------------------------------
// Baseline
// ---------------------------------------------------------------------------

/// Bounded ring of recent values with running moments.
#[derive(Debug, Clone)]
pub struct BaselineStats {
    ring: Vec<f64>,
    capacity: usize,
    write_pos: usize,
    count: usize,
    mean: f64,
    m2: f64,
}

impl BaselineStats {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: vec![0.0; capacity],
            capacity,
            write_pos: 0,
            count: 0,
            mean: 0.0,
            m2: 0.0,
        }
    }

    /// Push a value, evicting (and returning) the oldest when full.
    pub fn push(&mut self, value: f64) -> Option<f64> {
        if self.capacity == 0 {
            return None;
        }
        let evicted = (self.count == self.capacity).then(|| self.ring[self.write_pos]);
        if let Some(old) = evicted {
            self.remove_moment(old);
        }
        self.ring[self.write_pos] = value;
        self.write_pos = (self.write_pos + 1) % self.capacity;
        self.count += 1;
        self.add_moment(value);
        if evicted.is_some() && self.write_pos == 0 {
            self.recompute_moments();
        }
        evicted
    }

    /// Whether every value in the ring is bit-identical.
    #[must_use]
    pub fn is_constant(&self) -> bool {
        let mut it = self.values();
        match it.next() {
            Some(first) => it.all(|x| x.to_bits() == first.to_bits()),
            None => true,
        }
    }

    /// Two-pass mean and `m2` straight from the ring.
    fn recompute_moments(&mut self) {
        let n = self.count as f64;
        let mean = self.values().sum::<f64>() / n;
        let m2 = self.values().map(|x| (x - mean) * (x - mean)).sum();
        self.mean = mean;
        self.m2 = m2;
    }

    /// Welford update; `count` already includes `x`.
    fn add_moment(&mut self, x: f64) {
        let n = self.count as f64;
        let d = x - self.mean;
        self.mean += d / n;
        self.m2 += d * (x - self.mean);
    }

    /// Inverse Welford update; decrements `count`.
    fn remove_moment(&mut self, y: f64) {
        if self.count <= 1 {
            self.count = 0;
            self.mean = 0.0;
            self.m2 = 0.0;
            return;
        }
        let n = self.count as f64;
        let mean_without = (n * self.mean - y) / (n - 1.0);
        self.m2 = (self.m2 - (y - self.mean) * (y - mean_without)).max(0.0);
        self.mean = mean_without;
        self.count -= 1;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.count
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn mean(&self) -> f64 {
        self.mean
    }

    /// Population variance.
    #[must_use]
    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            (self.m2 / self.count as f64).max(0.0)
        }
    }

    #[must_use]
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Values oldest first.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        let start = (self.write_pos + self.capacity - self.count) % self.capacity.max(1);
        (0..self.count).map(move |i| self.ring[(start + i) % self.capacity.max(1)])
    }

    fn sorted(&self) -> Vec<f64> {
        let mut v: Vec<f64> = self.values().collect();
        v.sort_by(f64::total_cmp);
        v
    }

    /// `(Q1, Q3)` with linear interpolation between order statistics.
    #[must_use]
    pub fn quartiles(&self) -> (f64, f64) {
        let s = self.sorted();
        (percentile(&s, 0.25), percentile(&s, 0.75))
    }

    /// `(median, MAD)`.
    #[must_use]
    pub fn median_mad(&self) -> (f64, f64) {
        let s = self.sorted();
        let median = percentile(&s, 0.5);
        let mut dev: Vec<f64> = s.iter().map(|x| (x - median).abs()).collect();
        dev.sort_by(f64::total_cmp);
        (median, percentile(&dev, 0.5))
    }
}

/// Percentile of sorted data, interpolating linearly between neighbors.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let pos = p * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            let frac = pos - lo as f64;
            sorted[lo] + frac * (sorted[hi] - sorted[lo])
        }
    }
}

// ---------------------------------------------------------------------------
// Verdicts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnomalyRule {
    Iqr,
    ZScore,
    Mad,
}

impl AnomalyRule {
    pub const ALL: [Self; 3] = [Self::Iqr, Self::ZScore, Self::Mad];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Iqr => "iqr",
            Self::ZScore => "z_score",
            Self::Mad => "mad",
        }
    }
}

/// One rule's evaluation against one value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuleOutcome {
    pub rule: AnomalyRule,
    pub fired: bool,
    pub threshold: f64,
    /// How far past the threshold, never negative.
    pub distance: f64,
    /// `distance` in units of the rule's spread; `+∞` if the spread is 0.
    pub normalized_excess: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyVerdict {
    pub value: f64,
    pub is_anomaly: bool,
    pub z_score: f64,
    pub confidence: f64,
    pub rules: [RuleOutcome; 3],
}

impl AnomalyVerdict {
    pub fn fired_rules(&self) -> impl Iterator<Item = AnomalyRule> + '_ {
        self.rules.iter().filter(|r| r.fired).map(|r| r.rule)
    }

    #[must_use]
    pub fn outcome(&self, rule: AnomalyRule) -> &RuleOutcome {
        match rule {
            AnomalyRule::Iqr => &self.rules[0],
            AnomalyRule::ZScore => &self.rules[1],
            AnomalyRule::Mad => &self.rules[2],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    /// Baseline shorter than two points; no rule was evaluated.
    InsufficientData { have: usize },
    Evaluated(AnomalyVerdict),
}

impl Detection {
    #[must_use]
    pub fn is_anomaly(&self) -> bool {
        matches!(self, Self::Evaluated(v) if v.is_anomaly)
    }

    #[must_use]
    pub fn z_score(&self) -> f64 {
        match self {
            Self::Evaluated(v) => v.z_score,
            Self::InsufficientData { .. } => 0.0,
        }
    }

    #[must_use]
    pub fn verdict(&self) -> Option<&AnomalyVerdict> {
        match self {
            Self::Evaluated(v) => Some(v),
            Self::InsufficientData { .. } => None,
        }
    }

    /// The verdict, or `InsufficientData` as an error.
    pub fn into_verdict(self) -> Result<AnomalyVerdict> {
        match self {
            Self::Evaluated(v) => Ok(v),
            Self::InsufficientData { have } => Err(EngineError::InsufficientData {
                needed: MIN_BASELINE,
                have,
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    config: AnomalyConfig,
    baseline: BaselineStats,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            baseline: BaselineStats::new(config.window_capacity),
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &AnomalyConfig {
        &self.config
    }

    #[must_use]
    pub fn baseline(&self) -> &BaselineStats {
        &self.baseline
    }

    /// Non-finite values are ignored.
    pub fn update_baseline(&mut self, value: f64) {
        if value.is_finite() {
            self.baseline.push(value);
        }
    }

    /// Test each value against the current baseline (which is not updated).
    /// Two-sample test of `current` against the baseline ring at the
    /// configured confidence level.
    pub fn compare_window(&self, current: &[f64]) -> Result<TwoSampleTest> {
        let baseline: Vec<f64> = self.baseline.values().collect();
        StatisticalInference::new(self.config.confidence_level)?.two_sample_test(&baseline, current)
    }

    #[must_use]
    pub fn detect_anomaly(&self, values: &[f64]) -> Vec<Detection> {
        values.iter().map(|v| self.detect(*v)).collect()
    }

    #[must_use]
    pub fn detect(&self, value: f64) -> Detection {
        let have = self.baseline.len();
        if have < MIN_BASELINE {
            return Detection::InsufficientData { have };
        }

        let (q1, q3) = self.baseline.quartiles();
        let iqr = q3 - q1;
        let iqr_rule = fence_rule(AnomalyRule::Iqr, value, q3 + self.config.iqr_k * iqr, iqr);

        let std = self.baseline.std_dev();
        let floor = RELATIVE_SPREAD_FLOOR * self.baseline.mean().abs().max(1.0);
        let z = if std > floor && !self.baseline.is_constant() {
            (value - self.baseline.mean()) / std
        } else {
            0.0
        };
        let z_excess = z.abs() - self.config.z_threshold;
        let z_rule = RuleOutcome {
            rule: AnomalyRule::ZScore,
            fired: z_excess > 0.0,
            threshold: self.config.z_threshold,
            distance: z_excess.max(0.0),
            normalized_excess: z_excess.max(0.0),
        };

        let (median, mad) = self.baseline.median_mad();
        let scaled_mad = if MAD_SCALE * mad > floor { MAD_SCALE * mad } else { 0.0 };
        let mad_rule = fence_rule(
            AnomalyRule::Mad,
            value,
            median + self.config.mad_k * scaled_mad,
            scaled_mad,
        );

        let rules = [iqr_rule, z_rule, mad_rule];
        let fired = rules.iter().filter(|r| r.fired).count();
        let is_anomaly = fired >= self.config.quorum.required_rules();
        let excess = rules
            .iter()
            .filter(|r| r.fired)
            .map(|r| r.normalized_excess)
            .fold(0.0, f64::max);
        let confidence = if fired == 0 { 0.0 } else { 1.0 - (-excess).exp() };

        Detection::Evaluated(AnomalyVerdict {
            value,
            is_anomaly,
            z_score: z,
            confidence,
            rules,
        })
    }
}

fn fence_rule(rule: AnomalyRule, value: f64, fence: f64, spread: f64) -> RuleOutcome {
    let excess = value - fence;
    let distance = excess.max(0.0);
    let normalized_excess = if distance == 0.0 {
        0.0
    } else if spread > 0.0 {
        distance / spread
    } else {
        f64::INFINITY
    };
    RuleOutcome {
        rule,
        fired: excess > 0.0,
        threshold: fence,
        distance,
        normalized_excess,
    }
}
