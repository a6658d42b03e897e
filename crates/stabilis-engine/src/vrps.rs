//! Stability vector (capacity, load, quality, resources, anomaly) and the
//! weighted stability index `Sust`.
//!
//! ```text
//! C = 1 − (T − T_base)/(T_crit − T_base)
//! L = 1 − (ρ/ρ_thresh)²
//! Q = 1 − P_block/P_thresh
//! R = 1 − U/U_crit
//! A = 1 − N_anom/(N_anom + N_bg)        (A = 1 when there is no traffic)
//! Sust = Σ wᵢ·componentᵢ
//! ```
//!
//! Every component and `Sust` is saturated into `[0, 1]`; NaN saturates to 0.

use crate::config::VrpsConfig;
use crate::error::Result;

pub const COMPONENT_COUNT: usize = 5;

/// `Sust` strictly above this is healthy.
const HEALTHY_ABOVE: f64 = 0.8;

/// `Sust` at or above this (and not healthy) is degraded.
const DEGRADED_FROM: f64 = 0.5;

/// Rounding slack at the status boundaries: a weighted sum that is exactly
/// 0.8 on paper can land one ulp either side of it.
const STATUS_TOLERANCE: f64 = 1e-9;

// ---------------------------------------------------------------------------
// Components and status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Capacity,
    Load,
    Quality,
    Resources,
    Anomaly,
}

impl Component {
    /// Vector order: C, L, Q, R, A.
    pub const ALL: [Self; COMPONENT_COUNT] = [
        Self::Capacity,
        Self::Load,
        Self::Quality,
        Self::Resources,
        Self::Anomaly,
    ];

    /// Tie-break order for the weakest component: Q > L > C > R > A.
    pub const PRIORITY: [Self; COMPONENT_COUNT] = [
        Self::Quality,
        Self::Load,
        Self::Capacity,
        Self::Resources,
        Self::Anomaly,
    ];

    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Capacity => 0,
            Self::Load => 1,
            Self::Quality => 2,
            Self::Resources => 3,
            Self::Anomaly => 4,
        }
    }

    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Capacity => "C",
            Self::Load => "L",
            Self::Quality => "Q",
            Self::Resources => "R",
            Self::Anomaly => "A",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SystemStatus {
    Healthy,
    Degraded,
    Critical,
}

impl SystemStatus {
    #[must_use]
    pub fn from_sust(sust: f64) -> Self {
        if sust > HEALTHY_ABOVE + STATUS_TOLERANCE {
            Self::Healthy
        } else if sust >= DEGRADED_FROM - STATUS_TOLERANCE {
            Self::Degraded
        } else {
            Self::Critical
        }
    }

    /// 0 for healthy, 1 degraded, 2 critical.
    #[must_use]
    pub const fn index(self) -> u8 {
        match self {
            Self::Healthy => 0,
            Self::Degraded => 1,
            Self::Critical => 2,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "HEALTHY",
            Self::Degraded => "DEGRADED",
            Self::Critical => "CRITICAL",
        }
    }
}

/// Map to `[0, 1]`; NaN becomes 0.
#[must_use]
pub fn saturate(x: f64) -> f64 {
    if x.is_nan() { 0.0 } else { x.clamp(0.0, 1.0) }
}

// ---------------------------------------------------------------------------
// Inputs and vector
// ---------------------------------------------------------------------------

/// Raw measurements for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VrpsInputs {
    /// Mean processing time (ms); `None` when nothing was measured.
    pub processing_time_ms: Option<f64>,
    pub utilization: f64,
    pub blocking_probability: f64,
    /// Resource utilization `U` in `[0, 1]`.
    pub resource_utilization: f64,
    pub anomalous_count: f64,
    pub background_count: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StabilityVector {
    /// C, L, Q, R, A.
    pub components: [f64; COMPONENT_COUNT],
    pub sust: f64,
    pub status: SystemStatus,
    /// Anomalous share of traffic `N_anom / (N_anom + N_bg)`.
    pub anomaly_ratio: f64,
}

impl StabilityVector {
    #[must_use]
    pub fn get(&self, component: Component) -> f64 {
        self.components[component.index()]
    }

    /// Lowest component, ties broken by [`Component::PRIORITY`].
    #[must_use]
    pub fn weakest(&self) -> Component {
        let mut best = Component::PRIORITY[0];
        for c in Component::PRIORITY.into_iter().skip(1) {
            if self.get(c) < self.get(best) {
                best = c;
            }
        }
        best
    }
}

// ---------------------------------------------------------------------------
// Calculator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct StabilityVectorCalculator {
    config: VrpsConfig,
}

impl StabilityVectorCalculator {
    pub fn new(config: VrpsConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    #[must_use]
    pub fn config(&self) -> &VrpsConfig {
        &self.config
    }

    #[must_use]
    pub fn capacity(&self, processing_time_ms: Option<f64>) -> f64 {
        let Some(t) = processing_time_ms else {
            return 1.0;
        };
        let cfg = &self.config;
        saturate(1.0 - (t - cfg.t_base) / (cfg.t_crit - cfg.t_base))
    }

    #[must_use]
    pub fn load(&self, rho: f64) -> f64 {
        saturate(1.0 - (rho / self.config.rho_thresh).powi(2))
    }

    #[must_use]
    pub fn quality(&self, p_block: f64) -> f64 {
        saturate(1.0 - p_block / self.config.p_thresh)
    }

    #[must_use]
    pub fn resources(&self, u: f64) -> f64 {
        saturate(1.0 - u / self.config.u_crit)
    }

    /// `(A, anomaly ratio)`.
    #[must_use]
    pub fn anomaly(&self, n_anom: f64, n_bg: f64) -> (f64, f64) {
        let total = n_anom + n_bg;
        if total > 0.0 {
            let ratio = n_anom / total;
            (saturate(1.0 - ratio), ratio)
        } else {
            (1.0, 0.0)
        }
    }

    #[must_use]
    pub fn sust(&self, components: &[f64; COMPONENT_COUNT]) -> f64 {
        saturate(
            self.config
                .weights
                .0
                .iter()
                .zip(components)
                .map(|(w, x)| w * x)
                .sum(),
        )
    }

    #[must_use]
    pub fn compute(&self, inputs: &VrpsInputs) -> StabilityVector {
        let (a, anomaly_ratio) = self.anomaly(inputs.anomalous_count, inputs.background_count);
        let components = [
            self.capacity(inputs.processing_time_ms),
            self.load(inputs.utilization),
            self.quality(inputs.blocking_probability),
            self.resources(inputs.resource_utilization),
            a,
        ];
        let sust = self.sust(&components);
        StabilityVector {
            components,
            sust,
            status: SystemStatus::from_sust(sust),
            anomaly_ratio,
        }
    }
}

// ---------------------------------------------------------------------------
// Operational stability region
// ---------------------------------------------------------------------------

/// Per-component lower bounds of acceptable operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OperatingRegion {
    thresholds: [f64; COMPONENT_COUNT],
}

impl OperatingRegion {
    #[must_use]
    pub const fn new(thresholds: [f64; COMPONENT_COUNT]) -> Self {
        Self { thresholds }
    }

    #[must_use]
    pub fn from_config(config: &VrpsConfig) -> Self {
        Self::new(config.osr_thresholds)
    }

    #[must_use]
    pub fn threshold(&self, component: Component) -> f64 {
        self.thresholds[component.index()]
    }

    /// `value − threshold` for one component.
    #[must_use]
    pub fn margin(&self, vector: &StabilityVector, component: Component) -> f64 {
        vector.get(component) - self.threshold(component)
    }

    #[must_use]
    pub fn contains(&self, vector: &StabilityVector) -> bool {
        self.violations(vector).is_empty()
    }

    /// Components strictly below their threshold, in C, L, Q, R, A order.
    #[must_use]
    pub fn violations(&self, vector: &StabilityVector) -> Vec<Component> {
        self.violations_of(&vector.components)
    }

    /// [`Self::violations`] over a raw component array, e.g. a forecast.
    #[must_use]
    pub fn violations_of(&self, components: &[f64; COMPONENT_COUNT]) -> Vec<Component> {
        Component::ALL
            .into_iter()
            .filter(|c| components[c.index()] < self.threshold(*c))
            .collect()
    }

    /// `min(value − threshold)`; negative outside the region.
    #[must_use]
    pub fn distance_to_boundary(&self, vector: &StabilityVector) -> f64 {
        Component::ALL
            .into_iter()
            .map(|c| self.margin(vector, c))
            .fold(f64::INFINITY, f64::min)
    }
}

impl Default for OperatingRegion {
    fn default() -> Self {
        Self::from_config(&VrpsConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn calc() -> StabilityVectorCalculator {
        StabilityVectorCalculator::new(VrpsConfig::default()).unwrap()
    }

    #[test]
    fn ideal_inputs_are_healthy() {
        let v = calc().compute(&VrpsInputs {
            processing_time_ms: Some(10.0),
            ..VrpsInputs::default()
        });
        assert_eq!(v.components, [1.0; 5]);
        assert!((v.sust - 1.0).abs() < 1e-12);
        assert_eq!(v.status, SystemStatus::Healthy);
    }

    #[test]
    fn no_traffic_means_full_anomaly_score() {
        let (a, ratio) = calc().anomaly(0.0, 0.0);
        assert_eq!(a, 1.0);
        assert_eq!(ratio, 0.0);
    }

    #[test]
    fn anomaly_ratio() {
        let (a, ratio) = calc().anomaly(25.0, 75.0);
        assert!((a - 0.75).abs() < 1e-12);
        assert!((ratio - 0.25).abs() < 1e-12);
    }

    #[test]
    fn pathological_inputs_stay_in_unit_interval() {
        let c = calc();
        let cases = [
            VrpsInputs {
                processing_time_ms: Some(1e9),
                utilization: 50.0,
                blocking_probability: 1.0,
                resource_utilization: 10.0,
                anomalous_count: 1e9,
                background_count: 0.0,
            },
            VrpsInputs {
                processing_time_ms: Some(-5.0),
                utilization: -1.0,
                blocking_probability: -1.0,
                resource_utilization: -1.0,
                anomalous_count: 0.0,
                background_count: 5.0,
            },
            VrpsInputs {
                processing_time_ms: Some(f64::NAN),
                utilization: f64::NAN,
                blocking_probability: f64::INFINITY,
                resource_utilization: f64::NAN,
                anomalous_count: f64::NAN,
                background_count: 1.0,
            },
        ];
        for inputs in cases {
            let v = c.compute(&inputs);
            for x in v.components {
                assert!((0.0..=1.0).contains(&x), "{inputs:?} -> {x}");
            }
            assert!((0.0..=1.0).contains(&v.sust));
        }
    }

    #[test]
    fn status_boundaries() {
        assert_eq!(SystemStatus::from_sust(0.81), SystemStatus::Healthy);
        assert_eq!(SystemStatus::from_sust(0.8), SystemStatus::Degraded);
        assert_eq!(SystemStatus::from_sust(0.5), SystemStatus::Degraded);
        assert_eq!(SystemStatus::from_sust(0.4999), SystemStatus::Critical);
    }

    #[test]
    fn weights_apply() {
        let c = calc();
        let sust = c.sust(&[1.0, 0.0, 0.0, 0.0, 0.0]);
        assert!((sust - 0.25).abs() < 1e-12);
        let sust = c.sust(&[0.0, 0.0, 1.0, 0.0, 0.0]);
        assert!((sust - 0.35).abs() < 1e-12);
    }

    #[test]
    fn load_is_quadratic() {
        let c = calc();
        assert!((c.load(0.425) - 0.75).abs() < 1e-12);
        assert_eq!(c.load(0.95), 0.0);
    }

    #[test]
    fn weakest_ties_follow_priority() {
        let v = StabilityVector {
            components: [0.5, 0.5, 0.5, 0.5, 0.5],
            sust: 0.5,
            status: SystemStatus::Degraded,
            anomaly_ratio: 0.0,
        };
        assert_eq!(v.weakest(), Component::Quality);
        let v = StabilityVector {
            components: [0.3, 0.3, 0.9, 0.3, 0.3],
            ..v
        };
        assert_eq!(v.weakest(), Component::Load);
        let v = StabilityVector {
            components: [0.9, 0.9, 0.9, 0.2, 0.2],
            ..v
        };
        assert_eq!(v.weakest(), Component::Resources);
    }

    #[test]
    fn region_membership() {
        let region = OperatingRegion::default();
        let c = calc();
        let good = c.compute(&VrpsInputs::default());
        assert!(region.contains(&good));
        assert!((region.distance_to_boundary(&good) - 0.1).abs() < 1e-12);

        let bad = c.compute(&VrpsInputs {
            blocking_probability: 0.04,
            resource_utilization: 0.9,
            ..VrpsInputs::default()
        });
        assert_eq!(
            region.violations(&bad),
            vec![Component::Quality, Component::Resources]
        );
        assert!(region.distance_to_boundary(&bad) < 0.0);
    }

    #[test]
    fn status_boundaries_absorb_rounding() {
        let ulp = f64::EPSILON;
        assert_eq!(SystemStatus::from_sust(0.8), SystemStatus::Degraded);
        assert_eq!(SystemStatus::from_sust(0.8 + ulp), SystemStatus::Degraded);
        assert_eq!(SystemStatus::from_sust(0.8 - ulp), SystemStatus::Degraded);
        assert_eq!(SystemStatus::from_sust(0.801), SystemStatus::Healthy);
        assert_eq!(SystemStatus::from_sust(0.5), SystemStatus::Degraded);
        assert_eq!(SystemStatus::from_sust(0.5 - ulp), SystemStatus::Degraded);
        assert_eq!(SystemStatus::from_sust(0.499), SystemStatus::Critical);
    }
}
