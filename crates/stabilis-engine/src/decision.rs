//! Nine-mode response matrix.
//!
//! The row is the system status (healthy, degraded, critical). The column is
//! a severity band taken from the weakest component's margin against its
//! operating-region threshold:
//!
//! | margin          | band |
//! |-----------------|------|
//! | `≥ 0`           | 1    |
//! | `≥ −0.25`       | 2    |
//! | `< −0.25`       | 3    |
//!
//! `mode = 3·status + band`. The decision is a pure function of the vector.

use crate::error::Degradation;
use crate::vrps::{Component, OperatingRegion, StabilityVector, SystemStatus};

/// Lower edge of the second severity band.
const ELEVATED_MARGIN: f64 = -0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResponseMode {
    Monitoring = 1,
    EnhancedMonitoring = 2,
    ModelAnalysis = 3,
    TargetMitigation = 4,
    GeneralProtection = 5,
    PreventiveAlert = 6,
    AggressiveMitigation = 7,
    ComprehensiveDefense = 8,
    CriticalLockdown = 9,
}

impl ResponseMode {
    pub const ALL: [Self; 9] = [
        Self::Monitoring,
        Self::EnhancedMonitoring,
        Self::ModelAnalysis,
        Self::TargetMitigation,
        Self::GeneralProtection,
        Self::PreventiveAlert,
        Self::AggressiveMitigation,
        Self::ComprehensiveDefense,
        Self::CriticalLockdown,
    ];

    #[must_use]
    pub const fn number(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn from_number(n: u8) -> Option<Self> {
        Self::ALL.get(usize::from(n).checked_sub(1)?).copied()
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Monitoring => "monitoring",
            Self::EnhancedMonitoring => "enhanced_monitoring",
            Self::ModelAnalysis => "model_analysis",
            Self::TargetMitigation => "target_mitigation",
            Self::GeneralProtection => "general_protection",
            Self::PreventiveAlert => "preventive_alert",
            Self::AggressiveMitigation => "aggressive_mitigation",
            Self::ComprehensiveDefense => "comprehensive_defense",
            Self::CriticalLockdown => "critical_lockdown",
        }
    }

    /// Action the collaborator should take.
    #[must_use]
    pub const fn action(self) -> &'static str {
        match self {
            Self::Monitoring => "pass",
            Self::EnhancedMonitoring => "log_enhanced",
            Self::ModelAnalysis => "alert_model_drift",
            Self::TargetMitigation => "target_mitigation",
            Self::GeneralProtection => "general_protection",
            Self::PreventiveAlert => "preventive_alert",
            Self::AggressiveMitigation => "aggressive_mitigation",
            Self::ComprehensiveDefense => "comprehensive_defense",
            Self::CriticalLockdown => "critical_lockdown",
        }
    }

    #[must_use]
    pub const fn status(self) -> SystemStatus {
        match self.number() {
            1..=3 => SystemStatus::Healthy,
            4..=6 => SystemStatus::Degraded,
            _ => SystemStatus::Critical,
        }
    }
}

/// Severity band within a status row.
#[must_use]
pub fn severity_band(margin: f64) -> u8 {
    if margin >= 0.0 {
        1
    } else if margin >= ELEVATED_MARGIN {
        2
    } else {
        3
    }
}

/// One decision per tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ModeDecision {
    pub timestamp: f64,
    pub mode: ResponseMode,
    pub status: SystemStatus,
    pub triggering_component: Component,
    /// Triggering component's margin against its threshold.
    pub margin: f64,
    pub sust: f64,
    /// Components outside the operating region.
    pub violations: Vec<Component>,
    pub degradations: Vec<Degradation>,
    /// `true` iff no degradation affected this tick.
    pub valid: bool,
}

impl ModeDecision {
    /// Attach per-tick degradations (deduplicated); clears `valid` if any.
    #[must_use]
    pub fn with_degradations(mut self, degradations: impl IntoIterator<Item = Degradation>) -> Self {
        for d in degradations {
            if !self.degradations.contains(&d) {
                self.degradations.push(d);
            }
        }
        self.valid = self.degradations.is_empty();
        self
    }

    #[must_use]
    pub fn reason(&self) -> String {
        let mut s = format!(
            "{} (sust={:.3}); weakest {} margin {:+.3}",
            self.status.as_str(),
            self.sust,
            self.triggering_component.symbol(),
            self.margin
        );
        if !self.violations.is_empty() {
            let names: Vec<&str> = self.violations.iter().map(|c| c.symbol()).collect();
            s.push_str("; outside region: ");
            s.push_str(&names.join(","));
        }
        s
    }
}

#[derive(Debug, Clone, Default)]
pub struct DecisionMatrix {
    region: OperatingRegion,
}

impl DecisionMatrix {
    #[must_use]
    pub const fn new(region: OperatingRegion) -> Self {
        Self { region }
    }

    #[must_use]
    pub fn region(&self) -> &OperatingRegion {
        &self.region
    }

    #[must_use]
    pub fn mode_for(status: SystemStatus, band: u8) -> ResponseMode {
        let n = 3 * status.index() + band.clamp(1, 3);
        ResponseMode::from_number(n).unwrap_or(ResponseMode::CriticalLockdown)
    }

    #[must_use]
    pub fn decide(&self, vector: &StabilityVector, timestamp: f64) -> ModeDecision {
        let weak = vector.weakest();
        let margin = self.region.margin(vector, weak);
        ModeDecision {
            timestamp,
            mode: Self::mode_for(vector.status, severity_band(margin)),
            status: vector.status,
            triggering_component: weak,
            margin,
            sust: vector.sust,
            violations: self.region.violations(vector),
            degradations: Vec::new(),
            valid: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vector(components: [f64; 5], sust: f64) -> StabilityVector {
        StabilityVector {
            components,
            sust,
            status: SystemStatus::from_sust(sust),
            anomaly_ratio: 0.0,
        }
    }

    #[test]
    fn numbers_round_trip() {
        for m in ResponseMode::ALL {
            assert_eq!(ResponseMode::from_number(m.number()), Some(m));
        }
        assert_eq!(ResponseMode::from_number(0), None);
        assert_eq!(ResponseMode::from_number(10), None);
    }

    #[test]
    fn bands() {
        assert_eq!(severity_band(0.0), 1);
        assert_eq!(severity_band(0.3), 1);
        assert_eq!(severity_band(-0.01), 2);
        assert_eq!(severity_band(-0.25), 2);
        assert_eq!(severity_band(-0.26), 3);
    }

    #[test]
    fn every_cell_is_reachable() {
        for status in [
            SystemStatus::Healthy,
            SystemStatus::Degraded,
            SystemStatus::Critical,
        ] {
            for band in 1..=3 {
                let m = DecisionMatrix::mode_for(status, band);
                assert_eq!(m.status(), status);
                assert_eq!(m.number(), 3 * status.index() + band);
            }
        }
    }

    #[test]
    fn all_ones_is_monitoring() {
        let d = DecisionMatrix::default().decide(&vector([1.0; 5], 1.0), 12.5);
        assert_eq!(d.mode, ResponseMode::Monitoring);
        assert_eq!(d.mode.action(), "pass");
        assert_eq!(d.triggering_component, Component::Quality);
        assert!(d.valid);
        assert!(d.violations.is_empty());
        assert_eq!(d.timestamp, 12.5);
    }

    #[test]
    fn healthy_with_slightly_weak_load() {
        let d = DecisionMatrix::default().decide(&vector([1.0, 0.6, 1.0, 1.0, 1.0], 0.92), 0.0);
        assert_eq!(d.status, SystemStatus::Healthy);
        assert_eq!(d.triggering_component, Component::Load);
        assert_eq!(d.mode, ResponseMode::EnhancedMonitoring);
        assert_eq!(d.violations, vec![Component::Load]);
    }

    #[test]
    fn critical_with_collapsed_quality_is_lockdown() {
        let d = DecisionMatrix::default().decide(&vector([0.5, 0.2, 0.0, 0.5, 1.0], 0.25), 0.0);
        assert_eq!(d.status, SystemStatus::Critical);
        assert_eq!(d.triggering_component, Component::Quality);
        assert_eq!(d.mode, ResponseMode::CriticalLockdown);
        assert_eq!(d.mode.action(), "critical_lockdown");
    }

    #[test]
    fn decision_is_pure() {
        let m = DecisionMatrix::default();
        let v = vector([0.7, 0.4, 0.9, 0.8, 0.95], 0.7);
        assert_eq!(m.decide(&v, 1.0), m.decide(&v, 1.0));
    }

    #[test]
    fn degradations_clear_validity() {
        let d = DecisionMatrix::default()
            .decide(&vector([1.0; 5], 1.0), 0.0)
            .with_degradations([Degradation::Saturated, Degradation::Saturated]);
        assert!(!d.valid);
        assert_eq!(d.degradations, vec![Degradation::Saturated]);
        let ok = DecisionMatrix::default()
            .decide(&vector([1.0; 5], 1.0), 0.0)
            .with_degradations(Vec::new());
        assert!(ok.valid);
    }

    #[test]
    fn reason_mentions_status_and_weakest() {
        let d = DecisionMatrix::default().decide(&vector([1.0, 0.6, 1.0, 1.0, 1.0], 0.92), 0.0);
        let r = d.reason();
        assert!(r.starts_with("HEALTHY"), "{r}");
        assert!(r.contains("weakest L"));
        assert!(r.contains("outside region: L"));
    }
}
