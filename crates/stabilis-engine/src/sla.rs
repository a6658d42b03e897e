//! SLA compliance on blocking probability and loss fraction.

use crate::config::QueueingConfig;
use crate::error::{EngineError, Result};
use crate::queueing::QueueingSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlaMetric {
    BlockingProbability,
    LossFraction,
}

impl SlaMetric {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BlockingProbability => "p_block",
            Self::LossFraction => "d_loss",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlaStatus {
    Compliant,
    Violation,
}

/// Outcome of one metric against its bound.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlaCheck {
    pub metric: SlaMetric,
    pub actual: f64,
    pub threshold: f64,
    pub status: SlaStatus,
    /// `(actual - threshold) / threshold · 100`, only for violations.
    pub severity_percent: Option<f64>,
}

impl SlaCheck {
    #[must_use]
    pub fn is_compliant(&self) -> bool {
        self.status == SlaStatus::Compliant
    }

    /// Remediation hint for a violation.
    #[must_use]
    pub fn recommendation(&self) -> Option<String> {
        let severity = self.severity_percent?;
        Some(match self.metric {
            SlaMetric::BlockingProbability => format!(
                "p_block violation ({severity:.1}%): increase server count or service rate"
            ),
            SlaMetric::LossFraction => format!(
                "d_loss violation ({severity:.1}%): increase queue capacity or reduce load"
            ),
        })
    }
}

/// Both SLA checks for one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlaReport {
    pub blocking: SlaCheck,
    pub loss: SlaCheck,
}

impl SlaReport {
    #[must_use]
    pub fn is_compliant(&self) -> bool {
        self.blocking.is_compliant() && self.loss.is_compliant()
    }

    #[must_use]
    pub fn recommendations(&self) -> Vec<String> {
        [self.blocking, self.loss]
            .iter()
            .filter_map(SlaCheck::recommendation)
            .collect()
    }
}

/// Severity of `actual` past `threshold`, in percent.
#[must_use]
pub fn violation_severity(actual: f64, threshold: f64) -> f64 {
    if threshold == 0.0 {
        if actual > 0.0 { 100.0 } else { 0.0 }
    } else {
        (actual - threshold) / threshold * 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SlaValidator {
    epsilon: f64,
    delta: f64,
}

impl SlaValidator {
    pub fn new(epsilon: f64, delta: f64) -> Result<Self> {
        for (field, v) in [("sla_epsilon", epsilon), ("sla_delta", delta)] {
            if !(v.is_finite() && (0.0..=1.0).contains(&v)) {
                return Err(EngineError::config(field, "must lie in [0, 1]"));
            }
        }
        Ok(Self { epsilon, delta })
    }

    pub fn from_config(config: &QueueingConfig) -> Result<Self> {
        Self::new(config.sla_epsilon, config.sla_delta)
    }

    #[must_use]
    pub fn check(&self, metric: SlaMetric, actual: f64) -> SlaCheck {
        let threshold = match metric {
            SlaMetric::BlockingProbability => self.epsilon,
            SlaMetric::LossFraction => self.delta,
        };
        let compliant = actual <= threshold;
        SlaCheck {
            metric,
            actual,
            threshold,
            status: if compliant {
                SlaStatus::Compliant
            } else {
                SlaStatus::Violation
            },
            severity_percent: (!compliant).then(|| violation_severity(actual, threshold)),
        }
    }

    #[must_use]
    pub fn validate(&self, snapshot: &QueueingSnapshot) -> SlaReport {
        SlaReport {
            blocking: self.check(SlaMetric::BlockingProbability, snapshot.blocking_probability),
            loss: self.check(SlaMetric::LossFraction, snapshot.loss_fraction),
        }
    }
}
