//! One-step-ahead forecast of the stability vector.
//!
//! Each component runs an independent scalar Kalman filter with identity
//! transition and observation. Before a new vector is folded in, the current
//! prediction is compared to it by cosine similarity; the trailing average of
//! that similarity tracks how well recent behavior matches the model.
//!
//! Each similarity is graded into a [`SimilarityLevel`]. A low single value
//! raises an alert; a trailing average that stays low for
//! `retrain_after` consecutive observations requests retraining.

use std::collections::VecDeque;

use crate::config::ForecastConfig;
use crate::error::Result;
use crate::vrps::{COMPONENT_COUNT, Component, OperatingRegion};

/// Norms below this make cosine similarity 0.
const NORM_EPSILON: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq)]
struct ScalarKalman {
    estimate: f64,
    covariance: f64,
}

impl ScalarKalman {
    fn update(&mut self, z: f64, q: f64, r: f64) {
        let p_pred = self.covariance + q;
        let gain = p_pred / (p_pred + r);
        self.estimate += gain * (z - self.estimate);
        self.covariance = (1.0 - gain) * p_pred;
    }
}

/// Cosine similarity clipped to `[-1, 1]`.
#[must_use]
pub fn cosine_similarity(a: &[f64; COMPONENT_COUNT], b: &[f64; COMPONENT_COUNT]) -> f64 {
    let na = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if na < NORM_EPSILON || nb < NORM_EPSILON {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    (dot / (na * nb)).clamp(-1.0, 1.0)
}

/// Grade of one prediction/observation similarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimilarityLevel {
    High,
    Medium,
    Low,
}

impl SimilarityLevel {
    #[must_use]
    pub fn classify(similarity: f64, config: &ForecastConfig) -> Self {
        if similarity > config.similarity_high {
            Self::High
        } else if similarity >= config.similarity_medium {
            Self::Medium
        } else {
            Self::Low
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastOutcome {
    /// Prediction made before this observation.
    pub predicted: [f64; COMPONENT_COUNT],
    pub similarity: f64,
    pub level: SimilarityLevel,
    pub moving_average: f64,
    /// Similarity fell below `similarity_alert`.
    pub alert: bool,
    /// The moving average has stayed below `retrain_threshold` for longer
    /// than `retrain_after` observations.
    pub needs_retraining: bool,
}

/// One step of a multi-step forecast.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastStep {
    /// Steps ahead of the latest observation, starting at 1.
    pub horizon: usize,
    /// Predicted components, clamped to `[0, 1]`.
    pub predicted: [f64; COMPONENT_COUNT],
    /// Per-component prediction variance.
    pub variance: [f64; COMPONENT_COUNT],
}

/// First forecast step that leaves the operating region.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionExit {
    pub horizon: usize,
    pub violated: Vec<Component>,
}

#[derive(Debug, Clone)]
pub struct StabilityForecaster {
    config: ForecastConfig,
    filters: [ScalarKalman; COMPONENT_COUNT],
    similarities: VecDeque<f64>,
    /// Consecutive observations with the moving average below
    /// `retrain_threshold`.
    low_streak: usize,
}

impl StabilityForecaster {
    pub fn new(config: ForecastConfig) -> Result<Self> {
        config.validate()?;
        let filter = ScalarKalman {
            estimate: config.initial_estimate,
            covariance: config.initial_covariance,
        };
        Ok(Self {
            filters: [filter; COMPONENT_COUNT],
            similarities: VecDeque::with_capacity(config.similarity_window),
            low_streak: 0,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    /// Current one-step-ahead prediction.
    #[must_use]
    pub fn predict(&self) -> [f64; COMPONENT_COUNT] {
        self.filters.map(|f| f.estimate)
    }

    /// Trailing similarity average; 1 before any observation.
    #[must_use]
    pub fn moving_average(&self) -> f64 {
        if self.similarities.is_empty() {
            1.0
        } else {
            self.similarities.iter().sum::<f64>() / self.similarities.len() as f64
        }
    }

    /// Predictions for the next `steps` observations.
    ///
    /// Transitions are identity, so the mean stays put while the variance
    /// grows by `process_noise` per step.
    #[must_use]
    pub fn predict_multi_step(&self, steps: usize) -> Vec<ForecastStep> {
        let q = self.config.process_noise;
        (1..=steps)
            .map(|horizon| ForecastStep {
                horizon,
                predicted: self.filters.map(|f| f.estimate.clamp(0.0, 1.0)),
                variance: self.filters.map(|f| f.covariance + q * horizon as f64),
            })
            .collect()
    }

    /// Components the one-step prediction places below `region`'s
    /// thresholds; empty while the prediction stays inside.
    #[must_use]
    pub fn will_exit_osr(&self, region: &OperatingRegion) -> Vec<Component> {
        region.violations_of(&self.predict())
    }

    /// First step within `steps` whose prediction leaves `region`.
    #[must_use]
    pub fn first_region_exit(&self, region: &OperatingRegion, steps: usize) -> Option<RegionExit> {
        self.predict_multi_step(steps).into_iter().find_map(|step| {
            let violated = region.violations_of(&step.predicted);
            (!violated.is_empty()).then_some(RegionExit {
                horizon: step.horizon,
                violated,
            })
        })
    }

    /// Score the standing prediction against `observed`, then fold it in.
    pub fn observe(&mut self, observed: &[f64; COMPONENT_COUNT]) -> ForecastOutcome {
        let predicted = self.predict();
        let similarity = cosine_similarity(&predicted, observed);
        if self.similarities.len() == self.config.similarity_window {
            self.similarities.pop_front();
        }
        self.similarities.push_back(similarity);
        for (f, z) in self.filters.iter_mut().zip(observed) {
            if z.is_finite() {
                f.update(*z, self.config.process_noise, self.config.measurement_noise);
            }
        }
        let moving_average = self.moving_average();
        if moving_average < self.config.retrain_threshold {
            self.low_streak += 1;
        } else {
            self.low_streak = 0;
        }
        ForecastOutcome {
            predicted,
            similarity,
            level: SimilarityLevel::classify(similarity, &self.config),
            moving_average,
            alert: similarity < self.config.similarity_alert,
            needs_retraining: self.low_streak > self.config.retrain_after,
        }
    }
}
