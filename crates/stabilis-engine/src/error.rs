//! Error taxonomy for the stability engine.
//!
//! Only construction-time problems and caller contract violations are
//! errors. Numeric trouble inside a tick degrades to sentinel values and is
//! reported through [`Degradation`] on the resulting decision, so one bad
//! tick never halts a monitor.

use thiserror::Error;

use crate::session::SessionId;

/// Errors surfaced by engine operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Invalid configuration, rejected at construction.
    #[error("invalid configuration: {field}: {reason}")]
    Configuration { field: &'static str, reason: String },
    /// Not enough data to compute the requested quantity.
    #[error("insufficient data: need at least {needed}, have {have}")]
    InsufficientData { needed: usize, have: usize },
    /// A numeric computation had no meaningful answer.
    #[error("numeric degeneracy: {what}")]
    NumericDegeneracy { what: &'static str },
    /// A sample fell behind the retained window.
    #[error("stale input at t={timestamp}: retention horizon is t={horizon}")]
    StaleInput { timestamp: f64, horizon: f64 },
    /// Tick time moved backwards.
    #[error("tick at t={requested} precedes previous tick at t={previous}")]
    NonMonotonicTick { previous: f64, requested: f64 },
    #[error("unknown session: {0}")]
    UnknownSession(SessionId),
}

impl EngineError {
    pub(crate) fn config(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Configuration {
            field,
            reason: reason.into(),
        }
    }

    /// Construction-time errors are fatal; the rest are recoverable.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Per-tick degradation. A tick that carries any of these is still recorded,
/// but its decision is flagged as not fully computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Degradation {
    /// Anomaly baseline has fewer than two points.
    InsufficientBaseline,
    /// Utilization is at or above 1; wait time is unbounded.
    Saturated,
    /// `(I - Q)` was singular or ill-conditioned.
    MttaUndefined,
    /// Power iteration hit its cap before converging.
    StationaryNotConverged,
    /// A non-finite or negative input was clamped to zero.
    NonFiniteInput,
    /// No arrival samples fell inside the evaluation window.
    EmptyArrivalWindow,
}

impl Degradation {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InsufficientBaseline => "insufficient_baseline",
            Self::Saturated => "saturated",
            Self::MttaUndefined => "mtta_undefined",
            Self::StationaryNotConverged => "stationary_not_converged",
            Self::NonFiniteInput => "non_finite_input",
            Self::EmptyArrivalWindow => "empty_arrival_window",
        }
    }
}

/// Clamp a transient measurement: NaN, infinities and negatives become 0.
///
/// Returns the clamped value and whether clamping happened.
#[must_use]
pub(crate) fn sanitize_non_negative(x: f64) -> (f64, bool) {
    if x.is_finite() && x >= 0.0 {
        (x, false)
    } else {
        (0.0, true)
    }
}
