//! Stability analytics engine.
//!
//! Turns streams of arrival, service-time, latency and resource samples into
//! a per-tick stability assessment and a graded response mode.
//!
//! # Architecture
//!
//! - **Samples** (`samples`): observation types and the windowed sample buffer
//! - **Traffic flow** (`traffic_flow`): background plus anomalous arrival curves
//! - **Queueing** (`queueing`): G/G/c/K snapshot (Erlang B/C, P-K wait, loss)
//! - **SLA** (`sla`): blocking and loss compliance checks
//! - **Markov** (`markov`): 4-state transition tracking, stationary law, MTTA
//! - **Anomaly** (`anomaly`): IQR / Z-score / MAD detection over a rolling baseline
//! - **Inference** (`inference`): rate intervals and the baseline-vs-window test
//! - **VRPS** (`vrps`): five-component stability vector and the `Sust` index
//! - **Decision** (`decision`): nine-mode response matrix
//! - **Forecast** (`forecast`): Kalman one-step prediction of the vector
//! - **Monitor** (`monitor`): atomic per-session tick orchestration
//! - **Sessions** (`session`): thread-safe registry of monitors
//! - **Metrics** (`metrics`): atomic counters for observability
//! - **Fingerprint** (`fingerprint`): BLAKE3 digests for reproducibility checks

#![deny(unsafe_code)]

pub mod anomaly;
pub mod config;
pub mod decision;
pub mod error;
pub mod fingerprint;
pub mod forecast;
pub mod inference;
pub mod markov;
pub mod metrics;
pub mod monitor;
pub mod queueing;
pub mod samples;
pub mod session;
pub mod sla;
pub mod traffic_flow;
pub mod vrps;

pub use anomaly::{AnomalyDetector, Detection};
pub use config::{AnomalyQuorum, MonitorConfig, QueueingConfig, VrpsConfig};
pub use decision::{DecisionMatrix, ModeDecision, ResponseMode};
pub use error::{Degradation, EngineError, Result};
pub use forecast::{SimilarityLevel, StabilityForecaster};
pub use inference::{RateEstimate, StatisticalInference, TwoSampleTest};
pub use markov::{MarkovState, MarkovStateTracker};
pub use metrics::EngineMetrics;
pub use monitor::{StabilityMonitor, TickRecord};
pub use queueing::{QueueingModel, QueueingSnapshot};
pub use samples::{ArrivalSample, LatencySample, Observation, ResourceSample, ServiceTimeSample};
pub use session::{SessionId, SessionRegistry};
pub use traffic_flow::TrafficFlowModel;
pub use vrps::{Component, StabilityVector, StabilityVectorCalculator, SystemStatus};
