//! Tooling around the stability engine.
//!
//! This crate provides:
//! - Scenarios: JSON scenario files run deterministically through the engine
//! - Structured logging: canonical JSONL records with schema validation
//! - Trajectory export: per-tick rows plus a SHA-256 artifact index
//! - Replay checks: run twice, compare BLAKE3 trajectory fingerprints

#![forbid(unsafe_code)]

pub mod error;
pub mod scenario;
pub mod structured_log;
pub mod trajectory_export;

pub use error::HarnessError;
pub use scenario::{
    ScenarioFile, ScenarioReport, ScenarioRun, run_scenario, run_scenario_with_artifacts,
};
pub use structured_log::{LogEmitter, LogEntry, LogLevel};
pub use trajectory_export::{ArtifactIndex, TrajectoryRow};
