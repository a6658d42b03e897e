//! Harness error type.

use stabilis_engine::EngineError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("engine: {0}")]
    Engine(#[from] EngineError),
    /// Scenario file is well-formed JSON but semantically unusable.
    #[error("scenario: {0}")]
    Scenario(String),
}

pub type Result<T> = std::result::Result<T, HarnessError>;
