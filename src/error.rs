//! Error handling

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Missing required column, bad field value or empty feature set
    #[error("schema error: {0}")]
    Schema(String),

    /// No bundle loaded and dummy mode is disabled
    #[error("model not loaded and dummy mode is disabled")]
    ModelNotLoaded,

    /// Bundle was trained against a different feature column order
    #[error("feature layout mismatch: expected {expected:08x}, got {actual:08x}")]
    LayoutMismatch { expected: u32, actual: u32 },

    #[error("artifact error: {0}")]
    Artifact(String),

    #[error("training error: {0}")]
    Training(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}

impl EngineError {
    pub fn schema(msg: impl Into<String>) -> Self {
        EngineError::Schema(msg.into())
    }

    pub fn artifact(msg: impl Into<String>) -> Self {
        EngineError::Artifact(msg.into())
    }

    /// Whether the caller should treat this as a rejected request
    pub fn is_rejection(&self) -> bool {
        matches!(self, EngineError::Schema(_))
    }
}
