//! SafeOn ML Core - Flow anomaly scoring
//!
//! Turns per-flow traffic summaries into fixed-layout feature vectors and
//! scores them with an isolation forest, an optional gradient-boosted
//! classifier and an optional sequence autoencoder, fused into one hybrid
//! score and compared against a calibrated threshold.

pub mod constants;
pub mod error;
pub mod logic;

// Re-export common types
pub use error::{EngineError, EngineResult};
pub use logic::artifacts::{ArtifactBundle, ArtifactStore, CalibrationMetadata};
pub use logic::config::EngineConfig;
pub use logic::flow::{FlowKey, FlowRecord};
pub use logic::model::{Engine, EngineStatus, ScoreBundle};
pub use logic::sink::{JsonlScoreSink, ScoreSink};
pub use logic::training::{train, TrainingReport};
