//! Model Module - Detectors, fusion and the inference engine
//!
//! Each detector sits behind the `AnomalyDetector` seam and emits a score in
//! [0, 1]. Optional detectors are `Capability` values, so the engine's
//! variants (forest only, forest + classifier, ...) are just configurations.

pub mod autoencoder;
pub mod buffer;
pub mod classifier;
pub mod detector;
pub mod fusion;
pub mod inference;
pub mod isolation;
pub mod threshold;


// Re-export common types
pub use autoencoder::{AutoencoderConfig, SequenceAutoencoder};
pub use buffer::{BufferStatus, SequenceBuffer};
pub use classifier::{BoostConfig, GradientBoostClassifier};
pub use detector::{AnomalyDetector, Capability, DetectorError, DetectorOutput};
pub use fusion::{fuse, FUSION_ARITY};
pub use inference::{Engine, EngineStatus, ScoreBundle};
pub use isolation::{DecisionSpan, ForestConfig, IsolationForest, UnsupervisedDetector};
pub use threshold::{evaluate, CalibrationOutcome, CalibrationPolicy, Evaluation, ThresholdConfig};
