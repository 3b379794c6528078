//! Features Module - Flow Feature Encoding
//!
//! Raw flow record → categorical codes + rate deltas → range-normalized
//! vector. Column order is owned by `layout.rs`.

pub mod encoder;
pub mod layout;
pub mod normalizer;
pub mod rate;
pub mod vector;

#[cfg(test)]
mod tests;

// Re-export common types
pub use encoder::{CategoricalEncoder, EncoderSet};
pub use layout::{FEATURE_COUNT, FEATURE_LAYOUT};
pub use normalizer::RangeNormalizer;
pub use rate::{RateDeltaTracker, RateDeltas, RateLedger, RateOverrides, RateState};
pub use vector::{FeatureExtractor, FeaturePipeline, FeatureVector};
