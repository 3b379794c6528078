//! Artifacts Module - Trained bundle and its on-disk store
//!
//! A bundle is written once per training run and is read-only after load.
//! The engine swaps whole bundles, never individual parts.

pub mod metadata;
pub mod storage;

#[cfg(test)]
mod tests;

pub use metadata::CalibrationMetadata;
pub use storage::{ArtifactStore, Manifest, MetadataState};

use crate::error::{EngineError, EngineResult};
use crate::logic::features::{EncoderSet, FeaturePipeline, RangeNormalizer, FEATURE_COUNT};
use crate::logic::model::autoencoder::SequenceAutoencoder;
use crate::logic::model::classifier::GradientBoostClassifier;
use crate::logic::model::detector::{AnomalyDetector, Capability};
use crate::logic::model::isolation::UnsupervisedDetector;

/// Everything needed to score a flow
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactBundle {
    pub encoders: EncoderSet,
    pub normalizer: RangeNormalizer,
    pub unsupervised: UnsupervisedDetector,
    pub classifier: Capability<GradientBoostClassifier>,
    pub sequence: Capability<SequenceAutoencoder>,
    pub metadata: CalibrationMetadata,
}

impl ArtifactBundle {
    pub fn threshold(&self) -> f64 {
        self.metadata.threshold
    }

    /// Window length the sequence detector was trained with
    pub fn sequence_length(&self) -> usize {
        self.sequence
            .present()
            .map(|s| s.sequence_length())
            .unwrap_or(self.metadata.sequence_length)
    }

    pub fn pipeline(&self) -> FeaturePipeline<'_> {
        FeaturePipeline::new(&self.encoders, &self.normalizer)
    }

    /// Names of the detectors this bundle carries
    pub fn detectors(&self) -> Vec<&'static str> {
        let mut names = vec![self.unsupervised.name()];
        if let Some(c) = self.classifier.present() {
            names.push(c.name());
        }
        if let Some(s) = self.sequence.present() {
            names.push(s.name());
        }
        names
    }

    /// Parts agree with each other and with the compiled-in layout
    pub fn check_consistency(&self) -> EngineResult<()> {
        let missing = self.encoders.missing_columns();
        if !missing.is_empty() {
            return Err(EngineError::artifact(format!("missing encoders: {}", missing.join(", "))));
        }
        if self.normalizer.dim() != FEATURE_COUNT || !self.normalizer.is_valid() {
            return Err(EngineError::artifact(format!(
                "normalizer has {} columns, expected {}",
                self.normalizer.dim(),
                FEATURE_COUNT
            )));
        }
        if self.unsupervised.forest.n_features() != FEATURE_COUNT {
            return Err(EngineError::artifact("isolation forest width does not match layout"));
        }
        if let Some(c) = self.classifier.present() {
            if c.n_features() != FEATURE_COUNT {
                return Err(EngineError::artifact("classifier width does not match layout"));
            }
        }
        if let Some(s) = self.sequence.present() {
            if s.input_dim() != s.sequence_length() * FEATURE_COUNT {
                return Err(EngineError::artifact("sequence detector width does not match layout"));
            }
        }
        Ok(())
    }
}
