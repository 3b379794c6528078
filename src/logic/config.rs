//! Configuration module

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants::{self, *};
use crate::logic::model::threshold::{CalibrationPolicy, ThresholdConfig};

/// Engine configuration (inference + training)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Artifact bundle directory
    pub model_dir: PathBuf,

    /// Labeled training table (CSV)
    pub dataset_path: Option<PathBuf>,

    /// Attacker-only table, every row forced to label 1
    pub attacker_dataset_path: Option<PathBuf>,

    /// Return neutral placeholder results when no bundle is loaded
    pub allow_dummy: bool,

    /// Replaces the calibrated threshold at load time; ignored unless in [0, 1]
    pub threshold_override: Option<f64>,

    /// Sliding window length for the reconstruction detector
    pub sequence_length: usize,

    /// Reconstruction network epochs
    pub epochs: usize,

    /// Reconstruction network mini-batch size
    pub batch_size: usize,

    /// Train the supervised classifier when both classes exist
    pub enable_classifier: bool,

    /// Train the sequence reconstruction detector
    pub enable_sequence: bool,

    /// Threshold search settings
    pub threshold: ThresholdConfig,

    /// Expected number of tracked flow keys. Eviction is per LRU shard and
    /// each shard holds twice its share, so this is approximate in both
    /// directions.
    pub rate_cache_capacity: usize,

    pub iso_trees: usize,
    pub iso_sample_size: usize,
    pub seed: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_dir: constants::default_model_dir(),
            dataset_path: None,
            attacker_dataset_path: None,
            allow_dummy: true,
            threshold_override: None,
            sequence_length: DEFAULT_SEQUENCE_LENGTH,
            epochs: DEFAULT_EPOCHS,
            batch_size: DEFAULT_BATCH_SIZE,
            enable_classifier: true,
            enable_sequence: true,
            threshold: ThresholdConfig::default(),
            rate_cache_capacity: DEFAULT_RATE_CACHE_CAPACITY,
            iso_trees: DEFAULT_ISO_TREES,
            iso_sample_size: DEFAULT_ISO_SAMPLE_SIZE,
            seed: DEFAULT_SEED,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables (and `.env` if present)
    pub fn from_env() -> Self {
        if let Ok(path) = dotenvy::dotenv() {
            log::debug!("Loaded environment overrides from {}", path.display());
        }

        let policy = std::env::var("CALIBRATION_POLICY")
            .ok()
            .and_then(|s| match s.parse::<CalibrationPolicy>() {
                Ok(p) => Some(p),
                Err(e) => {
                    log::warn!("{}; using default policy", e);
                    None
                }
            })
            .unwrap_or_default();

        Self {
            model_dir: constants::get_model_dir(),
            dataset_path: constants::get_optional_path("DATASET_PATH"),
            attacker_dataset_path: constants::get_optional_path("ATTACKER_DATASET_PATH"),
            allow_dummy: constants::get_flag("ALLOW_DUMMY", true),
            threshold_override: constants::get_optional("THRESHOLD_OVERRIDE"),
            sequence_length: constants::get_parsed("SEQUENCE_LENGTH", DEFAULT_SEQUENCE_LENGTH),
            epochs: constants::get_parsed("AE_EPOCHS", DEFAULT_EPOCHS),
            batch_size: constants::get_parsed("AE_BATCH_SIZE", DEFAULT_BATCH_SIZE),
            enable_classifier: constants::get_flag("ENABLE_CLASSIFIER", true),
            enable_sequence: constants::get_flag("ENABLE_SEQUENCE", true),
            threshold: ThresholdConfig {
                default_threshold: constants::get_parsed("DEFAULT_THRESHOLD", DEFAULT_THRESHOLD),
                policy,
                ..ThresholdConfig::default()
            },
            rate_cache_capacity: constants::get_parsed("RATE_CACHE_CAPACITY", DEFAULT_RATE_CACHE_CAPACITY),
            iso_trees: constants::get_parsed("ISO_TREES", DEFAULT_ISO_TREES),
            iso_sample_size: constants::get_parsed("ISO_SAMPLE_SIZE", DEFAULT_ISO_SAMPLE_SIZE),
            seed: constants::get_parsed("TRAIN_SEED", DEFAULT_SEED),
        }
    }

    pub fn with_model_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.model_dir = dir.into();
        self
    }

    pub fn with_dataset(mut self, path: impl Into<PathBuf>) -> Self {
        self.dataset_path = Some(path.into());
        self
    }

    /// Threshold used when no calibrated value is available
    pub fn fallback_threshold(&self) -> f64 {
        self.threshold_override.unwrap_or(self.threshold.default_threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.allow_dummy);
        assert_eq!(config.sequence_length, DEFAULT_SEQUENCE_LENGTH);
        assert_eq!(config.threshold.policy, CalibrationPolicy::GridF1);
        assert_eq!(config.fallback_threshold(), DEFAULT_THRESHOLD);
    }

    #[test]
    fn test_override_wins_over_default() {
        let config = EngineConfig {
            threshold_override: Some(0.42),
            ..Default::default()
        };
        assert_eq!(config.fallback_threshold(), 0.42);
    }
}
