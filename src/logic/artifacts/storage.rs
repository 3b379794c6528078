//! Artifact Store - Directory-backed bundle persistence
//!
//! Layout of a bundle directory:
//! - `encoder_<column>.json` per categorical column
//! - `normalizer.json`, `isolation_forest.json`
//! - `classifier.json`, `sequence_autoencoder.json` when trained
//! - `metadata.json` (hand-editable, not checksummed)
//! - `manifest.json`, SHA-256 of every model blob, written last
//!
//! Saving stages a complete bundle in a sibling directory and swaps it in by
//! rename, so a half-written bundle is never the one at `root`.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::constants::{DEFAULT_SEQUENCE_LENGTH, DEFAULT_THRESHOLD};
use crate::error::{EngineError, EngineResult};
use crate::logic::features::layout::CATEGORICAL_COLUMNS;
use crate::logic::features::{CategoricalEncoder, EncoderSet, RangeNormalizer};
use crate::logic::model::autoencoder::SequenceAutoencoder;
use crate::logic::model::classifier::GradientBoostClassifier;
use crate::logic::model::detector::Capability;
use crate::logic::model::isolation::{DecisionSpan, IsolationForest, UnsupervisedDetector};
use super::metadata::CalibrationMetadata;
use super::ArtifactBundle;

pub const MANIFEST_FILE: &str = "manifest.json";
pub const METADATA_FILE: &str = "metadata.json";
pub const NORMALIZER_FILE: &str = "normalizer.json";
pub const ISOLATION_FILE: &str = "isolation_forest.json";
pub const CLASSIFIER_FILE: &str = "classifier.json";
pub const SEQUENCE_FILE: &str = "sequence_autoencoder.json";

/// Current manifest format
pub const MANIFEST_VERSION: u32 = 1;

pub fn encoder_file(column: &str) -> String {
    format!("encoder_{}.json", column)
}

/// Blob checksums for one bundle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub format_version: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub run_id: Option<Uuid>,
    /// File name → hex SHA-256
    pub blobs: BTreeMap<String, String>,
}

/// Outcome of reading `metadata.json`
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataState {
    Valid,
    /// File missing or unusable; bundle carries fallback calibration
    Recovered {
        reason: String,
        salvaged_threshold: Option<f64>,
    },
}

impl MetadataState {
    pub fn is_recovered(&self) -> bool {
        matches!(self, MetadataState::Recovered { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// A complete bundle is present
    pub fn exists(&self) -> bool {
        self.root.join(MANIFEST_FILE).is_file()
    }

    // ========================================================================
    // SAVE
    // ========================================================================

    /// Write the bundle all-or-nothing
    pub fn save(&self, bundle: &ArtifactBundle) -> EngineResult<Manifest> {
        bundle.check_consistency()?;

        let parent = self.root.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;

        let staging = self.sibling("staging");
        fs::create_dir_all(&staging)?;

        let manifest = match write_bundle(&staging, bundle) {
            Ok(manifest) => manifest,
            Err(e) => {
                let _ = fs::remove_dir_all(&staging);
                return Err(e);
            }
        };

        if let Err(e) = self.swap_in(&staging) {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        log::info!(
            "Saved artifact bundle to {:?} ({} blobs)",
            self.root,
            manifest.blobs.len()
        );
        Ok(manifest)
    }

    fn swap_in(&self, staging: &Path) -> EngineResult<()> {
        if !self.root.exists() {
            fs::rename(staging, &self.root)?;
            return Ok(());
        }

        let backup = self.sibling("backup");
        fs::rename(&self.root, &backup)?;
        if let Err(e) = fs::rename(staging, &self.root) {
            // Put the previous bundle back
            let _ = fs::rename(&backup, &self.root);
            return Err(e.into());
        }
        if let Err(e) = fs::remove_dir_all(&backup) {
            log::warn!("Could not remove previous bundle {:?}: {}", backup, e);
        }
        Ok(())
    }

    fn sibling(&self, tag: &str) -> PathBuf {
        let name = self
            .root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "bundle".to_string());
        let parent = self.root.parent().unwrap_or_else(|| Path::new("."));
        parent.join(format!(".{}.{}-{}", name, tag, Uuid::new_v4().simple()))
    }

    // ========================================================================
    // LOAD
    // ========================================================================

    pub fn load_manifest(&self) -> EngineResult<Manifest> {
        let path = self.root.join(MANIFEST_FILE);
        if !path.is_file() {
            return Err(EngineError::artifact(format!("no bundle manifest at {:?}", path)));
        }
        let manifest: Manifest = serde_json::from_slice(&fs::read(&path)?)?;
        if manifest.format_version != MANIFEST_VERSION {
            return Err(EngineError::artifact(format!(
                "unsupported manifest version {}",
                manifest.format_version
            )));
        }
        Ok(manifest)
    }

    /// Load and verify a bundle
    pub fn load(&self) -> EngineResult<(ArtifactBundle, MetadataState)> {
        let manifest = self.load_manifest()?;

        let mut encoders = EncoderSet::default();
        for column in CATEGORICAL_COLUMNS {
            let encoder: CategoricalEncoder = self.read_blob(&manifest, &encoder_file(column))?;
            encoders.insert(*column, encoder);
        }

        let normalizer: RangeNormalizer = self.read_blob(&manifest, NORMALIZER_FILE)?;
        let forest: IsolationForest = self.read_blob(&manifest, ISOLATION_FILE)?;
        let classifier: Capability<GradientBoostClassifier> = self.read_optional(&manifest, CLASSIFIER_FILE)?;
        let sequence: Capability<SequenceAutoencoder> = self.read_optional(&manifest, SEQUENCE_FILE)?;

        let (metadata, state) = self.read_metadata(&sequence)?;

        let bundle = ArtifactBundle {
            encoders,
            normalizer,
            unsupervised: UnsupervisedDetector::new(forest, metadata.span()),
            classifier,
            sequence,
            metadata,
        };
        bundle.check_consistency()?;

        log::info!(
            "Loaded artifact bundle from {:?}: detectors={:?} threshold={:.2}",
            self.root,
            bundle.detectors(),
            bundle.threshold()
        );
        Ok((bundle, state))
    }

    fn read_metadata(
        &self,
        sequence: &Capability<SequenceAutoencoder>,
    ) -> EngineResult<(CalibrationMetadata, MetadataState)> {
        let path = self.root.join(METADATA_FILE);
        let raw = fs::read(&path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| serde_json::from_slice::<serde_json::Value>(&bytes).map_err(|e| e.to_string()));

        let (reason, salvaged_threshold) = match raw {
            Ok(value) => match serde_json::from_value::<CalibrationMetadata>(value.clone()) {
                Ok(meta) => {
                    // Wrong column order is never recoverable
                    meta.check_layout()?;
                    match meta.validate() {
                        Ok(()) => return Ok((meta, MetadataState::Valid)),
                        Err(e) => (e.to_string(), CalibrationMetadata::salvage_threshold(&value)),
                    }
                }
                Err(e) => (e.to_string(), CalibrationMetadata::salvage_threshold(&value)),
            },
            Err(e) => (e, None),
        };

        log::warn!("Calibration metadata at {:?} is unusable: {}", path, reason);

        let sequence_length = sequence
            .present()
            .map(|s| s.sequence_length())
            .unwrap_or(DEFAULT_SEQUENCE_LENGTH);
        let mut fallback = CalibrationMetadata::new(
            salvaged_threshold.unwrap_or(DEFAULT_THRESHOLD),
            DecisionSpan::theoretical(),
            sequence_length,
        );
        fallback.trained_at = None;
        fallback.run_id = None;

        Ok((
            fallback,
            MetadataState::Recovered {
                reason,
                salvaged_threshold,
            },
        ))
    }

    fn read_blob<T: DeserializeOwned>(&self, manifest: &Manifest, name: &str) -> EngineResult<T> {
        let expected = manifest
            .blobs
            .get(name)
            .ok_or_else(|| EngineError::artifact(format!("manifest does not list {}", name)))?;

        let bytes = fs::read(self.root.join(name))?;
        let actual = checksum(&bytes);
        if &actual != expected {
            return Err(EngineError::artifact(format!(
                "checksum mismatch for {}: expected {}, got {}",
                name, expected, actual
            )));
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn read_optional<T: DeserializeOwned>(&self, manifest: &Manifest, name: &str) -> EngineResult<Capability<T>> {
        if !manifest.blobs.contains_key(name) {
            return Ok(Capability::Absent);
        }
        self.read_blob(manifest, name).map(Capability::Present)
    }

    /// Rewrite only the threshold in `metadata.json`
    pub fn update_threshold(&self, threshold: f64) -> EngineResult<()> {
        let path = self.root.join(METADATA_FILE);
        let mut meta: CalibrationMetadata = serde_json::from_slice(&fs::read(&path)?)?;
        meta.threshold = threshold;
        meta.validate()?;
        write_json(&path, &meta)?;
        log::info!("Threshold in {:?} set to {:.2}", path, threshold);
        Ok(())
    }
}

fn write_bundle(dir: &Path, bundle: &ArtifactBundle) -> EngineResult<Manifest> {
    let mut blobs = BTreeMap::new();

    for (column, encoder) in bundle.encoders.iter() {
        let name = encoder_file(column);
        blobs.insert(name.clone(), write_blob(dir, &name, encoder)?);
    }
    blobs.insert(NORMALIZER_FILE.to_string(), write_blob(dir, NORMALIZER_FILE, &bundle.normalizer)?);
    blobs.insert(ISOLATION_FILE.to_string(), write_blob(dir, ISOLATION_FILE, &bundle.unsupervised.forest)?);
    if let Some(classifier) = bundle.classifier.present() {
        blobs.insert(CLASSIFIER_FILE.to_string(), write_blob(dir, CLASSIFIER_FILE, classifier)?);
    }
    if let Some(sequence) = bundle.sequence.present() {
        blobs.insert(SEQUENCE_FILE.to_string(), write_blob(dir, SEQUENCE_FILE, sequence)?);
    }

    // Span lives with the detector in memory; persist whatever it holds
    let mut metadata = bundle.metadata.clone();
    metadata.set_span(bundle.unsupervised.span);
    write_json(&dir.join(METADATA_FILE), &metadata)?;

    let manifest = Manifest {
        format_version: MANIFEST_VERSION,
        created_at: Utc::now(),
        run_id: metadata.run_id,
        blobs,
    };
    write_json(&dir.join(MANIFEST_FILE), &manifest)?;
    Ok(manifest)
}

/// Write a compact blob; returns its checksum
fn write_blob<T: Serialize>(dir: &Path, name: &str, value: &T) -> EngineResult<String> {
    let bytes = serde_json::to_vec(value)?;
    fs::write(dir.join(name), &bytes)?;
    Ok(checksum(&bytes))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> EngineResult<()> {
    fs::write(path, serde_json::to_vec_pretty(value)?)?;
    Ok(())
}

pub fn checksum(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
