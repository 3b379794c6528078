//! Artifact store tests

use std::fs;

use tempfile::tempdir;

use super::storage::{self, CLASSIFIER_FILE, ISOLATION_FILE, MANIFEST_FILE, METADATA_FILE, SEQUENCE_FILE};
use super::{ArtifactBundle, ArtifactStore};
use crate::error::EngineError;
use crate::logic::config::EngineConfig;
use crate::logic::training::fit_bundle;
use crate::logic::training::tests::{small_config, synthetic_set};

fn fitted(config: &EngineConfig) -> ArtifactBundle {
    fit_bundle(&synthetic_set(), config).unwrap().0
}

#[test]
fn test_save_then_load_roundtrip() {
    let dir = tempdir().unwrap();
    let store = ArtifactStore::new(dir.path().join("bundle"));
    let bundle = fitted(&small_config());

    let manifest = store.save(&bundle).unwrap();
    assert!(store.exists());
    assert!(manifest.blobs.contains_key(CLASSIFIER_FILE));
    assert!(manifest.blobs.contains_key(SEQUENCE_FILE));
    assert!(!manifest.blobs.contains_key(METADATA_FILE));

    let (loaded, state) = store.load().unwrap();
    assert!(!state.is_recovered());
    assert_eq!(loaded, bundle);
}

#[test]
fn test_absent_detectors_not_written() {
    let dir = tempdir().unwrap();
    let store = ArtifactStore::new(dir.path().join("bundle"));
    let config = EngineConfig {
        enable_classifier: false,
        enable_sequence: false,
        ..small_config()
    };

    let manifest = store.save(&fitted(&config)).unwrap();
    assert!(!manifest.blobs.contains_key(CLASSIFIER_FILE));
    assert!(!store.root().join(SEQUENCE_FILE).exists());

    let (loaded, _) = store.load().unwrap();
    assert_eq!(loaded.detectors(), vec!["isolation_forest"]);
}

#[test]
fn test_missing_manifest_is_not_a_bundle() {
    let dir = tempdir().unwrap();
    let store = ArtifactStore::new(dir.path().join("bundle"));
    store.save(&fitted(&small_config())).unwrap();
    fs::remove_file(store.root().join(MANIFEST_FILE)).unwrap();

    assert!(!store.exists());
    assert!(matches!(store.load(), Err(EngineError::Artifact(_))));
}

#[test]
fn test_checksum_mismatch_rejected() {
    let dir = tempdir().unwrap();
    let store = ArtifactStore::new(dir.path().join("bundle"));
    store.save(&fitted(&small_config())).unwrap();

    let path = store.root().join(ISOLATION_FILE);
    let mut bytes = fs::read(&path).unwrap();
    bytes.push(b' ');
    fs::write(&path, bytes).unwrap();

    let err = store.load().unwrap_err();
    assert!(err.to_string().contains("checksum mismatch"));
}

#[test]
fn test_save_replaces_previous_bundle() {
    let dir = tempdir().unwrap();
    let store = ArtifactStore::new(dir.path().join("bundle"));

    store.save(&fitted(&small_config())).unwrap();
    let config = EngineConfig {
        enable_classifier: false,
        ..small_config()
    };
    let second = fitted(&config);
    store.save(&second).unwrap();

    let (loaded, _) = store.load().unwrap();
    assert_eq!(loaded, second);
    assert!(!store.root().join(CLASSIFIER_FILE).exists());

    // Only the bundle itself is left next to it; staging and backup dirs are gone
    let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(entries.len(), 1);
}

#[test]
fn test_update_threshold_rewrites_metadata_only() {
    let dir = tempdir().unwrap();
    let store = ArtifactStore::new(dir.path().join("bundle"));
    let bundle = fitted(&small_config());
    store.save(&bundle).unwrap();

    store.update_threshold(0.77).unwrap();
    let (loaded, state) = store.load().unwrap();
    assert!(!state.is_recovered());
    assert_eq!(loaded.threshold(), 0.77);
    assert_eq!(loaded.unsupervised, bundle.unsupervised);

    assert!(store.update_threshold(1.5).is_err());
}

#[test]
fn test_garbage_metadata_recovered_with_theoretical_span() {
    let dir = tempdir().unwrap();
    let store = ArtifactStore::new(dir.path().join("bundle"));
    store.save(&fitted(&small_config())).unwrap();
    fs::write(store.root().join(METADATA_FILE), b"not json").unwrap();

    let (loaded, state) = store.load().unwrap();
    assert!(state.is_recovered());
    assert_eq!(loaded.unsupervised.span, crate::logic::model::DecisionSpan::theoretical());
    assert_eq!(loaded.metadata.sequence_length, 3);
    assert!(loaded.metadata.run_id.is_none());
}

#[test]
fn test_checksum_is_hex_sha256() {
    let sum = storage::checksum(b"abc");
    assert_eq!(sum, "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
}
