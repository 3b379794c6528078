//! Training Pipeline
//!
//! labeled table → encoders → rate deltas → normalizer (normal rows) →
//! detectors → calibration → atomic bundle write.
//!
//! Only one training run may hold the artifact lock at a time, and engines
//! take the same lock while reloading a bundle.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::NEUTRAL_SCORE;
use crate::error::{EngineError, EngineResult};
use crate::logic::artifacts::{ArtifactBundle, ArtifactStore, CalibrationMetadata};
use crate::logic::config::EngineConfig;
use crate::logic::dataset::{self, LabeledFlow, TrainingSet};
use crate::logic::features::layout::log_scaled_indices;
use crate::logic::features::{EncoderSet, FeatureVector, RangeNormalizer, RateLedger};
use crate::logic::model::autoencoder::{AutoencoderConfig, SequenceAutoencoder};
use crate::logic::model::classifier::{BoostConfig, GradientBoostClassifier};
use crate::logic::model::detector::{run_detector, Capability, DetectorOutput};
use crate::logic::model::fusion::fuse;
use crate::logic::model::isolation::{DecisionSpan, ForestConfig, IsolationForest, UnsupervisedDetector};
use crate::logic::model::threshold::{self, CalibrationOutcome, Evaluation};

/// Held by training for its whole run and by engines during reload
pub(crate) static ARTIFACT_LOCK: Mutex<()> = Mutex::new(());

/// How long a run waits for a reload or another run to finish
const LOCK_WAIT: Duration = Duration::from_secs(30);

/// Summary of one training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub run_id: Option<Uuid>,
    pub rows: usize,
    pub normal_rows: usize,
    pub attack_rows: usize,
    pub dropped_rows: usize,
    pub detectors: Vec<String>,
    pub sequence_windows: usize,
    pub decision_score_min: f64,
    pub decision_score_max: f64,
    pub threshold: f64,
    pub calibrated: bool,
    pub evaluation: Evaluation,
    pub elapsed_ms: u64,
}

/// Load the configured dataset, fit, and write the bundle to `model_dir`
pub fn train(config: &EngineConfig) -> EngineResult<TrainingReport> {
    let _guard = ARTIFACT_LOCK
        .try_lock_for(LOCK_WAIT)
        .ok_or_else(|| EngineError::Training("another training run or reload is in progress".into()))?;

    let started = Instant::now();
    let set = dataset::load_training_set(config)?;
    let (bundle, outcome, windows) = fit_bundle(&set, config)?;

    ArtifactStore::new(&config.model_dir).save(&bundle)?;

    let report = TrainingReport {
        run_id: bundle.metadata.run_id,
        rows: set.len(),
        normal_rows: set.normal_count(),
        attack_rows: set.attack_count(),
        dropped_rows: set.dropped,
        detectors: bundle.detectors().into_iter().map(String::from).collect(),
        sequence_windows: windows,
        decision_score_min: bundle.unsupervised.span.min,
        decision_score_max: bundle.unsupervised.span.max,
        threshold: outcome.threshold,
        calibrated: outcome.calibrated,
        evaluation: outcome.evaluation,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };

    log::info!(
        "Training finished in {} ms: threshold={:.2} precision={:.3} recall={:.3} f1={:.3}",
        report.elapsed_ms,
        report.threshold,
        report.evaluation.precision,
        report.evaluation.recall,
        report.evaluation.f1
    );
    Ok(report)
}

/// Fit every component from an in-memory training set; writes nothing
pub fn fit_bundle(
    set: &TrainingSet,
    config: &EngineConfig,
) -> EngineResult<(ArtifactBundle, CalibrationOutcome, usize)> {
    if set.is_empty() {
        return Err(EngineError::schema("training set has no usable rows"));
    }
    let labels = set.labels();

    // 1. Encoders over the whole table
    let encoders = EncoderSet::fit(&set.rows, column_value);

    // 2. Deltas in time order, per flow key
    let encoded = encode_rows(&set.rows, &encoders);

    // 3. Normalizer on normal rows only
    let normal: Vec<&FeatureVector> = encoded
        .iter()
        .zip(&labels)
        .filter(|(_, y)| **y == dataset::LABEL_NORMAL)
        .map(|(v, _)| v)
        .collect();
    if normal.is_empty() {
        return Err(EngineError::schema("training set has no normal-labeled rows"));
    }
    let normalizer = RangeNormalizer::fit(&normal, &log_scaled_indices())?;
    log::info!("Normalizer fitted on {} normal rows", normal.len());

    let scaled = encoded
        .iter()
        .map(|v| normalizer.transform(v.as_slice()))
        .collect::<EngineResult<Vec<_>>>()?;

    // 4. Isolation forest on normal rows, span over all rows
    let normal_scaled: Vec<&Vec<f64>> = scaled
        .iter()
        .zip(&labels)
        .filter(|(_, y)| **y == dataset::LABEL_NORMAL)
        .map(|(v, _)| v)
        .collect();
    let forest_config = ForestConfig {
        num_trees: config.iso_trees,
        sample_size: config.iso_sample_size,
        seed: config.seed,
    };
    let forest = IsolationForest::fit(&normal_scaled, &forest_config)?;
    let raw: Vec<f64> = scaled.iter().map(|v| forest.decision_function(v)).collect();
    let span = DecisionSpan::from_scores(&raw).unwrap_or_else(DecisionSpan::theoretical);
    let unsupervised = UnsupervisedDetector::new(forest, span);
    log::info!(
        "Isolation forest fitted ({} trees), decision span [{:.4}, {:.4}]",
        config.iso_trees,
        span.min,
        span.max
    );

    // 5. Optional classifier
    let classifier: Capability<GradientBoostClassifier> = if config.enable_classifier {
        GradientBoostClassifier::fit(&scaled, &labels, &BoostConfig::default()).into()
    } else {
        log::info!("Classifier disabled by configuration");
        Capability::Absent
    };

    // 6. Optional sequence detector on per-flow normal windows
    let sequence_length = config.sequence_length.max(1);
    let groups = set.groups();
    let windows = normal_windows(&groups, &scaled, &labels, sequence_length);
    let window_count = windows.len();
    let sequence: Capability<SequenceAutoencoder> = if !config.enable_sequence {
        log::info!("Sequence detector disabled by configuration");
        Capability::Absent
    } else if windows.is_empty() {
        log::info!("Sequence detector skipped: no normal flow has {} sightings", sequence_length);
        Capability::Absent
    } else {
        let ae_config = AutoencoderConfig {
            sequence_length,
            epochs: config.epochs,
            batch_size: config.batch_size,
            seed: config.seed,
            ..Default::default()
        };
        SequenceAutoencoder::fit(&windows, &ae_config).into()
    };

    // 7. Calibrate on hybrid scores of every row
    let window_end = window_index(&groups, set.len(), sequence_length);
    let hybrid: Vec<f64> = scaled
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let iso = run_detector(&unsupervised, row).score().unwrap_or(NEUTRAL_SCORE);
            let gbm = match &classifier {
                Capability::Present(c) => run_detector(c, row),
                Capability::Absent => DetectorOutput::Absent,
            };
            let ae = match (&sequence, &window_end[i]) {
                (Capability::Present(s), Some(members)) => run_detector(s, &flatten(&scaled, members)),
                (Capability::Present(_), None) => DetectorOutput::NotReady,
                (Capability::Absent, _) => DetectorOutput::Absent,
            };
            fuse(iso, &[gbm, ae])
        })
        .collect();
    let outcome = threshold::calibrate(&hybrid, &labels, &config.threshold);
    log::info!(
        "Threshold {:.2} via {} (calibrated: {})",
        outcome.threshold,
        outcome.policy,
        outcome.calibrated
    );

    let mut metadata = CalibrationMetadata::new(outcome.threshold, span, sequence_length);
    metadata.calibration_policy = outcome.policy;
    metadata.training_rows = set.len();
    metadata.f1 = Some(outcome.evaluation.f1);

    let bundle = ArtifactBundle {
        encoders,
        normalizer,
        unsupervised,
        classifier,
        sequence,
        metadata,
    };
    bundle.check_consistency()?;
    Ok((bundle, outcome, window_count))
}

/// Raw decision span of a loaded bundle over the configured dataset
pub fn recompute_decision_span(bundle: &ArtifactBundle, config: &EngineConfig) -> EngineResult<DecisionSpan> {
    let set = dataset::load_training_set(config)?;
    let encoded = encode_rows(&set.rows, &bundle.encoders);

    let mut raw = Vec::with_capacity(encoded.len());
    for v in &encoded {
        let scaled = bundle.normalizer.transform(v.as_slice())?;
        raw.push(bundle.unsupervised.forest.decision_function(&scaled));
    }

    DecisionSpan::from_scores(&raw)
        .ok_or_else(|| EngineError::Training("no finite decision scores to span".into()))
}

fn column_value<'a>(row: &'a LabeledFlow, column: &str) -> &'a str {
    match column {
        "src_ip" => &row.flow.src_ip,
        "dst_ip" => &row.flow.dst_ip,
        _ => &row.flow.proto,
    }
}

fn encode_rows(rows: &[LabeledFlow], encoders: &EncoderSet) -> Vec<FeatureVector> {
    let mut ledger = RateLedger::new();
    rows.iter()
        .map(|row| FeatureVector::from_flow(&row.flow, encoders, &ledger.observe_flow(&row.flow)))
        .collect()
}

/// Sliding windows inside each flow group where every member is normal
fn normal_windows<K>(
    groups: &std::collections::BTreeMap<K, Vec<usize>>,
    scaled: &[Vec<f64>],
    labels: &[u8],
    length: usize,
) -> Vec<Vec<f64>> {
    groups
        .values()
        .flat_map(|members| members.windows(length))
        .filter(|w| w.iter().all(|&i| labels[i] == dataset::LABEL_NORMAL))
        .map(|w| flatten(scaled, w))
        .collect()
}

/// For each row, the group window that ends at it (if the group is long enough)
fn window_index<K>(
    groups: &std::collections::BTreeMap<K, Vec<usize>>,
    rows: usize,
    length: usize,
) -> Vec<Option<Vec<usize>>> {
    let mut ends = vec![None; rows];
    for members in groups.values() {
        for w in members.windows(length) {
            if let Some(&last) = w.last() {
                ends[last] = Some(w.to_vec());
            }
        }
    }
    ends
}

fn flatten(scaled: &[Vec<f64>], members: &[usize]) -> Vec<f64> {
    members.iter().flat_map(|&i| scaled[i].iter().copied()).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::logic::flow::FlowRecord;

    pub(crate) fn synthetic_set() -> TrainingSet {
        let mut rows = Vec::new();
        for i in 0..60u16 {
            let t = i as f64;
            let normal = FlowRecord::new("10.0.0.2", "10.0.0.1", 50000 + (i % 4), 443, "TCP")
                .with_counts(10 + (i % 5) as u64, 4000 + (i % 7) as u64 * 10)
                .with_rates(5.0 + (i % 3) as f64, 2000.0 + (i % 4) as f64 * 50.0)
                .with_times(Some(t), Some(t + 2.0))
                .with_duration(2.0);
            rows.push(LabeledFlow { flow: normal, label: 0 });
        }
        for i in 0..20u16 {
            let t = 100.0 + i as f64;
            let attack = FlowRecord::new("6.6.6.6", "10.0.0.1", 40000 + i, 22, "TCP")
                .with_counts(900, 90_000)
                .with_rates(900.0, 90_000.0)
                .with_times(Some(t), Some(t + 1.0))
                .with_duration(1.0);
            rows.push(LabeledFlow { flow: attack, label: 1 });
        }
        TrainingSet::from_tables([dataset::TableLoad { rows, dropped: 0 }])
    }

    pub(crate) fn small_config() -> EngineConfig {
        EngineConfig {
            iso_trees: 25,
            iso_sample_size: 32,
            epochs: 4,
            sequence_length: 3,
            ..Default::default()
        }
    }

    #[test]
    fn test_fit_bundle_trains_every_detector() {
        let (bundle, outcome, windows) = fit_bundle(&synthetic_set(), &small_config()).unwrap();
        assert!(bundle.classifier.is_present());
        assert!(bundle.sequence.is_present());
        assert!(windows > 0);
        assert_eq!(bundle.detectors().len(), 3);
        assert!(outcome.calibrated);
        assert!((0.10..=0.99).contains(&outcome.threshold));
        assert_eq!(bundle.threshold(), outcome.threshold);
    }

    #[test]
    fn test_single_class_leaves_classifier_absent() {
        let mut set = synthetic_set();
        set.rows.retain(|r| r.label == 0);
        let (bundle, outcome, _) = fit_bundle(&set, &small_config()).unwrap();
        assert_eq!(bundle.classifier, Capability::Absent);
        assert!(!outcome.calibrated);
        assert_eq!(outcome.threshold, small_config().threshold.default_threshold);
    }

    #[test]
    fn test_variants_omit_capabilities() {
        let config = EngineConfig {
            enable_classifier: false,
            enable_sequence: false,
            ..small_config()
        };
        let (bundle, _, _) = fit_bundle(&synthetic_set(), &config).unwrap();
        assert_eq!(bundle.detectors(), vec!["isolation_forest"]);
    }

    #[test]
    fn test_attack_only_set_rejected() {
        let mut set = synthetic_set();
        set.rows.retain(|r| r.label == 1);
        let err = fit_bundle(&set, &small_config()).unwrap_err();
        assert!(err.is_rejection());
    }

    #[test]
    fn test_deltas_survive_many_interleaved_flows() {
        let returning = FlowRecord::new("10.0.0.2", "10.0.0.1", 50000, 443, "TCP").with_rates(10.0, 100.0);
        let mut rows = vec![LabeledFlow { flow: returning.clone(), label: 0 }];
        for i in 0..998u16 {
            let flow = FlowRecord::new("10.0.0.3", "10.0.0.1", 20000 + i, 443, "TCP").with_rates(1.0, 1.0);
            rows.push(LabeledFlow { flow, label: 0 });
        }
        rows.push(LabeledFlow {
            flow: returning.with_rates(50.0, 80.0),
            label: 0,
        });

        let encoders = EncoderSet::fit(&rows, column_value);
        let encoded = encode_rows(&rows, &encoders);
        let last = encoded.last().unwrap();

        assert_eq!(last.get_by_name("pps_delta"), Some(40.0));
        assert_eq!(last.get_by_name("pps_cum_increase"), Some(40.0));
        assert_eq!(last.get_by_name("bps_delta"), Some(-20.0));
        assert_eq!(last.get_by_name("bps_cum_increase"), Some(0.0));
    }

    #[test]
    fn test_train_writes_loadable_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let csv = dir.path().join("flows.csv");
        let mut writer = csv::Writer::from_path(&csv).unwrap();
        writer
            .write_record([
                "src_ip", "dst_ip", "src_port", "dst_port", "proto", "packet_count", "byte_count", "pps", "bps",
                "start_time", "label",
            ])
            .unwrap();
        for row in synthetic_set().rows {
            let f = &row.flow;
            writer
                .write_record([
                    f.src_ip.clone(),
                    f.dst_ip.clone(),
                    f.src_port.to_string(),
                    f.dst_port.to_string(),
                    f.proto.to_lowercase(),
                    f.packet_count.to_string(),
                    f.byte_count.to_string(),
                    f.pps.to_string(),
                    f.bps.to_string(),
                    f.start_time.map(|t| t.to_string()).unwrap_or_default(),
                    row.label.to_string(),
                ])
                .unwrap();
        }
        writer.flush().unwrap();

        let config = small_config()
            .with_model_dir(dir.path().join("models"))
            .with_dataset(&csv);
        let report = train(&config).unwrap();
        assert_eq!(report.rows, 80);
        assert_eq!(report.attack_rows, 20);

        let store = ArtifactStore::new(&config.model_dir);
        let (bundle, state) = store.load().unwrap();
        assert!(!state.is_recovered());
        assert_eq!(bundle.threshold(), report.threshold);

        let span = recompute_decision_span(&bundle, &config).unwrap();
        assert!((span.min - report.decision_score_min).abs() < 1e-12);
        assert!((span.max - report.decision_score_max).abs() < 1e-12);
    }
}
