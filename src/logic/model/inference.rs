//! Inference Engine - Hybrid flow scoring
//!
//! Flow record → encode → rate deltas → normalize → detectors → fusion →
//! threshold. The engine owns the rate-delta state and the sequence buffer;
//! the fitted bundle sits behind an `Arc` that is swapped whole on reload, so
//! a prediction always sees one bundle from start to finish.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::NEUTRAL_SCORE;
use crate::error::{EngineError, EngineResult};
use crate::logic::artifacts::{ArtifactBundle, ArtifactStore, MetadataState};
use crate::logic::config::EngineConfig;
use crate::logic::features::RateDeltaTracker;
use crate::logic::flow::FlowRecord;
use crate::logic::sink::ScoreSink;
use crate::logic::training;
use super::buffer::{BufferStatus, SequenceBuffer};
use super::detector::{run_detector, Capability, DetectorOutput};
use super::fusion::DetectorOutputs;
use super::isolation::DecisionSpan;

// ============================================================================
// DATA STRUCTURES
// ============================================================================

/// Prediction output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreBundle {
    pub is_anom: bool,
    pub iso_score: f64,
    /// Omitted while the sequence detector is absent or filling its window
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ae_score: Option<f64>,
    /// `null` when no classifier is loaded
    #[serde(default)]
    pub gbm_score: Option<f64>,
    pub hybrid_score: f64,
}

impl ScoreBundle {
    /// Deterministic neutral result used in dummy mode
    pub fn dummy() -> Self {
        Self {
            is_anom: false,
            iso_score: 0.0,
            ae_score: None,
            gbm_score: None,
            hybrid_score: 0.0,
        }
    }
}

/// Engine Status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineStatus {
    pub model_loaded: bool,
    pub dummy_mode: bool,
    pub detectors: Vec<String>,
    pub threshold: Option<f64>,
    pub run_id: Option<Uuid>,
    pub prediction_count: u64,
    pub avg_latency_us: f64,
    pub tracked_flows: usize,
    pub sequence_buffer: BufferStatus,
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct Engine {
    config: EngineConfig,
    bundle: RwLock<Option<Arc<ArtifactBundle>>>,
    tracker: RateDeltaTracker,
    buffer: SequenceBuffer,
    sink: Option<Arc<dyn ScoreSink>>,
    predictions: AtomicU64,
    latency_sum_us: AtomicU64,
}

impl Engine {
    /// Engine with no bundle loaded
    pub fn new(config: EngineConfig) -> Self {
        Self {
            tracker: RateDeltaTracker::new(config.rate_cache_capacity),
            buffer: SequenceBuffer::new(config.sequence_length),
            bundle: RwLock::new(None),
            sink: None,
            predictions: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            config,
        }
    }

    /// Engine with the bundle at `config.model_dir` loaded if present.
    /// Load failures are fatal only when dummy mode is disabled.
    pub fn from_config(config: EngineConfig) -> EngineResult<Self> {
        let engine = Self::new(config);

        if !ArtifactStore::new(&engine.config.model_dir).exists() {
            log::warn!(
                "No artifact bundle at {:?}; {}",
                engine.config.model_dir,
                if engine.config.allow_dummy { "running in dummy mode" } else { "predictions will be refused" }
            );
            return Ok(engine);
        }

        match engine.load() {
            Ok(()) => Ok(engine),
            Err(e) if engine.config.allow_dummy => {
                log::warn!("Failed to load artifact bundle ({}); running in dummy mode", e);
                Ok(engine)
            }
            Err(e) => Err(e),
        }
    }

    /// Bundle already in memory
    pub fn with_bundle(config: EngineConfig, bundle: ArtifactBundle) -> Self {
        let engine = Self::new(config);
        engine.install(bundle);
        engine
    }

    pub fn with_sink(mut self, sink: Arc<dyn ScoreSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ========================================================================
    // BUNDLE LIFECYCLE
    // ========================================================================

    /// (Re)load the bundle from `model_dir`; in-flight predictions finish on the old one
    pub fn load(&self) -> EngineResult<()> {
        let _guard = training::ARTIFACT_LOCK.lock();

        let (mut bundle, state) = ArtifactStore::new(&self.config.model_dir).load()?;

        if let MetadataState::Recovered { salvaged_threshold, .. } = state {
            let span = self.recover_span(&bundle);
            bundle.unsupervised.span = span;
            bundle.metadata.set_span(span);
            bundle.metadata.threshold = salvaged_threshold.unwrap_or(self.config.threshold.default_threshold);
            log::warn!(
                "Using recovered calibration: span [{:.4}, {:.4}], threshold {:.2}",
                span.min,
                span.max,
                bundle.metadata.threshold
            );
        }

        self.install(bundle);
        Ok(())
    }

    fn recover_span(&self, bundle: &ArtifactBundle) -> DecisionSpan {
        if self.config.dataset_path.is_none() {
            return DecisionSpan::theoretical();
        }
        match training::recompute_decision_span(bundle, &self.config) {
            Ok(span) => span,
            Err(e) => {
                log::warn!("Could not recompute decision span from dataset: {}", e);
                DecisionSpan::theoretical()
            }
        }
    }

    /// Swap in a bundle, applying the configured threshold override
    pub fn install(&self, mut bundle: ArtifactBundle) {
        match self.config.threshold_override {
            Some(threshold) if threshold.is_finite() && (0.0..=1.0).contains(&threshold) => {
                log::info!(
                    "Threshold override {:.2} replaces calibrated {:.2}",
                    threshold,
                    bundle.metadata.threshold
                );
                bundle.metadata.threshold = threshold;
            }
            Some(threshold) => log::warn!(
                "Ignoring threshold override {} outside [0, 1]; keeping calibrated {:.2}",
                threshold,
                bundle.metadata.threshold
            ),
            None => {}
        }

        let mut slot = self.bundle.write();
        self.buffer.reset(bundle.sequence_length());
        *slot = Some(Arc::new(bundle));
    }

    pub fn unload(&self) {
        *self.bundle.write() = None;
        self.buffer.clear();
        log::info!("Artifact bundle unloaded");
    }

    pub fn is_loaded(&self) -> bool {
        self.bundle.read().is_some()
    }

    pub fn bundle(&self) -> Option<Arc<ArtifactBundle>> {
        self.bundle.read().clone()
    }

    /// Bundle together with the buffer generation it was installed with
    fn snapshot(&self) -> Option<(Arc<ArtifactBundle>, u64)> {
        let slot = self.bundle.read();
        slot.as_ref().map(|b| (Arc::clone(b), self.buffer.generation()))
    }

    pub fn threshold(&self) -> Option<f64> {
        self.bundle.read().as_ref().map(|b| b.threshold())
    }

    // ========================================================================
    // PREDICTION
    // ========================================================================

    /// Score one flow
    pub fn predict(&self, flow: &FlowRecord) -> EngineResult<ScoreBundle> {
        let started = Instant::now();
        let flow = flow.clone().normalized()?;

        let Some((bundle, generation)) = self.snapshot() else {
            if self.config.allow_dummy {
                log::debug!("No bundle loaded; returning dummy score for {}", flow.key());
                return Ok(ScoreBundle::dummy());
            }
            return Err(EngineError::ModelNotLoaded);
        };

        let vector = bundle.pipeline().transform(&flow, &self.tracker)?;
        let outputs = self.run_detectors(&bundle, generation, &vector);

        let hybrid = outputs.hybrid();
        let score = ScoreBundle {
            is_anom: hybrid >= bundle.threshold(),
            iso_score: outputs.isolation,
            ae_score: outputs.sequence.score(),
            gbm_score: outputs.classifier.score(),
            hybrid_score: hybrid,
        };

        let elapsed = started.elapsed().as_micros() as u64;
        self.latency_sum_us.fetch_add(elapsed, Ordering::Relaxed);
        self.predictions.fetch_add(1, Ordering::Relaxed);

        log::debug!(
            "{} hybrid={:.4} iso={:.4} gbm={:?} ae={:?} anom={} ({} us)",
            flow.key(),
            score.hybrid_score,
            score.iso_score,
            score.gbm_score,
            score.ae_score,
            score.is_anom,
            elapsed
        );

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.record(&flow, &score) {
                log::error!("Score sink failed: {}", e);
            }
        }

        Ok(score)
    }

    fn run_detectors(&self, bundle: &ArtifactBundle, generation: u64, vector: &[f64]) -> DetectorOutputs {
        let isolation = run_detector(&bundle.unsupervised, vector)
            .score()
            .unwrap_or(NEUTRAL_SCORE);

        let classifier = match &bundle.classifier {
            Capability::Present(c) => run_detector(c, vector),
            Capability::Absent => DetectorOutput::Absent,
        };

        let sequence = match &bundle.sequence {
            // A reload since the snapshot leaves this vector out of the new window
            Capability::Present(s) => match self.buffer.push_in(generation, vector) {
                Some(window) => run_detector(s, &window),
                None => DetectorOutput::NotReady,
            },
            Capability::Absent => DetectorOutput::Absent,
        };

        DetectorOutputs {
            isolation,
            classifier,
            sequence,
        }
    }

    // ========================================================================
    // STATUS
    // ========================================================================

    pub fn status(&self) -> EngineStatus {
        let bundle = self.bundle();
        let count = self.predictions.load(Ordering::Relaxed);
        let sum = self.latency_sum_us.load(Ordering::Relaxed);

        EngineStatus {
            model_loaded: bundle.is_some(),
            dummy_mode: bundle.is_none() && self.config.allow_dummy,
            detectors: bundle
                .as_ref()
                .map(|b| b.detectors().into_iter().map(String::from).collect())
                .unwrap_or_default(),
            threshold: bundle.as_ref().map(|b| b.threshold()),
            run_id: bundle.as_ref().and_then(|b| b.metadata.run_id),
            prediction_count: count,
            avg_latency_us: if count > 0 { sum as f64 / count as f64 } else { 0.0 },
            tracked_flows: self.tracker.len(),
            sequence_buffer: self.buffer.status(),
        }
    }

    /// Forget all per-flow rate state and the sequence window
    pub fn reset_state(&self) {
        self.tracker.clear();
        self.buffer.clear();
    }
}
