//! Isolation Forest - Unsupervised Detector
//!
//! Trained on normal rows only. Anomalies are easier to isolate and so have
//! shorter average path lengths across the trees.
//!
//! Raw decision score follows the "higher is more normal" convention:
//! `decision = 0.5 - 2^(-E[h(x)] / c(psi))`, which lies in (-0.5, 0.5).
//! The calibrated score maps the training-time span of that value into
//! [0, 1] with the orientation flipped.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::constants::{SPAN_EPSILON, SPAN_WIDEN};
use crate::error::{EngineError, EngineResult};
use super::detector::{check_dimension, AnomalyDetector, DetectorError};

const EULER_GAMMA: f64 = 0.577_215_664_9;

/// Forest hyper-parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForestConfig {
    pub num_trees: usize,
    pub sample_size: usize,
    pub seed: u64,
}

impl Default for ForestConfig {
    fn default() -> Self {
        Self {
            num_trees: crate::constants::DEFAULT_ISO_TREES,
            sample_size: crate::constants::DEFAULT_ISO_SAMPLE_SIZE,
            seed: crate::constants::DEFAULT_SEED,
        }
    }
}

// ============================================================================
// FOREST
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    /// Effective sub-sample size (psi)
    sample_size: usize,
    n_features: usize,
}

impl IsolationForest {
    /// Average path length of an unsuccessful BST search, c(n)
    pub fn average_path_length(n: usize) -> f64 {
        match n {
            0 | 1 => 0.0,
            2 => 1.0,
            _ => {
                let n = n as f64;
                2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
            }
        }
    }

    pub fn fit<R: AsRef<[f64]>>(data: &[R], config: &ForestConfig) -> EngineResult<Self> {
        let n_features = data
            .first()
            .map(|r| r.as_ref().len())
            .ok_or_else(|| EngineError::Training("isolation forest needs at least one normal row".into()))?;
        if config.num_trees == 0 {
            return Err(EngineError::Training("isolation forest needs at least one tree".into()));
        }

        let mut rng = StdRng::seed_from_u64(config.seed);
        let sample_size = config.sample_size.clamp(1, data.len());
        let max_depth = (sample_size as f64).log2().ceil().max(1.0) as usize;

        let trees = (0..config.num_trees)
            .map(|_| {
                // Sub-sample without replacement
                let sample: Vec<&[f64]> = rand::seq::index::sample(&mut rng, data.len(), sample_size)
                    .into_iter()
                    .map(|i| data[i].as_ref())
                    .collect();
                IsolationTree::build(&sample, n_features, max_depth, &mut rng)
            })
            .collect();

        Ok(Self {
            trees,
            sample_size,
            n_features,
        })
    }

    /// Anomaly score in (0, 1]; higher is more anomalous
    pub fn anomaly_score(&self, sample: &[f64]) -> f64 {
        let c = Self::average_path_length(self.sample_size);
        if self.trees.is_empty() || c == 0.0 {
            return 0.5;
        }

        let total: f64 = self.trees.iter().map(|t| t.path_length(sample)).sum();
        let avg_path = total / self.trees.len() as f64;

        2.0_f64.powf(-avg_path / c)
    }

    /// Raw decision score; lower is more anomalous
    pub fn decision_function(&self, sample: &[f64]) -> f64 {
        0.5 - self.anomaly_score(sample)
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }
}

// ============================================================================
// TREE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IsolationTree {
    root: IsolationNode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum IsolationNode {
    Internal {
        feature_idx: usize,
        split_value: f64,
        left: Box<IsolationNode>,
        right: Box<IsolationNode>,
    },
    Leaf {
        size: usize,
    },
}

impl IsolationTree {
    fn build<R: Rng>(samples: &[&[f64]], n_features: usize, max_depth: usize, rng: &mut R) -> Self {
        Self {
            root: Self::build_node(samples, n_features, 0, max_depth, rng),
        }
    }

    fn build_node<R: Rng>(
        samples: &[&[f64]],
        n_features: usize,
        depth: usize,
        max_depth: usize,
        rng: &mut R,
    ) -> IsolationNode {
        if depth >= max_depth || samples.len() <= 1 || n_features == 0 {
            return IsolationNode::Leaf { size: samples.len() };
        }

        let feature_idx = rng.gen_range(0..n_features);

        let (min_val, max_val) = samples.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| {
            let v = s[feature_idx];
            (lo.min(v), hi.max(v))
        });

        // All values equal on this feature
        if !(max_val - min_val).is_finite() || max_val - min_val <= f64::EPSILON {
            return IsolationNode::Leaf { size: samples.len() };
        }

        let split_value = rng.gen_range(min_val..max_val);

        let (left, right): (Vec<&[f64]>, Vec<&[f64]>) =
            samples.iter().partition(|s| s[feature_idx] < split_value);

        IsolationNode::Internal {
            feature_idx,
            split_value,
            left: Box::new(Self::build_node(&left, n_features, depth + 1, max_depth, rng)),
            right: Box::new(Self::build_node(&right, n_features, depth + 1, max_depth, rng)),
        }
    }

    fn path_length(&self, sample: &[f64]) -> f64 {
        let mut node = &self.root;
        let mut depth = 0usize;

        loop {
            match node {
                IsolationNode::Leaf { size } => {
                    return depth as f64 + IsolationForest::average_path_length(*size);
                }
                IsolationNode::Internal {
                    feature_idx,
                    split_value,
                    left,
                    right,
                } => {
                    let v = sample.get(*feature_idx).copied().unwrap_or(0.0);
                    node = if v < *split_value { &**left } else { &**right };
                    depth += 1;
                }
            }
        }
    }
}

// ============================================================================
// CALIBRATED DETECTOR
// ============================================================================

/// Observed min/max of the raw decision score over the training population
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionSpan {
    pub min: f64,
    pub max: f64,
}

impl DecisionSpan {
    /// Span over a set of raw scores; degenerate spans are widened before storing
    pub fn from_scores(scores: &[f64]) -> Option<Self> {
        let (min, max) = scores
            .iter()
            .filter(|s| s.is_finite())
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &s| (lo.min(s), hi.max(s)));

        if !min.is_finite() || !max.is_finite() {
            return None;
        }

        let span = Self { min, max };
        if span.is_degenerate() {
            log::warn!(
                "Decision-score span is degenerate ({:.3e}); widening by {:e}",
                max - min,
                SPAN_WIDEN
            );
            return Some(Self { min, max: min + SPAN_WIDEN });
        }
        Some(span)
    }

    /// Full range the raw decision score can take
    pub fn theoretical() -> Self {
        Self { min: -0.5, max: 0.5 }
    }

    pub fn is_degenerate(&self) -> bool {
        self.max - self.min <= SPAN_EPSILON
    }

    pub fn is_valid(&self) -> bool {
        self.min.is_finite() && self.max.is_finite() && self.min <= self.max
    }

    /// Map a raw score into [0, 1]; lower raw → higher calibrated score
    pub fn calibrate(&self, raw: f64) -> f64 {
        let score = if self.is_degenerate() {
            -raw
        } else {
            (self.max - raw) / (self.max - self.min)
        };
        score.clamp(0.0, 1.0)
    }
}

/// Isolation forest plus the span that calibrates its output
#[derive(Debug, Clone, PartialEq)]
pub struct UnsupervisedDetector {
    pub forest: IsolationForest,
    pub span: DecisionSpan,
}

impl UnsupervisedDetector {
    pub fn new(forest: IsolationForest, span: DecisionSpan) -> Self {
        Self { forest, span }
    }

    pub fn raw_score(&self, features: &[f64]) -> Result<f64, DetectorError> {
        check_dimension(self.name(), self.forest.n_features(), features)?;
        Ok(self.forest.decision_function(features))
    }
}

impl AnomalyDetector for UnsupervisedDetector {
    fn name(&self) -> &'static str {
        "isolation_forest"
    }

    fn score(&self, features: &[f64]) -> Result<f64, DetectorError> {
        let raw = self.raw_score(features)?;
        Ok(self.span.calibrate(raw))
    }
}
