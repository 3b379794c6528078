//! Threshold Calibration
//!
//! Learns the hybrid-score decision threshold from labeled training scores.
//! Two policies are supported:
//! - `GridF1`: dense grid search maximizing F1, lowest threshold wins ties
//! - `GapMidpoint`: midpoint between the highest normal and lowest attack score
//!
//! The verdict everywhere is `hybrid_score >= threshold`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_THRESHOLD;

/// Calibration policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationPolicy {
    #[default]
    GridF1,
    GapMidpoint,
}

impl fmt::Display for CalibrationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationPolicy::GridF1 => write!(f, "grid_f1"),
            CalibrationPolicy::GapMidpoint => write!(f, "gap_midpoint"),
        }
    }
}

impl FromStr for CalibrationPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "grid_f1" | "grid" | "f1" => Ok(CalibrationPolicy::GridF1),
            "gap_midpoint" | "gap" | "midpoint" => Ok(CalibrationPolicy::GapMidpoint),
            other => Err(format!("unknown calibration policy '{}'", other)),
        }
    }
}

/// Threshold Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    /// Used when calibration cannot produce a value
    pub default_threshold: f64,

    pub policy: CalibrationPolicy,

    /// Grid search lower bound (inclusive)
    pub grid_min: f64,

    /// Grid search upper bound (inclusive)
    pub grid_max: f64,

    pub grid_step: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            default_threshold: DEFAULT_THRESHOLD,
            policy: CalibrationPolicy::GridF1,
            grid_min: 0.10,
            grid_max: 0.99,
            grid_step: 0.01,
        }
    }
}

impl ThresholdConfig {
    pub fn new(default_threshold: f64) -> Self {
        Self {
            default_threshold,
            ..Default::default()
        }
    }

    /// Candidate thresholds, ascending; integer-stepped to avoid float drift
    pub fn grid(&self) -> Vec<f64> {
        if !(self.grid_step > 0.0) || self.grid_max < self.grid_min {
            return vec![self.grid_min];
        }
        let steps = ((self.grid_max - self.grid_min) / self.grid_step + 1e-9).floor() as usize;
        (0..=steps)
            .map(|i| self.grid_min + i as f64 * self.grid_step)
            .map(|t| (t * 1e6).round() / 1e6)
            .filter(|t| *t >= self.grid_min)
            .collect()
    }
}

// ============================================================================
// EVALUATION
// ============================================================================

/// Confusion counts plus derived metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub tp: usize,
    pub fp: usize,
    #[serde(rename = "fn")]
    pub fn_: usize,
    pub tn: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

impl Evaluation {
    pub fn total(&self) -> usize {
        self.tp + self.fp + self.fn_ + self.tn
    }

    pub fn accuracy(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            n => (self.tp + self.tn) as f64 / n as f64,
        }
    }
}

/// Score predicted verdicts against labels (1 = attack)
pub fn evaluate(predictions: &[bool], labels: &[u8]) -> Evaluation {
    let mut e = Evaluation::default();
    for (&predicted, &label) in predictions.iter().zip(labels) {
        match (predicted, label != 0) {
            (true, true) => e.tp += 1,
            (true, false) => e.fp += 1,
            (false, true) => e.fn_ += 1,
            (false, false) => e.tn += 1,
        }
    }

    e.precision = ratio(e.tp, e.tp + e.fp);
    e.recall = ratio(e.tp, e.tp + e.fn_);
    e.f1 = if e.precision + e.recall > 0.0 {
        2.0 * e.precision * e.recall / (e.precision + e.recall)
    } else {
        0.0
    };
    e
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

fn verdicts(scores: &[f64], threshold: f64) -> Vec<bool> {
    scores.iter().map(|&s| s >= threshold).collect()
}

// ============================================================================
// CALIBRATION
// ============================================================================

/// Result of one calibration run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationOutcome {
    pub threshold: f64,
    pub policy: CalibrationPolicy,
    /// False when the default was retained
    pub calibrated: bool,
    pub evaluation: Evaluation,
}

/// Threshold maximizing F1 over the grid; `None` without both classes
pub fn grid_f1(scores: &[f64], labels: &[u8], config: &ThresholdConfig) -> Option<(f64, Evaluation)> {
    if !has_both_classes(labels) {
        return None;
    }

    let mut best: Option<(f64, Evaluation)> = None;
    for threshold in config.grid() {
        let eval = evaluate(&verdicts(scores, threshold), labels);
        // Strict comparison keeps the first (lowest) threshold on ties
        if best.as_ref().map_or(true, |(_, b)| eval.f1 > b.f1) {
            best = Some((threshold, eval));
        }
    }
    best
}

/// Midpoint between max normal score and min attack score
pub fn gap_midpoint(scores: &[f64], labels: &[u8]) -> Option<f64> {
    let mut max_normal: Option<f64> = None;
    let mut min_attack: Option<f64> = None;

    for (&score, &label) in scores.iter().zip(labels) {
        if label != 0 {
            min_attack = Some(min_attack.map_or(score, |m| m.min(score)));
        } else {
            max_normal = Some(max_normal.map_or(score, |m| m.max(score)));
        }
    }

    match (max_normal, min_attack) {
        (Some(normal), Some(attack)) => Some((normal + attack) / 2.0),
        _ => None,
    }
}

/// Run the configured policy, falling back to the default threshold
pub fn calibrate(scores: &[f64], labels: &[u8], config: &ThresholdConfig) -> CalibrationOutcome {
    let learned = match config.policy {
        CalibrationPolicy::GridF1 => grid_f1(scores, labels, config).map(|(t, _)| t),
        CalibrationPolicy::GapMidpoint => gap_midpoint(scores, labels),
    };

    let (threshold, calibrated) = match learned {
        Some(t) if t.is_finite() => (t, true),
        _ => {
            log::warn!(
                "Calibration ({}) needs both classes; keeping default threshold {:.2}",
                config.policy,
                config.default_threshold
            );
            (config.default_threshold, false)
        }
    };

    CalibrationOutcome {
        threshold,
        policy: config.policy,
        calibrated,
        evaluation: evaluate(&verdicts(scores, threshold), labels),
    }
}

fn has_both_classes(labels: &[u8]) -> bool {
    labels.iter().any(|&y| y != 0) && labels.iter().any(|&y| y == 0)
}
