//! Calibration Metadata - human-editable part of a bundle
//!
//! Stored as pretty JSON so the threshold can be changed by hand without
//! retraining. Only the first four fields are required; the rest default so
//! older or hand-trimmed files still load.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::DEFAULT_SEQUENCE_LENGTH;
use crate::error::{EngineError, EngineResult};
use crate::logic::features::layout::{self, FEATURE_VERSION};
use crate::logic::model::isolation::DecisionSpan;
use crate::logic::model::threshold::CalibrationPolicy;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationMetadata {
    pub feature_column_order: Vec<String>,
    pub threshold: f64,
    pub decision_score_min: f64,
    pub decision_score_max: f64,

    #[serde(default)]
    pub layout_hash: Option<u32>,
    #[serde(default)]
    pub feature_version: Option<u8>,
    #[serde(default)]
    pub calibration_policy: CalibrationPolicy,
    #[serde(default = "default_sequence_length")]
    pub sequence_length: usize,
    #[serde(default)]
    pub trained_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub run_id: Option<Uuid>,
    #[serde(default)]
    pub training_rows: usize,
    /// F1 of the chosen threshold on the training set
    #[serde(default)]
    pub f1: Option<f64>,
}

fn default_sequence_length() -> usize {
    DEFAULT_SEQUENCE_LENGTH
}

impl CalibrationMetadata {
    pub fn new(threshold: f64, span: DecisionSpan, sequence_length: usize) -> Self {
        Self {
            feature_column_order: layout::layout_columns(),
            threshold,
            decision_score_min: span.min,
            decision_score_max: span.max,
            layout_hash: Some(layout::layout_hash()),
            feature_version: Some(FEATURE_VERSION),
            calibration_policy: CalibrationPolicy::default(),
            sequence_length,
            trained_at: Some(Utc::now()),
            run_id: Some(Uuid::new_v4()),
            training_rows: 0,
            f1: None,
        }
    }

    pub fn span(&self) -> DecisionSpan {
        DecisionSpan {
            min: self.decision_score_min,
            max: self.decision_score_max,
        }
    }

    pub fn set_span(&mut self, span: DecisionSpan) {
        self.decision_score_min = span.min;
        self.decision_score_max = span.max;
    }

    /// Column order must match the compiled-in layout
    pub fn check_layout(&self) -> EngineResult<()> {
        layout::validate_columns(&self.feature_column_order)?;
        if let Some(stored) = self.layout_hash {
            let expected = layout::layout_hash();
            if stored != expected {
                return Err(EngineError::LayoutMismatch {
                    expected,
                    actual: stored,
                });
            }
        }
        Ok(())
    }

    /// Numeric calibration fields are usable
    pub fn validate(&self) -> EngineResult<()> {
        if !self.threshold.is_finite() || !(0.0..=1.0).contains(&self.threshold) {
            return Err(EngineError::artifact(format!(
                "threshold {} outside [0, 1]",
                self.threshold
            )));
        }
        if !self.span().is_valid() {
            return Err(EngineError::artifact(format!(
                "invalid decision-score span [{}, {}]",
                self.decision_score_min, self.decision_score_max
            )));
        }
        if self.sequence_length == 0 {
            return Err(EngineError::artifact("sequence_length must be > 0"));
        }
        Ok(())
    }

    /// Salvage a usable threshold from a file that failed to parse or validate
    pub fn salvage_threshold(raw: &serde_json::Value) -> Option<f64> {
        raw.get("threshold")
            .and_then(serde_json::Value::as_f64)
            .filter(|t| t.is_finite() && (0.0..=1.0).contains(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> CalibrationMetadata {
        CalibrationMetadata::new(0.42, DecisionSpan { min: -0.1, max: 0.2 }, 5)
    }

    #[test]
    fn test_minimal_file_parses_with_defaults() {
        let json = serde_json::json!({
            "feature_column_order": layout::layout_columns(),
            "threshold": 0.4,
            "decision_score_min": -0.2,
            "decision_score_max": 0.1,
        });
        let meta: CalibrationMetadata = serde_json::from_value(json).unwrap();
        assert_eq!(meta.sequence_length, DEFAULT_SEQUENCE_LENGTH);
        assert_eq!(meta.calibration_policy, CalibrationPolicy::GridF1);
        assert!(meta.check_layout().is_ok());
        assert!(meta.validate().is_ok());
    }

    #[test]
    fn test_reordered_columns_rejected() {
        let mut meta = sample();
        meta.feature_column_order.swap(0, 1);
        assert!(matches!(meta.check_layout(), Err(EngineError::LayoutMismatch { .. })));
    }

    #[test]
    fn test_invalid_calibration_values() {
        let mut meta = sample();
        meta.threshold = 1.5;
        assert!(meta.validate().is_err());

        let mut meta = sample();
        meta.decision_score_min = 0.5;
        assert!(meta.validate().is_err());

        let mut meta = sample();
        meta.decision_score_max = f64::NAN;
        assert!(meta.validate().is_err());
    }

    #[test]
    fn test_salvage_threshold() {
        let raw = serde_json::json!({ "threshold": 0.37, "decision_score_min": "oops" });
        assert_eq!(CalibrationMetadata::salvage_threshold(&raw), Some(0.37));
        let raw = serde_json::json!({ "threshold": 7.0 });
        assert_eq!(CalibrationMetadata::salvage_threshold(&raw), None);
    }
}
