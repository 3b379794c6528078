//! Detector seam
//!
//! Every detector emits a calibrated score in [0, 1]. Optional detectors are
//! held as a `Capability`, so the engine matches on presence instead of
//! checking for nulls.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Local scoring failure; always recovered to the detector's absent default
#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("{detector}: expected {expected} inputs, got {actual}")]
    Dimension {
        detector: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{0}: produced a non-finite score")]
    NonFinite(&'static str),
}

/// Trait for anomaly detectors
pub trait AnomalyDetector {
    fn name(&self) -> &'static str;

    /// Calibrated score in [0, 1]; higher is more anomalous
    fn score(&self, features: &[f64]) -> Result<f64, DetectorError>;
}

/// Whether an optional detector was trained
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Capability<T> {
    Present(T),
    Absent,
}

impl<T> Capability<T> {
    pub fn is_present(&self) -> bool {
        matches!(self, Capability::Present(_))
    }

    pub fn as_ref(&self) -> Capability<&T> {
        match self {
            Capability::Present(d) => Capability::Present(d),
            Capability::Absent => Capability::Absent,
        }
    }

    pub fn present(&self) -> Option<&T> {
        match self {
            Capability::Present(d) => Some(d),
            Capability::Absent => None,
        }
    }
}

impl<T> From<Option<T>> for Capability<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(d) => Capability::Present(d),
            None => Capability::Absent,
        }
    }
}

impl<T> Default for Capability<T> {
    fn default() -> Self {
        Capability::Absent
    }
}

/// Per-detector outcome for one prediction
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DetectorOutput {
    Score(f64),
    /// Detector not trained, or recovered from a scoring failure
    Absent,
    /// Sequence buffer still filling
    NotReady,
}

impl DetectorOutput {
    pub fn score(&self) -> Option<f64> {
        match self {
            DetectorOutput::Score(s) => Some(*s),
            DetectorOutput::Absent | DetectorOutput::NotReady => None,
        }
    }
}

/// Run a detector, recovering any failure to `Absent`
pub fn run_detector<D: AnomalyDetector + ?Sized>(detector: &D, features: &[f64]) -> DetectorOutput {
    match detector.score(features) {
        Ok(score) if score.is_finite() => DetectorOutput::Score(score.clamp(0.0, 1.0)),
        Ok(_) => {
            log::warn!("{}", DetectorError::NonFinite(detector.name()));
            DetectorOutput::Absent
        }
        Err(e) => {
            log::warn!("Detector failed, using absent default: {}", e);
            DetectorOutput::Absent
        }
    }
}

/// Guard used by detectors before scoring
pub fn check_dimension(detector: &'static str, expected: usize, features: &[f64]) -> Result<(), DetectorError> {
    if features.len() != expected {
        return Err(DetectorError::Dimension {
            detector,
            expected,
            actual: features.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(f64);

    impl AnomalyDetector for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn score(&self, features: &[f64]) -> Result<f64, DetectorError> {
            check_dimension("fixed", 2, features)?;
            Ok(self.0)
        }
    }

    #[test]
    fn test_failures_recover_to_absent() {
        assert_eq!(run_detector(&Fixed(0.3), &[0.0, 0.0]), DetectorOutput::Score(0.3));
        assert_eq!(run_detector(&Fixed(0.3), &[0.0]), DetectorOutput::Absent);
        assert_eq!(run_detector(&Fixed(f64::NAN), &[0.0, 0.0]), DetectorOutput::Absent);
    }

    #[test]
    fn test_scores_are_clamped() {
        assert_eq!(run_detector(&Fixed(1.7), &[0.0, 0.0]), DetectorOutput::Score(1.0));
    }

    #[test]
    fn test_capability_from_option() {
        let present: Capability<u8> = Some(1).into();
        assert!(present.is_present());
        assert_eq!(present.present(), Some(&1));
        let absent: Capability<u8> = None.into();
        assert_eq!(absent, Capability::Absent);
    }
}
