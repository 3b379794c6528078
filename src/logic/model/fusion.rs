//! Score Fusion
//!
//! Fixed-arity unweighted mean: isolation forest + classifier + sequence
//! detector. A slot that is absent or not ready contributes the neutral 0.5,
//! so with only the isolation forest loaded `hybrid = (iso + 0.5 + 0.5) / 3`.

use crate::constants::NEUTRAL_SCORE;
use super::detector::DetectorOutput;

/// Number of detector slots in the average
pub const FUSION_ARITY: usize = 3;

/// Per-slot outputs for one prediction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorOutputs {
    pub isolation: f64,
    pub classifier: DetectorOutput,
    pub sequence: DetectorOutput,
}

impl DetectorOutputs {
    pub fn hybrid(&self) -> f64 {
        fuse(
            self.isolation,
            &[self.classifier, self.sequence],
        )
    }
}

/// Hybrid score in [0, 1]; `optional` fills the remaining slots
pub fn fuse(isolation: f64, optional: &[DetectorOutput]) -> f64 {
    debug_assert_eq!(optional.len() + 1, FUSION_ARITY);

    let sum: f64 = optional
        .iter()
        .map(|o| o.score().unwrap_or(NEUTRAL_SCORE))
        .sum::<f64>()
        + isolation.clamp(0.0, 1.0);

    (sum / FUSION_ARITY as f64).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_isolation_loaded() {
        let hybrid = fuse(0.8, &[DetectorOutput::Absent, DetectorOutput::Absent]);
        assert!((hybrid - (0.8 + 0.5 + 0.5) / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_not_ready_equals_absent() {
        let absent = fuse(0.3, &[DetectorOutput::Score(0.9), DetectorOutput::Absent]);
        let not_ready = fuse(0.3, &[DetectorOutput::Score(0.9), DetectorOutput::NotReady]);
        assert_eq!(absent, not_ready);
    }

    #[test]
    fn test_all_present() {
        let outputs = DetectorOutputs {
            isolation: 0.9,
            classifier: DetectorOutput::Score(0.6),
            sequence: DetectorOutput::Score(0.3),
        };
        assert!((outputs.hybrid() - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_bounds() {
        assert_eq!(fuse(0.0, &[DetectorOutput::Score(0.0), DetectorOutput::Score(0.0)]), 0.0);
        assert_eq!(fuse(1.0, &[DetectorOutput::Score(1.0), DetectorOutput::Score(1.0)]), 1.0);
    }
}
