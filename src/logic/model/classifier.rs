//! Gradient Boosting Classifier - Supervised Detector
//!
//! Boosted decision stumps under logistic loss, trained on the full labeled
//! set (normal = 0, attack = 1). Output is the attack-class probability, so
//! no further calibration is applied.
//!
//! # Algorithm
//! 1. Start from the log-odds of the attack prior
//! 2. For each boosting round:
//!    - gradient g = y - p, hessian h = p(1 - p)
//!    - pick the single split maximizing the regularized gain
//!    - leaf values are Newton steps sum(g) / (sum(h) + lambda)
//!    - add the stump with shrinkage

use serde::{Deserialize, Serialize};

use super::detector::{check_dimension, AnomalyDetector, DetectorError};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoostConfig {
    /// Number of boosting rounds (stumps)
    pub n_estimators: usize,
    /// Shrinkage per round
    pub learning_rate: f64,
    /// Minimum rows on each side of a split
    pub min_samples_leaf: usize,
    /// L2 regularization on leaf values
    pub lambda: f64,
}

impl Default for BoostConfig {
    fn default() -> Self {
        Self {
            n_estimators: 60,
            learning_rate: 0.3,
            min_samples_leaf: 2,
            lambda: 1.0,
        }
    }
}

/// Single split; `x[feature_idx] <= threshold` goes left
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Stump {
    feature_idx: usize,
    threshold: f64,
    left_value: f64,
    right_value: f64,
}

impl Stump {
    fn predict(&self, x: &[f64]) -> f64 {
        if x[self.feature_idx] <= self.threshold {
            self.left_value
        } else {
            self.right_value
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostClassifier {
    base_logit: f64,
    learning_rate: f64,
    stumps: Vec<Stump>,
    n_features: usize,
}

impl GradientBoostClassifier {
    /// Train on labeled rows; `None` unless both classes are present
    pub fn fit<R: AsRef<[f64]>>(features: &[R], labels: &[u8], config: &BoostConfig) -> Option<Self> {
        if features.is_empty() || features.len() != labels.len() {
            return None;
        }

        let n = features.len();
        let n_features = features[0].as_ref().len();
        let positives = labels.iter().filter(|&&y| y != 0).count();
        if positives == 0 || positives == n {
            log::info!("Classifier skipped: training set has a single class");
            return None;
        }

        let targets: Vec<f64> = labels.iter().map(|&y| if y != 0 { 1.0 } else { 0.0 }).collect();
        let prior = positives as f64 / n as f64;
        let base_logit = (prior / (1.0 - prior)).ln();

        // Row order per feature never changes between rounds
        let sorted: Vec<Vec<usize>> = (0..n_features)
            .map(|f| {
                let mut order: Vec<usize> = (0..n).collect();
                order.sort_by(|&a, &b| features[a].as_ref()[f].total_cmp(&features[b].as_ref()[f]));
                order
            })
            .collect();

        let mut logits = vec![base_logit; n];
        let mut stumps = Vec::with_capacity(config.n_estimators);

        for round in 0..config.n_estimators {
            let probs: Vec<f64> = logits.iter().map(|&z| sigmoid(z)).collect();
            let grad: Vec<f64> = targets.iter().zip(&probs).map(|(y, p)| y - p).collect();
            let hess: Vec<f64> = probs.iter().map(|p| p * (1.0 - p)).collect();

            let Some(stump) = best_stump(features, &sorted, &grad, &hess, config) else {
                log::debug!("Classifier converged after {} rounds", round);
                break;
            };

            for (logit, row) in logits.iter_mut().zip(features) {
                *logit += config.learning_rate * stump.predict(row.as_ref());
            }
            stumps.push(stump);
        }

        Some(Self {
            base_logit,
            learning_rate: config.learning_rate,
            stumps,
            n_features,
        })
    }

    /// Probability of the attack class
    pub fn predict_proba(&self, x: &[f64]) -> f64 {
        let logit = self.base_logit
            + self.learning_rate * self.stumps.iter().map(|s| s.predict(x)).sum::<f64>();
        sigmoid(logit)
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn num_stumps(&self) -> usize {
        self.stumps.len()
    }
}

impl AnomalyDetector for GradientBoostClassifier {
    fn name(&self) -> &'static str {
        "gradient_boost"
    }

    fn score(&self, features: &[f64]) -> Result<f64, DetectorError> {
        check_dimension(self.name(), self.n_features, features)?;
        Ok(self.predict_proba(features))
    }
}

fn best_stump<R: AsRef<[f64]>>(
    features: &[R],
    sorted: &[Vec<usize>],
    grad: &[f64],
    hess: &[f64],
    config: &BoostConfig,
) -> Option<Stump> {
    let n = grad.len();
    let lambda = config.lambda;
    let g_total: f64 = grad.iter().sum();
    let h_total: f64 = hess.iter().sum();
    let parent = g_total * g_total / (h_total + lambda);
    let min_leaf = config.min_samples_leaf.max(1);

    let mut best_gain = 1e-12;
    let mut best: Option<Stump> = None;

    for (feature_idx, order) in sorted.iter().enumerate() {
        let value = |row: usize| features[row].as_ref()[feature_idx];
        let (mut g_left, mut h_left) = (0.0, 0.0);

        for k in 0..n.saturating_sub(1) {
            let row = order[k];
            g_left += grad[row];
            h_left += hess[row];

            let here = value(row);
            let next = value(order[k + 1]);
            let n_left = k + 1;
            if here == next || n_left < min_leaf || n - n_left < min_leaf {
                continue;
            }

            let g_right = g_total - g_left;
            let h_right = h_total - h_left;
            let gain = g_left * g_left / (h_left + lambda) + g_right * g_right / (h_right + lambda) - parent;

            if gain > best_gain {
                best_gain = gain;
                best = Some(Stump {
                    feature_idx,
                    threshold: here + (next - here) / 2.0,
                    left_value: g_left / (h_left + lambda),
                    right_value: g_right / (h_right + lambda),
                });
            }
        }
    }

    best
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separable() -> (Vec<Vec<f64>>, Vec<u8>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..40 {
            let jitter = (i % 7) as f64 / 100.0;
            x.push(vec![0.1 + jitter, 0.5]);
            y.push(0);
            x.push(vec![0.8 + jitter, 0.5]);
            y.push(1);
        }
        (x, y)
    }

    #[test]
    fn test_learns_separable_split() {
        let (x, y) = separable();
        let clf = GradientBoostClassifier::fit(&x, &y, &BoostConfig::default()).unwrap();
        assert!(clf.num_stumps() > 0);
        assert!(clf.predict_proba(&[0.12, 0.5]) < 0.2);
        assert!(clf.predict_proba(&[0.85, 0.5]) > 0.8);
    }

    #[test]
    fn test_single_class_is_not_trained() {
        let x = vec![vec![0.1], vec![0.2], vec![0.3]];
        assert!(GradientBoostClassifier::fit(&x, &[0, 0, 0], &BoostConfig::default()).is_none());
        assert!(GradientBoostClassifier::fit(&x, &[1, 1, 1], &BoostConfig::default()).is_none());
    }

    #[test]
    fn test_probabilities_in_unit_range() {
        let (x, y) = separable();
        let clf = GradientBoostClassifier::fit(&x, &y, &BoostConfig::default()).unwrap();
        for probe in [[-100.0, 0.0], [100.0, 1.0], [0.45, 0.5]] {
            let p = clf.score(&probe).unwrap();
            assert!((0.0..=1.0).contains(&p));
        }
        assert!(clf.score(&[0.1]).is_err());
    }

    #[test]
    fn test_fit_is_deterministic() {
        let (x, y) = separable();
        let a = GradientBoostClassifier::fit(&x, &y, &BoostConfig::default());
        let b = GradientBoostClassifier::fit(&x, &y, &BoostConfig::default());
        assert_eq!(a, b);
    }
}
