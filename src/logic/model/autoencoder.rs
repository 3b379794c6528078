//! Sequence Autoencoder - Reconstruction Detector
//!
//! Bottleneck network over a flattened window of normalized vectors.
//! Architecture: (seq_len * n_features) -> hidden (tanh) -> (seq_len * n_features)
//!
//! Trained with mini-batch SGD on windows drawn from normal traffic only.
//! Score = mean squared reconstruction error * scale, clamped to [0, 1].

use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_BATCH_SIZE, DEFAULT_EPOCHS, DEFAULT_SEED, DEFAULT_SEQUENCE_LENGTH, RECONSTRUCTION_SCORE_SCALE};
use super::detector::{check_dimension, AnomalyDetector, DetectorError};

/// Autoencoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoencoderConfig {
    /// Vectors per window
    pub sequence_length: usize,
    /// Bottleneck width
    pub hidden_dim: usize,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub epochs: usize,
    pub seed: u64,
}

impl Default for AutoencoderConfig {
    fn default() -> Self {
        Self {
            sequence_length: DEFAULT_SEQUENCE_LENGTH,
            hidden_dim: 8,
            learning_rate: 0.01,
            batch_size: DEFAULT_BATCH_SIZE,
            epochs: DEFAULT_EPOCHS,
            seed: DEFAULT_SEED,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceAutoencoder {
    sequence_length: usize,
    input_dim: usize,
    /// Encoder weights (hidden x input)
    w1: Array2<f64>,
    b1: Array1<f64>,
    /// Decoder weights (input x hidden)
    w2: Array2<f64>,
    b2: Array1<f64>,
    /// Mean training loss of the last epoch
    final_loss: f64,
}

impl SequenceAutoencoder {
    /// Fit on flattened normal windows; `None` if there is nothing to learn from
    pub fn fit(windows: &[Vec<f64>], config: &AutoencoderConfig) -> Option<Self> {
        let input_dim = windows.first()?.len();
        if input_dim == 0 || config.sequence_length == 0 {
            return None;
        }
        let windows: Vec<&Vec<f64>> = windows.iter().filter(|w| w.len() == input_dim).collect();

        let hidden = config.hidden_dim.clamp(1, input_dim);
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut model = Self {
            sequence_length: config.sequence_length,
            input_dim,
            w1: xavier(hidden, input_dim, &mut rng),
            b1: Array1::zeros(hidden),
            w2: xavier(input_dim, hidden, &mut rng),
            b2: Array1::zeros(input_dim),
            final_loss: f64::NAN,
        };

        let batch_size = config.batch_size.max(1);
        let mut order: Vec<usize> = (0..windows.len()).collect();

        for epoch in 0..config.epochs.max(1) {
            order.shuffle(&mut rng);
            let mut total = 0.0;

            for chunk in order.chunks(batch_size) {
                let batch = Array2::from_shape_fn((chunk.len(), input_dim), |(i, j)| windows[chunk[i]][j]);
                total += model.train_batch(&batch, config.learning_rate) * chunk.len() as f64;
            }

            model.final_loss = total / windows.len() as f64;
            log::debug!("Autoencoder epoch {}/{} loss={:.6}", epoch + 1, config.epochs, model.final_loss);
        }

        log::info!(
            "Autoencoder trained on {} windows (dim {}, hidden {}), loss={:.6}",
            windows.len(),
            input_dim,
            hidden,
            model.final_loss
        );
        Some(model)
    }

    /// One SGD step; returns the batch MSE before the update
    fn train_batch(&mut self, x: &Array2<f64>, lr: f64) -> f64 {
        let n = x.nrows() as f64;

        // Forward
        let h = (x.dot(&self.w1.t()) + &self.b1).mapv(f64::tanh);
        let y = h.dot(&self.w2.t()) + &self.b2;
        let diff = &y - x;
        let loss = diff.mapv(|v| v * v).mean().unwrap_or(0.0);

        // Backward (per-sample summed squared error)
        let dy = diff * (2.0 / n);
        let dw2 = dy.t().dot(&h);
        let db2 = dy.sum_axis(Axis(0));
        let dh = dy.dot(&self.w2);
        let dz = dh * h.mapv(|v| 1.0 - v * v);
        let dw1 = dz.t().dot(x);
        let db1 = dz.sum_axis(Axis(0));

        self.w2.scaled_add(-lr, &dw2);
        self.b2.scaled_add(-lr, &db2);
        self.w1.scaled_add(-lr, &dw1);
        self.b1.scaled_add(-lr, &db1);

        loss
    }

    pub fn reconstruct(&self, window: &[f64]) -> Array1<f64> {
        let x = Array1::from(window.to_vec());
        let h = (self.w1.dot(&x) + &self.b1).mapv(f64::tanh);
        self.w2.dot(&h) + &self.b2
    }

    /// Mean squared reconstruction error
    pub fn reconstruction_error(&self, window: &[f64]) -> f64 {
        let y = self.reconstruct(window);
        let n = window.len().max(1) as f64;
        window.iter().zip(y.iter()).map(|(a, b)| (a - b).powi(2)).sum::<f64>() / n
    }

    pub fn sequence_length(&self) -> usize {
        self.sequence_length
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn final_loss(&self) -> f64 {
        self.final_loss
    }
}

impl AnomalyDetector for SequenceAutoencoder {
    fn name(&self) -> &'static str {
        "sequence_autoencoder"
    }

    fn score(&self, window: &[f64]) -> Result<f64, DetectorError> {
        check_dimension(self.name(), self.input_dim, window)?;
        Ok((self.reconstruction_error(window) * RECONSTRUCTION_SCORE_SCALE).clamp(0.0, 1.0))
    }
}

fn xavier<R: Rng>(rows: usize, cols: usize, rng: &mut R) -> Array2<f64> {
    let limit = (6.0 / (rows + cols) as f64).sqrt();
    Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-limit..limit))
}
