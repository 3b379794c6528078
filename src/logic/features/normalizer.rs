//! Range Normalizer
//!
//! Min-max scaling per column, fitted on normal-class rows only so scaled
//! values measure deviation from baseline traffic. Rate columns go through
//! `log1p` first, identically at fit and transform time. Values outside the
//! fitted range are not clamped.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeNormalizer {
    pub min_vals: Vec<f64>,
    pub max_vals: Vec<f64>,
    /// Column positions passed through `log1p` before scaling
    pub log_scaled: Vec<usize>,
}

impl RangeNormalizer {
    /// Fit bounds on (already encoded) normal-class rows
    pub fn fit<R: AsRef<[f64]>>(rows: &[R], log_scaled: &[usize]) -> EngineResult<Self> {
        let first = rows
            .first()
            .ok_or_else(|| EngineError::schema("cannot fit normalizer on an empty feature set"))?;
        let dim = first.as_ref().len();
        if dim == 0 {
            return Err(EngineError::schema("cannot fit normalizer on zero-width rows"));
        }

        let mut min_vals = vec![f64::INFINITY; dim];
        let mut max_vals = vec![f64::NEG_INFINITY; dim];

        for row in rows {
            let row = row.as_ref();
            if row.len() != dim {
                return Err(EngineError::schema(format!(
                    "ragged feature rows: expected {} columns, got {}",
                    dim,
                    row.len()
                )));
            }
            for (i, &raw) in row.iter().enumerate() {
                let v = prepare(raw, log_scaled.contains(&i));
                min_vals[i] = min_vals[i].min(v);
                max_vals[i] = max_vals[i].max(v);
            }
        }

        Ok(Self {
            min_vals,
            max_vals,
            log_scaled: log_scaled.to_vec(),
        })
    }

    pub fn dim(&self) -> usize {
        self.min_vals.len()
    }

    /// Scale one row into the fitted space
    pub fn transform(&self, row: &[f64]) -> EngineResult<Vec<f64>> {
        if row.len() != self.dim() {
            return Err(EngineError::schema(format!(
                "normalizer expects {} columns, got {}",
                self.dim(),
                row.len()
            )));
        }

        Ok(row
            .iter()
            .enumerate()
            .map(|(i, &raw)| {
                let v = prepare(raw, self.log_scaled.contains(&i));
                let min = self.min_vals[i];
                let range = self.max_vals[i] - min;
                // Constant column: shift only
                let range = if range.abs() <= f64::EPSILON { 1.0 } else { range };
                (v - min) / range
            })
            .collect())
    }

    /// Bounds are finite and ordered
    pub fn is_valid(&self) -> bool {
        self.min_vals.len() == self.max_vals.len()
            && self
                .min_vals
                .iter()
                .zip(&self.max_vals)
                .all(|(lo, hi)| lo.is_finite() && hi.is_finite() && lo <= hi)
            && self.log_scaled.iter().all(|&i| i < self.min_vals.len())
    }
}

fn prepare(value: f64, log_scaled: bool) -> f64 {
    if log_scaled {
        value.max(0.0).ln_1p()
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_and_transform_maps_into_unit_range() {
        let rows = vec![vec![0.0, 10.0], vec![5.0, 20.0], vec![10.0, 30.0]];
        let norm = RangeNormalizer::fit(&rows, &[]).unwrap();
        assert_eq!(norm.transform(&[5.0, 10.0]).unwrap(), vec![0.5, 0.0]);
        assert_eq!(norm.transform(&[10.0, 30.0]).unwrap(), vec![1.0, 1.0]);
    }

    #[test]
    fn test_out_of_range_not_clamped() {
        let rows = vec![vec![0.0], vec![10.0]];
        let norm = RangeNormalizer::fit(&rows, &[]).unwrap();
        assert_eq!(norm.transform(&[20.0]).unwrap(), vec![2.0]);
        assert_eq!(norm.transform(&[-10.0]).unwrap(), vec![-1.0]);
    }

    #[test]
    fn test_log_scaled_columns() {
        let e = std::f64::consts::E;
        let rows = vec![vec![0.0, 0.0], vec![e - 1.0, 100.0]];
        let norm = RangeNormalizer::fit(&rows, &[0]).unwrap();
        assert!((norm.max_vals[0] - 1.0).abs() < 1e-12);
        assert_eq!(norm.max_vals[1], 100.0);
        let out = norm.transform(&[e - 1.0, 50.0]).unwrap();
        assert!((out[0] - 1.0).abs() < 1e-12);
        assert_eq!(out[1], 0.5);
    }

    #[test]
    fn test_constant_column_does_not_divide_by_zero() {
        let rows = vec![vec![3.0], vec![3.0]];
        let norm = RangeNormalizer::fit(&rows, &[]).unwrap();
        assert_eq!(norm.transform(&[3.0]).unwrap(), vec![0.0]);
        assert_eq!(norm.transform(&[4.0]).unwrap(), vec![1.0]);
    }

    #[test]
    fn test_empty_and_mismatched_input_rejected() {
        let empty: Vec<Vec<f64>> = Vec::new();
        assert!(RangeNormalizer::fit(&empty, &[]).is_err());

        let norm = RangeNormalizer::fit(&[vec![1.0, 2.0]], &[]).unwrap();
        assert!(norm.transform(&[1.0]).is_err());
        assert!(norm.is_valid());
    }
}
