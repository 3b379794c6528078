//! Categorical Encoder
//!
//! Maps unbounded string fields (addresses, protocol) to dense integer codes.
//! Codes follow sorted order of the distinct training values, so refitting on
//! the same input always reproduces the same mapping. Values never seen during
//! fitting encode to `UNSEEN_CATEGORY`; that is an expected inference-time
//! condition, not an error.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::constants::UNSEEN_CATEGORY;
use super::layout::CATEGORICAL_COLUMNS;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoricalEncoder {
    /// Sorted distinct values; code = position
    classes: Vec<String>,
}

impl CategoricalEncoder {
    pub fn fit<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let distinct: BTreeSet<String> = values
            .into_iter()
            .map(|v| v.as_ref().to_string())
            .collect();

        Self {
            classes: distinct.into_iter().collect(),
        }
    }

    /// Learned code, or `UNSEEN_CATEGORY`
    pub fn encode(&self, value: &str) -> i64 {
        match self.classes.binary_search_by(|c| c.as_str().cmp(value)) {
            Ok(idx) => idx as i64,
            Err(_) => UNSEEN_CATEGORY,
        }
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

/// One encoder per categorical column
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncoderSet {
    encoders: BTreeMap<String, CategoricalEncoder>,
}

impl EncoderSet {
    /// Fit every categorical column; `value_of` extracts a column from a row
    pub fn fit<'a, T: 'a, F>(rows: &'a [T], value_of: F) -> Self
    where
        F: Fn(&'a T, &str) -> &'a str,
    {
        let encoders = CATEGORICAL_COLUMNS
            .iter()
            .map(|&column| {
                let encoder = CategoricalEncoder::fit(rows.iter().map(|r| value_of(r, column)));
                log::debug!("Fitted encoder '{}' with {} classes", column, encoder.len());
                (column.to_string(), encoder)
            })
            .collect();

        Self { encoders }
    }

    pub fn insert(&mut self, column: impl Into<String>, encoder: CategoricalEncoder) {
        self.encoders.insert(column.into(), encoder);
    }

    pub fn get(&self, column: &str) -> Option<&CategoricalEncoder> {
        self.encoders.get(column)
    }

    /// Encode a column value; a column without an encoder behaves as unseen
    pub fn encode(&self, column: &str, value: &str) -> i64 {
        self.encoders
            .get(column)
            .map(|e| e.encode(value))
            .unwrap_or(UNSEEN_CATEGORY)
    }

    /// Categorical columns with no fitted encoder
    pub fn missing_columns(&self) -> Vec<&'static str> {
        CATEGORICAL_COLUMNS
            .iter()
            .copied()
            .filter(|c| !self.encoders.contains_key(*c))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CategoricalEncoder)> {
        self.encoders.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_follow_sorted_order() {
        let encoder = CategoricalEncoder::fit(["UDP", "TCP", "ICMP", "TCP"]);
        assert_eq!(encoder.len(), 3);
        assert_eq!(encoder.encode("ICMP"), 0);
        assert_eq!(encoder.encode("TCP"), 1);
        assert_eq!(encoder.encode("UDP"), 2);
    }

    #[test]
    fn test_unseen_value_is_sentinel() {
        let encoder = CategoricalEncoder::fit(["10.0.0.1", "10.0.0.2"]);
        assert_eq!(encoder.encode("192.168.1.1"), UNSEEN_CATEGORY);
        assert_eq!(CategoricalEncoder::default().encode("anything"), UNSEEN_CATEGORY);
    }

    #[test]
    fn test_encode_is_stable_and_refit_reproducible() {
        let values = ["b", "a", "c", "a"];
        let first = CategoricalEncoder::fit(values);
        let second = CategoricalEncoder::fit(values.iter().rev());
        assert_eq!(first, second);
        for v in values {
            assert_eq!(first.encode(v), first.encode(v));
            assert_eq!(first.encode(v), second.encode(v));
        }
    }

    #[test]
    fn test_encoder_set_covers_categorical_columns() {
        let rows = vec![("10.0.0.1", "10.0.0.9", "TCP"), ("10.0.0.2", "10.0.0.9", "UDP")];
        let set = EncoderSet::fit(&rows, |r, column| match column {
            "src_ip" => r.0,
            "dst_ip" => r.1,
            _ => r.2,
        });
        assert!(set.missing_columns().is_empty());
        assert_eq!(set.encode("src_ip", "10.0.0.2"), 1);
        assert_eq!(set.encode("dst_ip", "10.0.0.9"), 0);
        assert_eq!(set.encode("proto", "ICMP"), UNSEEN_CATEGORY);
        assert_eq!(set.encode("unknown_column", "x"), UNSEEN_CATEGORY);
    }
}
