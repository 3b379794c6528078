//! Feature Layout - Centralized Feature Definition
//!
//! **This file controls the feature schema.** Every fitted transform
//! (encoders, normalizer, detectors) assumes this positional order.
//!
//! ## Rules:
//! 1. Add, remove or reorder a column → increment FEATURE_VERSION
//! 2. Bundles record the layout hash; a mismatch refuses to load

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

// ============================================================================
// FEATURE VERSION
// ============================================================================

/// Current feature layout version
pub const FEATURE_VERSION: u8 = 1;

// ============================================================================
// FEATURE LAYOUT (Authoritative source)
// ============================================================================

/// Feature names in exact order they appear in the vector
pub const FEATURE_LAYOUT: &[&str] = &[
    // === Identity (0-4) ===
    "src_ip",           // 0: categorical code
    "dst_ip",           // 1: categorical code
    "src_port",         // 2
    "dst_port",         // 3
    "proto",            // 4: categorical code

    // === Volume (5-7) ===
    "packet_count",     // 5
    "byte_count",       // 6
    "duration",         // 7: seconds

    // === Rate (8-9), log1p before scaling ===
    "pps",              // 8
    "bps",              // 9

    // === Rate deltas (10-13) ===
    "pps_delta",        // 10: first difference vs previous sighting
    "bps_delta",        // 11
    "pps_cum_increase", // 12: running sum of positive deltas
    "bps_cum_increase", // 13
];

/// Total number of features
/// IMPORTANT: Must match FEATURE_LAYOUT.len()!
pub const FEATURE_COUNT: usize = 14;

/// Columns encoded by a `CategoricalEncoder`
pub const CATEGORICAL_COLUMNS: &[&str] = &["src_ip", "dst_ip", "proto"];

/// Heavy-tailed throughput columns passed through `log1p`
pub const LOG_SCALED_COLUMNS: &[&str] = &["pps", "bps"];

// ============================================================================
// LAYOUT HASH
// ============================================================================

/// CRC32 over version + ordered column names
pub fn compute_layout_hash<S: AsRef<str>>(columns: &[S]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(&[FEATURE_VERSION]);

    for name in columns {
        hasher.update(name.as_ref().as_bytes());
        hasher.update(&[0]); // Separator
    }

    hasher.finalize()
}

/// Hash of the compiled-in layout
pub fn layout_hash() -> u32 {
    compute_layout_hash(FEATURE_LAYOUT)
}

/// Owned copy of the layout, as written to bundle metadata
pub fn layout_columns() -> Vec<String> {
    FEATURE_LAYOUT.iter().map(|s| s.to_string()).collect()
}

/// Reject a column order that differs from the compiled-in layout
pub fn validate_columns<S: AsRef<str>>(columns: &[S]) -> EngineResult<()> {
    let expected = layout_hash();
    let actual = compute_layout_hash(columns);
    if expected != actual {
        return Err(EngineError::LayoutMismatch { expected, actual });
    }
    Ok(())
}

// ============================================================================
// LAYOUT INFO
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutInfo {
    pub version: u8,
    pub hash: u32,
    pub feature_count: usize,
    pub feature_names: Vec<String>,
}

impl LayoutInfo {
    pub fn current() -> Self {
        Self {
            version: FEATURE_VERSION,
            hash: layout_hash(),
            feature_count: FEATURE_COUNT,
            feature_names: layout_columns(),
        }
    }
}

// ============================================================================
// FEATURE INDEX LOOKUP
// ============================================================================

pub fn feature_index(name: &str) -> Option<usize> {
    FEATURE_LAYOUT.iter().position(|&n| n == name)
}

pub fn feature_name(index: usize) -> Option<&'static str> {
    FEATURE_LAYOUT.get(index).copied()
}

/// Positions of the log-scaled columns
pub fn log_scaled_indices() -> Vec<usize> {
    LOG_SCALED_COLUMNS.iter().filter_map(|c| feature_index(c)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_count() {
        assert_eq!(FEATURE_LAYOUT.len(), FEATURE_COUNT);
    }

    #[test]
    fn test_layout_hash_consistency() {
        assert_eq!(layout_hash(), compute_layout_hash(&layout_columns()));
        assert_ne!(layout_hash(), 0);
    }

    #[test]
    fn test_reordered_columns_rejected() {
        let mut columns = layout_columns();
        columns.swap(8, 9);
        match validate_columns(&columns) {
            Err(EngineError::LayoutMismatch { expected, actual }) => assert_ne!(expected, actual),
            other => panic!("expected layout mismatch, got {:?}", other),
        }
        assert!(validate_columns(&layout_columns()).is_ok());
    }

    #[test]
    fn test_feature_index() {
        assert_eq!(feature_index("src_ip"), Some(0));
        assert_eq!(feature_index("pps"), Some(8));
        assert_eq!(feature_index("bps_cum_increase"), Some(13));
        assert_eq!(feature_index("nonexistent"), None);
        assert_eq!(feature_name(4), Some("proto"));
        assert_eq!(feature_name(100), None);
    }

    #[test]
    fn test_special_columns_are_in_layout() {
        for c in CATEGORICAL_COLUMNS.iter().chain(LOG_SCALED_COLUMNS) {
            assert!(feature_index(c).is_some(), "{} missing from layout", c);
        }
        assert_eq!(log_scaled_indices(), vec![8, 9]);
    }

    #[test]
    fn test_layout_info() {
        let info = LayoutInfo::current();
        assert_eq!(info.version, FEATURE_VERSION);
        assert_eq!(info.feature_names.len(), FEATURE_COUNT);
    }
}
