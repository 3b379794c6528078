//! Central Configuration Constants
//!
//! Single source of truth for all configuration defaults.
//! Env getters fall back to these values when a variable is unset or unparseable.

use std::path::PathBuf;

/// App name (also the data directory name)
pub const APP_NAME: &str = "safeon";

/// App version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default anomaly decision threshold on the hybrid score
pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// Contribution of a detector that is absent or not ready
pub const NEUTRAL_SCORE: f64 = 0.5;

/// Code returned for categorical values never seen during fitting
pub const UNSEEN_CATEGORY: i64 = -1;

/// Decision-score spans narrower than this are treated as degenerate
pub const SPAN_EPSILON: f64 = 1e-9;

/// Width added to a degenerate span before it is persisted
pub const SPAN_WIDEN: f64 = 1e-6;

/// Multiplier applied to reconstruction MSE before clamping to [0, 1]
pub const RECONSTRUCTION_SCORE_SCALE: f64 = 10.0;

/// Sequence window length for the reconstruction detector
pub const DEFAULT_SEQUENCE_LENGTH: usize = 5;

/// Reconstruction network training epochs
pub const DEFAULT_EPOCHS: usize = 16;

/// Reconstruction network mini-batch size
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Maximum number of flow keys kept by the rate-delta tracker
pub const DEFAULT_RATE_CACHE_CAPACITY: usize = 65_536;

/// Isolation forest size
pub const DEFAULT_ISO_TREES: usize = 100;

/// Isolation forest sub-sample size per tree
pub const DEFAULT_ISO_SAMPLE_SIZE: usize = 256;

/// Seed for every randomized training step
pub const DEFAULT_SEED: u64 = 42;

// ============================================
// Helper functions to read from env with fallback
// ============================================

/// Default artifact directory: `<data_local_dir>/safeon/models`
pub fn default_model_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
        .join("models")
}

/// Get artifact directory from environment or use default
pub fn get_model_dir() -> PathBuf {
    std::env::var("MODEL_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_model_dir())
}

/// Get an optional path from environment (empty values count as unset)
pub fn get_optional_path(var: &str) -> Option<PathBuf> {
    std::env::var(var)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
}

/// Read a boolean flag; anything except `false`/`0` counts as enabled
pub fn get_flag(var: &str, default: bool) -> bool {
    std::env::var(var)
        .map(|s| {
            let s = s.trim().to_lowercase();
            s != "false" && s != "0"
        })
        .unwrap_or(default)
}

/// Parse a value from environment or use default
pub fn get_parsed<T: std::str::FromStr>(var: &str, default: T) -> T {
    std::env::var(var)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

/// Parse an optional value from environment
pub fn get_optional<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|s| s.trim().parse().ok())
}
