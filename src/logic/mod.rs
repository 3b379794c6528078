//! Logic Module - Scoring & Training Engines
//!
//! ## Layout
//! - `flow/` - Engine input contract (flow record, flow key)
//! - `features/` - Encoding, rate deltas, normalization
//! - `model/` - Detectors, fusion, threshold, inference engine
//! - `artifacts/` - Bundle persistence and calibration metadata
//! - `dataset/` - Labeled training tables
//! - `training` - Offline fit + calibration
//! - `sink` - Scored-flow persistence hand-off

pub mod config;
pub mod sink;
pub mod training;

pub mod artifacts;
pub mod dataset;
pub mod features;
pub mod flow;
pub mod model;
