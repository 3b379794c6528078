//! Feature Vector - Core data structure for model input
//!
//! Uses the centralized layout from `layout.rs`, so every producer writes
//! columns by name and consumers read them by position.

use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::logic::flow::FlowRecord;
use super::encoder::EncoderSet;
use super::layout::{feature_index, layout_hash, FEATURE_COUNT, FEATURE_LAYOUT, FEATURE_VERSION};
use super::normalizer::RangeNormalizer;
use super::rate::{RateDeltaTracker, RateDeltas};

// ============================================================================
// VERSIONED FEATURE VECTOR
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub version: u8,
    pub layout_hash: u32,
    /// Values in order defined by FEATURE_LAYOUT
    pub values: [f64; FEATURE_COUNT],
}

impl FeatureVector {
    /// Zeroed vector with current version
    pub fn new() -> Self {
        Self {
            version: FEATURE_VERSION,
            layout_hash: layout_hash(),
            values: [0.0; FEATURE_COUNT],
        }
    }

    /// Encoded (not yet normalized) features of one flow sighting
    pub fn from_flow(flow: &FlowRecord, encoders: &EncoderSet, deltas: &RateDeltas) -> Self {
        let mut vector = Self::new();
        let extractors: [&dyn FeatureExtractor; 2] = [&FlowExtractor { flow, encoders }, deltas];
        for extractor in extractors {
            extractor.extract(&mut vector);
        }
        vector
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<f64> {
        self.values.get(index).copied()
    }

    pub fn get_by_name(&self, name: &str) -> Option<f64> {
        feature_index(name).and_then(|i| self.get(i))
    }

    pub fn set_by_name(&mut self, name: &str, value: f64) -> bool {
        match feature_index(name) {
            Some(index) => {
                self.values[index] = value;
                true
            }
            None => false,
        }
    }

    /// Named view for logging
    pub fn to_log_entry(&self) -> serde_json::Value {
        serde_json::json!({
            "feature_version": self.version,
            "layout_hash": self.layout_hash,
            "named_values": FEATURE_LAYOUT.iter()
                .zip(self.values.iter())
                .map(|(name, value)| (name.to_string(), *value))
                .collect::<std::collections::BTreeMap<_, _>>(),
        })
    }
}

impl Default for FeatureVector {
    fn default() -> Self {
        Self::new()
    }
}

impl AsRef<[f64]> for FeatureVector {
    fn as_ref(&self) -> &[f64] {
        &self.values
    }
}

// ============================================================================
// FEATURE EXTRACTOR TRAIT
// ============================================================================

/// Writes its columns into a vector
pub trait FeatureExtractor {
    fn extract(&self, vector: &mut FeatureVector);
}

/// Identity, volume and rate columns of a flow
struct FlowExtractor<'a> {
    flow: &'a FlowRecord,
    encoders: &'a EncoderSet,
}

impl FeatureExtractor for FlowExtractor<'_> {
    fn extract(&self, vector: &mut FeatureVector) {
        let flow = self.flow;
        vector.set_by_name("src_ip", self.encoders.encode("src_ip", &flow.src_ip) as f64);
        vector.set_by_name("dst_ip", self.encoders.encode("dst_ip", &flow.dst_ip) as f64);
        vector.set_by_name("src_port", flow.src_port as f64);
        vector.set_by_name("dst_port", flow.dst_port as f64);
        vector.set_by_name("proto", self.encoders.encode("proto", &flow.proto) as f64);
        vector.set_by_name("packet_count", flow.packet_count as f64);
        vector.set_by_name("byte_count", flow.byte_count as f64);
        vector.set_by_name("duration", flow.effective_duration());
        vector.set_by_name("pps", flow.pps);
        vector.set_by_name("bps", flow.bps);
    }
}

impl FeatureExtractor for RateDeltas {
    fn extract(&self, vector: &mut FeatureVector) {
        vector.set_by_name("pps_delta", self.pps_delta);
        vector.set_by_name("bps_delta", self.bps_delta);
        vector.set_by_name("pps_cum_increase", self.pps_cum_increase);
        vector.set_by_name("bps_cum_increase", self.bps_cum_increase);
    }
}

// ============================================================================
// PIPELINE
// ============================================================================

/// Fitted transforms applied in order: encode, delta, normalize
#[derive(Debug, Clone, Copy)]
pub struct FeaturePipeline<'a> {
    pub encoders: &'a EncoderSet,
    pub normalizer: &'a RangeNormalizer,
}

impl<'a> FeaturePipeline<'a> {
    pub fn new(encoders: &'a EncoderSet, normalizer: &'a RangeNormalizer) -> Self {
        Self { encoders, normalizer }
    }

    /// Encoded vector for a flow whose deltas are already known
    pub fn encode(&self, flow: &FlowRecord, deltas: &RateDeltas) -> FeatureVector {
        FeatureVector::from_flow(flow, self.encoders, deltas)
    }

    /// Normalized input for the detectors; updates the tracker's state for this key
    pub fn transform(&self, flow: &FlowRecord, tracker: &RateDeltaTracker) -> EngineResult<Vec<f64>> {
        let deltas = tracker.observe_flow(flow);
        self.normalizer.transform(self.encode(flow, &deltas).as_slice())
    }
}
