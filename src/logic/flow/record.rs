//! Flow Record - Per-flow traffic summary (engine input)

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{EngineError, EngineResult};
use super::key::FlowKey;

/// Structured network flow summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRecord {
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: u16,
    pub dst_port: u16,
    /// Transport protocol token, upper-cased on ingestion
    pub proto: String,
    pub packet_count: u64,
    pub byte_count: u64,
    /// Reported duration in seconds (backfilled from timestamps when absent)
    #[serde(default)]
    pub duration: Option<f64>,
    pub pps: f64,
    pub bps: f64,
    /// Flow start (epoch seconds)
    #[serde(default)]
    pub start_time: Option<f64>,
    /// Flow end (epoch seconds)
    #[serde(default)]
    pub end_time: Option<f64>,

    // Externally windowed accounting; replaces local estimation when present
    #[serde(default, deserialize_with = "lenient_number")]
    pub pps_delta: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub bps_delta: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub pps_cum_increase: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub bps_cum_increase: Option<f64>,
}

impl FlowRecord {
    /// Minimal record; everything optional left unset
    pub fn new(
        src_ip: impl Into<String>,
        dst_ip: impl Into<String>,
        src_port: u16,
        dst_port: u16,
        proto: impl Into<String>,
    ) -> Self {
        Self {
            src_ip: src_ip.into(),
            dst_ip: dst_ip.into(),
            src_port,
            dst_port,
            proto: proto.into(),
            packet_count: 0,
            byte_count: 0,
            duration: None,
            pps: 0.0,
            bps: 0.0,
            start_time: None,
            end_time: None,
            pps_delta: None,
            bps_delta: None,
            pps_cum_increase: None,
            bps_cum_increase: None,
        }
    }

    pub fn with_counts(mut self, packet_count: u64, byte_count: u64) -> Self {
        self.packet_count = packet_count;
        self.byte_count = byte_count;
        self
    }

    pub fn with_rates(mut self, pps: f64, bps: f64) -> Self {
        self.pps = pps;
        self.bps = bps;
        self
    }

    pub fn with_times(mut self, start_time: Option<f64>, end_time: Option<f64>) -> Self {
        self.start_time = start_time;
        self.end_time = end_time;
        self
    }

    pub fn with_duration(mut self, duration: f64) -> Self {
        self.duration = Some(duration);
        self
    }

    /// 5-tuple identity for rate-state lookups
    pub fn key(&self) -> FlowKey {
        FlowKey::from(self)
    }

    /// Non-negative duration: reported value, else `end - start`, else 0
    pub fn effective_duration(&self) -> f64 {
        if let Some(d) = self.duration.filter(|d| d.is_finite() && *d >= 0.0) {
            return d;
        }
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) if end.is_finite() && start.is_finite() && end >= start => end - start,
            _ => 0.0,
        }
    }

    /// Check value constraints
    pub fn validate(&self) -> EngineResult<()> {
        if self.src_ip.trim().is_empty() || self.dst_ip.trim().is_empty() {
            return Err(EngineError::schema("src_ip and dst_ip are required"));
        }
        if self.proto.trim().is_empty() {
            return Err(EngineError::schema("proto is required"));
        }
        for (name, value) in [("pps", self.pps), ("bps", self.bps)] {
            if !value.is_finite() || value < 0.0 {
                return Err(EngineError::schema(format!("{} must be a finite value >= 0, got {}", name, value)));
            }
        }
        if let Some(d) = self.duration {
            if d.is_nan() || d < 0.0 {
                return Err(EngineError::schema(format!("duration must be >= 0, got {}", d)));
            }
        }
        Ok(())
    }

    /// Validate, canonicalize protocol case and backfill duration
    pub fn normalized(mut self) -> EngineResult<Self> {
        self.validate()?;
        self.src_ip = self.src_ip.trim().to_string();
        self.dst_ip = self.dst_ip.trim().to_string();
        self.proto = normalize_protocol(&self.proto);
        self.duration = Some(self.effective_duration());
        Ok(self)
    }
}

/// Canonical protocol token (upper-case, trimmed)
pub fn normalize_protocol(proto: &str) -> String {
    proto.trim().to_uppercase()
}

/// Parse an optional override: numbers or numeric strings, anything else is absent
pub fn parse_override(value: &serde_json::Value) -> Option<f64> {
    let parsed = match value {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(parse_override))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FlowRecord {
        FlowRecord::new("10.0.0.2", "10.0.0.1", 51514, 443, "tcp")
            .with_counts(12, 4800)
            .with_rates(6.0, 2400.0)
    }

    #[test]
    fn test_protocol_uppercased() {
        let flow = sample().normalized().unwrap();
        assert_eq!(flow.proto, "TCP");
    }

    #[test]
    fn test_duration_backfilled_from_timestamps() {
        let flow = sample().with_times(Some(100.0), Some(102.5)).normalized().unwrap();
        assert_eq!(flow.duration, Some(2.5));
    }

    #[test]
    fn test_duration_zero_when_timestamps_inverted() {
        let flow = sample().with_times(Some(105.0), Some(100.0)).normalized().unwrap();
        assert_eq!(flow.duration, Some(0.0));

        let flow = sample().with_times(Some(105.0), None).normalized().unwrap();
        assert_eq!(flow.duration, Some(0.0));
    }

    #[test]
    fn test_reported_duration_kept() {
        let flow = sample()
            .with_duration(7.0)
            .with_times(Some(0.0), Some(1.0))
            .normalized()
            .unwrap();
        assert_eq!(flow.duration, Some(7.0));
    }

    #[test]
    fn test_negative_rate_rejected() {
        let err = sample().with_rates(-1.0, 0.0).normalized().unwrap_err();
        assert!(err.is_rejection());
    }

    #[test]
    fn test_lenient_overrides() {
        let json = r#"{
            "src_ip": "10.0.0.2", "dst_ip": "10.0.0.1",
            "src_port": 1000, "dst_port": 53, "proto": "udp",
            "packet_count": 1, "byte_count": 60, "pps": 1.0, "bps": 60.0,
            "pps_delta": "4.5", "bps_delta": null,
            "pps_cum_increase": "n/a", "bps_cum_increase": 12
        }"#;
        let flow: FlowRecord = serde_json::from_str(json).unwrap();
        assert_eq!(flow.pps_delta, Some(4.5));
        assert_eq!(flow.bps_delta, None);
        assert_eq!(flow.pps_cum_increase, None);
        assert_eq!(flow.bps_cum_increase, Some(12.0));
    }

    #[test]
    fn test_port_out_of_range_rejected_by_schema() {
        let json = r#"{
            "src_ip": "a", "dst_ip": "b", "src_port": 70000, "dst_port": 1,
            "proto": "tcp", "packet_count": 1, "byte_count": 1, "pps": 0, "bps": 0
        }"#;
        assert!(serde_json::from_str::<FlowRecord>(json).is_err());
    }
}
