//! Labeled training row and per-field parsing

use std::collections::HashMap;

use csv::StringRecord;
use serde::{Deserialize, Serialize};

use crate::logic::flow::{FlowRecord, normalize_protocol};
use crate::logic::flow::record::parse_override;

/// Columns every table must carry
pub const REQUIRED_COLUMNS: &[&str] = &[
    "src_ip",
    "dst_ip",
    "src_port",
    "dst_port",
    "proto",
    "packet_count",
    "byte_count",
    "pps",
    "bps",
];

pub const LABEL_COLUMN: &str = "label";

pub const LABEL_NORMAL: u8 = 0;
pub const LABEL_ATTACK: u8 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledFlow {
    pub flow: FlowRecord,
    /// 0 = normal, 1 = attack
    pub label: u8,
}

impl LabeledFlow {
    pub fn is_attack(&self) -> bool {
        self.label == LABEL_ATTACK
    }
}

/// Field lookup over one CSV row by (lower-cased) header name
pub(crate) struct RowView<'a> {
    pub(crate) record: &'a StringRecord,
    pub(crate) index: &'a HashMap<String, usize>,
}

impl<'a> RowView<'a> {
    fn text(&self, column: &str) -> Option<&'a str> {
        let record: &'a StringRecord = self.record;
        self.index
            .get(column)
            .and_then(|&i| record.get(i))
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    fn number(&self, column: &str) -> Option<f64> {
        self.text(column)?.parse::<f64>().ok().filter(|v| v.is_finite())
    }

    fn count(&self, column: &str) -> Option<u64> {
        self.number(column).filter(|v| *v >= 0.0).map(|v| v as u64)
    }

    fn port(&self, column: &str) -> Option<u16> {
        self.number(column)
            .filter(|v| (0.0..=u16::MAX as f64).contains(v) && v.fract() == 0.0)
            .map(|v| v as u16)
    }

    fn override_value(&self, column: &str) -> Option<f64> {
        self.text(column)
            .and_then(|s| parse_override(&serde_json::Value::String(s.to_string())))
    }

    /// Build a flow, or `None` if any required field is missing or unparseable
    pub(crate) fn flow(&self) -> Option<FlowRecord> {
        let mut flow = FlowRecord::new(
            self.text("src_ip")?,
            self.text("dst_ip")?,
            self.port("src_port")?,
            self.port("dst_port")?,
            normalize_protocol(self.text("proto")?),
        )
        .with_counts(self.count("packet_count")?, self.count("byte_count")?)
        .with_rates(self.number("pps")?, self.number("bps")?)
        .with_times(self.number("start_time"), self.number("end_time"));

        flow.duration = self.number("duration");
        flow.pps_delta = self.override_value("pps_delta");
        flow.bps_delta = self.override_value("bps_delta");
        flow.pps_cum_increase = self.override_value("pps_cum_increase");
        flow.bps_cum_increase = self.override_value("bps_cum_increase");

        flow.normalized().ok()
    }

    pub(crate) fn label(&self) -> Option<u8> {
        parse_label(self.text(LABEL_COLUMN)?)
    }
}

/// Numeric labels: zero is normal, anything else is attack
pub fn parse_label(raw: &str) -> Option<u8> {
    let raw = raw.trim();
    if let Ok(v) = raw.parse::<f64>() {
        return v.is_finite().then_some(if v == 0.0 { LABEL_NORMAL } else { LABEL_ATTACK });
    }
    match raw.to_ascii_lowercase().as_str() {
        "normal" | "benign" | "safe" => Some(LABEL_NORMAL),
        "attack" | "anomaly" | "malicious" | "unsafe" => Some(LABEL_ATTACK),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_label() {
        assert_eq!(parse_label("0"), Some(0));
        assert_eq!(parse_label("1"), Some(1));
        assert_eq!(parse_label("2"), Some(1));
        assert_eq!(parse_label("0.0"), Some(0));
        assert_eq!(parse_label(" Benign "), Some(0));
        assert_eq!(parse_label("attack"), Some(1));
        assert_eq!(parse_label("maybe"), None);
    }
}
