use std::fmt;

use serde::{Deserialize, Serialize};

use super::record::{normalize_protocol, FlowRecord};

/// 5-tuple flow identity
///
/// Only unique within one process lifetime; rate state is not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FlowKey {
    pub src_ip: String,
    pub dst_ip: String,
    pub src_port: u16,
    pub dst_port: u16,
    pub proto: String,
}

impl From<&FlowRecord> for FlowKey {
    fn from(flow: &FlowRecord) -> Self {
        Self {
            src_ip: flow.src_ip.trim().to_string(),
            dst_ip: flow.dst_ip.trim().to_string(),
            src_port: flow.src_port,
            dst_port: flow.dst_port,
            proto: normalize_protocol(&flow.proto),
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{}/{}",
            self.src_ip, self.src_port, self.dst_ip, self.dst_port, self.proto
        )
    }
}
