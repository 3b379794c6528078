//! Flow Module - Engine input contract
//!
//! `FlowRecord` is what transports hand to the engine; `FlowKey` is the
//! 5-tuple used for per-flow rate state and training-time grouping.

pub mod key;
pub mod record;

pub use key::FlowKey;
pub use record::{normalize_protocol, FlowRecord};
