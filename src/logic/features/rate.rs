//! Rate-Delta Tracker
//!
//! Per-flow memory of the last observed throughput. Each sighting of a key
//! produces a first difference and a clamped cumulative increase:
//!
//! ```text
//! Unseen  --first sighting-->  Tracked  (delta = 0, cum = 0)
//! Tracked --next sighting--->  Tracked  (delta = cur - prev, cum += max(0, delta))
//! ```
//!
//! Online state is an LRU cache split into shards: calls for keys in
//! different shards never contend, and the read-modify-write for one key
//! always runs under its shard lock. Offline passes over a whole table use
//! `RateLedger`, which never forgets a key.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::logic::flow::{FlowKey, FlowRecord};

const SHARD_COUNT: usize = 16;

/// Each shard holds this many times its even share of the capacity
const SHARD_HEADROOM: usize = 2;

/// Last throughput and running positive-delta sums for one flow key
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RateState {
    pub last_pps: f64,
    pub last_bps: f64,
    pub pps_cum_increase: f64,
    pub bps_cum_increase: f64,
}

/// Delta features emitted for one sighting
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RateDeltas {
    pub pps_delta: f64,
    pub bps_delta: f64,
    pub pps_cum_increase: f64,
    pub bps_cum_increase: f64,
}

/// Caller-supplied values that replace local estimation
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RateOverrides {
    pub pps_delta: Option<f64>,
    pub bps_delta: Option<f64>,
    pub pps_cum_increase: Option<f64>,
    pub bps_cum_increase: Option<f64>,
}

impl From<&FlowRecord> for RateOverrides {
    fn from(flow: &FlowRecord) -> Self {
        Self {
            pps_delta: flow.pps_delta,
            bps_delta: flow.bps_delta,
            pps_cum_increase: flow.pps_cum_increase,
            bps_cum_increase: flow.bps_cum_increase,
        }
    }
}

/// Apply one sighting to the previous state of its key
fn advance(previous: Option<RateState>, pps: f64, bps: f64, overrides: &RateOverrides) -> (RateDeltas, RateState) {
    let (pps_delta, bps_delta, pps_cum, bps_cum) = match previous {
        None => (0.0, 0.0, 0.0, 0.0),
        Some(prev) => {
            let dp = pps - prev.last_pps;
            let db = bps - prev.last_bps;
            (
                dp,
                db,
                prev.pps_cum_increase + dp.max(0.0),
                prev.bps_cum_increase + db.max(0.0),
            )
        }
    };

    let deltas = RateDeltas {
        pps_delta: overrides.pps_delta.unwrap_or(pps_delta),
        bps_delta: overrides.bps_delta.unwrap_or(bps_delta),
        pps_cum_increase: overrides.pps_cum_increase.map(|v| v.max(0.0)).unwrap_or(pps_cum),
        bps_cum_increase: overrides.bps_cum_increase.map(|v| v.max(0.0)).unwrap_or(bps_cum),
    };

    // Later sightings continue from whatever cumulative value was emitted
    let state = RateState {
        last_pps: pps,
        last_bps: bps,
        pps_cum_increase: deltas.pps_cum_increase,
        bps_cum_increase: deltas.bps_cum_increase,
    };
    (deltas, state)
}

pub struct RateDeltaTracker {
    shards: Vec<Mutex<LruCache<FlowKey, RateState>>>,
    capacity: usize,
}

impl RateDeltaTracker {
    /// `capacity` is the number of keys the tracker is expected to hold.
    /// Eviction is decided per shard, so each shard is sized with headroom
    /// over its even share and `capacity()` reports the resulting total.
    pub fn new(capacity: usize) -> Self {
        let share = capacity.div_ceil(SHARD_COUNT).max(1);
        let per_shard = NonZeroUsize::new(share * SHARD_HEADROOM).unwrap_or(NonZeroUsize::MIN);

        Self {
            shards: (0..SHARD_COUNT)
                .map(|_| Mutex::new(LruCache::new(per_shard)))
                .collect(),
            capacity: per_shard.get() * SHARD_COUNT,
        }
    }

    fn shard(&self, key: &FlowKey) -> &Mutex<LruCache<FlowKey, RateState>> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    /// Record a sighting and return its delta features
    pub fn observe(&self, key: FlowKey, pps: f64, bps: f64, overrides: &RateOverrides) -> RateDeltas {
        let mut cache = self.shard(&key).lock();
        let (deltas, state) = advance(cache.get(&key).copied(), pps, bps, overrides);
        cache.put(key, state);
        deltas
    }

    /// Observe a flow using its own key, rates and overrides
    pub fn observe_flow(&self, flow: &FlowRecord) -> RateDeltas {
        self.observe(flow.key(), flow.pps, flow.bps, &RateOverrides::from(flow))
    }

    /// Current state for a key without touching recency
    pub fn peek(&self, key: &FlowKey) -> Option<RateState> {
        self.shard(key).lock().peek(key).copied()
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            shard.lock().clear();
        }
    }
}

/// Unbounded per-key rate state for one pass over a table, in row order
#[derive(Debug, Default)]
pub struct RateLedger {
    states: HashMap<FlowKey, RateState>,
}

impl RateLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe_flow(&mut self, flow: &FlowRecord) -> RateDeltas {
        let key = flow.key();
        let (deltas, state) = advance(self.states.get(&key).copied(), flow.pps, flow.bps, &RateOverrides::from(flow));
        self.states.insert(key, state);
        deltas
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

impl Default for RateDeltaTracker {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_RATE_CACHE_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn key(port: u16) -> FlowKey {
        FlowRecord::new("10.0.0.2", "10.0.0.1", port, 443, "TCP").key()
    }

    #[test]
    fn test_delta_and_cumulative_sequence() {
        let tracker = RateDeltaTracker::new(128);
        let mut deltas = Vec::new();
        let mut cums = Vec::new();

        for pps in [10.0, 15.0, 12.0, 20.0] {
            let d = tracker.observe(key(1), pps, 0.0, &RateOverrides::default());
            deltas.push(d.pps_delta);
            cums.push(d.pps_cum_increase);
        }

        assert_eq!(deltas, vec![0.0, 5.0, -3.0, 8.0]);
        assert_eq!(cums, vec![0.0, 5.0, 5.0, 13.0]);
    }

    #[test]
    fn test_first_sighting_then_jump() {
        let tracker = RateDeltaTracker::new(128);
        let flow = FlowRecord::new("10.0.0.2", "10.0.0.1", 5000, 80, "TCP").with_counts(1, 40);

        let first = tracker.observe_flow(&flow);
        assert_eq!(first, RateDeltas::default());

        let second = tracker.observe_flow(&flow.clone().with_rates(100.0, 0.0));
        assert_eq!(second.pps_delta, 100.0);
        assert_eq!(second.pps_cum_increase, 100.0);
        assert_eq!(second.bps_delta, 0.0);
    }

    #[test]
    fn test_keys_are_independent() {
        let tracker = RateDeltaTracker::new(128);
        tracker.observe(key(1), 10.0, 0.0, &RateOverrides::default());
        let other = tracker.observe(key(2), 50.0, 0.0, &RateOverrides::default());
        assert_eq!(other.pps_delta, 0.0);
        assert_eq!(tracker.len(), 2);
    }

    #[test]
    fn test_overrides_replace_computed_values() {
        let tracker = RateDeltaTracker::new(128);
        let overrides = RateOverrides {
            pps_delta: Some(7.0),
            pps_cum_increase: Some(30.0),
            ..Default::default()
        };

        let first = tracker.observe(key(1), 10.0, 5.0, &overrides);
        assert_eq!(first.pps_delta, 7.0);
        assert_eq!(first.pps_cum_increase, 30.0);
        assert_eq!(first.bps_delta, 0.0);

        // Local accounting continues from the overridden cumulative value
        let next = tracker.observe(key(1), 14.0, 5.0, &RateOverrides::default());
        assert_eq!(next.pps_delta, 4.0);
        assert_eq!(next.pps_cum_increase, 34.0);
    }

    #[test]
    fn test_capacity_evicts_least_recent() {
        let tracker = RateDeltaTracker::new(1);
        assert_eq!(tracker.capacity(), SHARD_COUNT * SHARD_HEADROOM);

        for port in 0..200 {
            tracker.observe(key(port), 1.0, 1.0, &RateOverrides::default());
        }
        assert!(tracker.len() <= tracker.capacity());
    }

    #[test]
    fn test_shards_have_headroom_over_requested_capacity() {
        let tracker = RateDeltaTracker::new(1000);
        assert_eq!(tracker.capacity(), 63 * SHARD_HEADROOM * SHARD_COUNT);
        assert!(tracker.capacity() >= 2 * 1000);
    }

    #[test]
    fn test_ledger_keeps_every_key() {
        let mut ledger = RateLedger::new();
        let first = FlowRecord::new("10.0.0.2", "10.0.0.1", 1, 443, "TCP").with_rates(10.0, 0.0);
        assert_eq!(ledger.observe_flow(&first), RateDeltas::default());

        for port in 2..2000 {
            let other = FlowRecord::new("10.0.0.3", "10.0.0.1", port, 443, "TCP").with_rates(1.0, 0.0);
            ledger.observe_flow(&other);
        }

        let again = ledger.observe_flow(&first.clone().with_rates(50.0, 0.0));
        assert_eq!(again.pps_delta, 40.0);
        assert_eq!(again.pps_cum_increase, 40.0);
        assert_eq!(ledger.len(), 1999);
    }

    #[test]
    fn test_concurrent_same_key_is_serialized() {
        let tracker = Arc::new(RateDeltaTracker::new(128));
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        tracker.observe(key(9), (t * 100 + i) as f64, 0.0, &RateOverrides::default());
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let state = tracker.peek(&key(9)).unwrap();
        assert!(state.pps_cum_increase >= 0.0);
        assert_eq!(tracker.len(), 1);
    }
}
