//! Dataset Module - Labeled flow tables for offline training
//!
//! Loading order:
//! 1. Read the labeled table (and the optional attacker-only table, forced to label 1)
//! 2. Drop rows missing or failing to parse any required column
//! 3. Stable-sort by start time; rows without one go last in original order
//! 4. Group row indices by flow key for per-flow sequence windows

pub mod reader;
pub mod record;


use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::io::Read;

use crate::error::{EngineError, EngineResult};
use crate::logic::config::EngineConfig;
use crate::logic::flow::FlowKey;
pub use reader::{read_table, read_table_file, TableLoad};
pub use record::{parse_label, LabeledFlow, LABEL_ATTACK, LABEL_NORMAL, REQUIRED_COLUMNS};

/// Merged, filtered and time-ordered training rows
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingSet {
    pub rows: Vec<LabeledFlow>,
    pub dropped: usize,
}

impl TrainingSet {
    /// Merge tables, then sort by start time
    pub fn from_tables(tables: impl IntoIterator<Item = TableLoad>) -> Self {
        let mut set = Self::default();
        for table in tables {
            set.rows.extend(table.rows);
            set.dropped += table.dropped;
        }
        sort_by_start_time(&mut set.rows);
        set
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn labels(&self) -> Vec<u8> {
        self.rows.iter().map(|r| r.label).collect()
    }

    pub fn attack_count(&self) -> usize {
        self.rows.iter().filter(|r| r.is_attack()).count()
    }

    pub fn normal_count(&self) -> usize {
        self.len() - self.attack_count()
    }

    /// Row indices per flow key, each in time order
    pub fn groups(&self) -> BTreeMap<FlowKey, Vec<usize>> {
        group_by_flow(&self.rows)
    }
}

/// Load the configured dataset(s)
pub fn load_training_set(config: &EngineConfig) -> EngineResult<TrainingSet> {
    let path = config
        .dataset_path
        .as_deref()
        .ok_or_else(|| EngineError::schema("no training dataset configured (DATASET_PATH)"))?;

    let mut tables = vec![read_table_file(path, None)?];
    if let Some(attacker) = config.attacker_dataset_path.as_deref() {
        tables.push(read_table_file(attacker, Some(LABEL_ATTACK))?);
    }

    finish(TrainingSet::from_tables(tables))
}

/// In-memory variant of `load_training_set`
pub fn load_from_readers<R: Read, A: Read>(labeled: R, attacker: Option<A>) -> EngineResult<TrainingSet> {
    let mut tables = vec![read_table(labeled, None)?];
    if let Some(attacker) = attacker {
        tables.push(read_table(attacker, Some(LABEL_ATTACK))?);
    }
    finish(TrainingSet::from_tables(tables))
}

fn finish(set: TrainingSet) -> EngineResult<TrainingSet> {
    if set.is_empty() {
        return Err(EngineError::schema("training set has no usable rows"));
    }
    log::info!(
        "Training set: {} rows ({} normal, {} attack), {} dropped",
        set.len(),
        set.normal_count(),
        set.attack_count(),
        set.dropped
    );
    Ok(set)
}

/// Stable sort by `start_time`; rows without one sort last
pub fn sort_by_start_time(rows: &mut [LabeledFlow]) {
    rows.sort_by(|a, b| match (a.flow.start_time, b.flow.start_time) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}

pub fn group_by_flow(rows: &[LabeledFlow]) -> BTreeMap<FlowKey, Vec<usize>> {
    let mut groups: BTreeMap<FlowKey, Vec<usize>> = BTreeMap::new();
    for (i, row) in rows.iter().enumerate() {
        groups.entry(row.flow.key()).or_default().push(i);
    }
    groups
}
