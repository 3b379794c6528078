//! CSV table reader
//!
//! Header problems reject the whole table; row problems drop only that row.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{EngineError, EngineResult};
use super::record::{LabeledFlow, RowView, LABEL_COLUMN, REQUIRED_COLUMNS};

/// Rows kept and dropped from one table
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableLoad {
    pub rows: Vec<LabeledFlow>,
    pub dropped: usize,
}

/// Read a labeled table; `forced_label` replaces (and no longer requires) the label column
pub fn read_table<R: Read>(reader: R, forced_label: Option<u8>) -> EngineResult<TableLoad> {
    let mut csv = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let headers = csv.headers()?.clone();
    let index: HashMap<String, usize> = headers
        .iter()
        .enumerate()
        .map(|(i, h)| (h.trim().to_ascii_lowercase(), i))
        .collect();

    let mut missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|c| !index.contains_key(*c))
        .collect();
    if forced_label.is_none() && !index.contains_key(LABEL_COLUMN) {
        missing.push(LABEL_COLUMN);
    }
    if !missing.is_empty() {
        return Err(EngineError::schema(format!(
            "missing required columns: {}",
            missing.join(", ")
        )));
    }

    let mut load = TableLoad::default();
    for result in csv.records() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                log::debug!("Dropping unreadable row: {}", e);
                load.dropped += 1;
                continue;
            }
        };

        let view = RowView {
            record: &record,
            index: &index,
        };

        let parsed = view
            .flow()
            .and_then(|flow| forced_label.or_else(|| view.label()).map(|label| LabeledFlow { flow, label }));

        match parsed {
            Some(row) => load.rows.push(row),
            None => load.dropped += 1,
        }
    }

    Ok(load)
}

pub fn read_table_file(path: &Path, forced_label: Option<u8>) -> EngineResult<TableLoad> {
    let file = File::open(path)
        .map_err(|e| EngineError::schema(format!("cannot open dataset {:?}: {}", path, e)))?;
    let load = read_table(file, forced_label)?;
    log::info!(
        "Read {} rows from {:?} ({} dropped)",
        load.rows.len(),
        path,
        load.dropped
    );
    Ok(load)
}
