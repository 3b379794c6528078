//! Score Sink - hand-off of scored flows to persistence
//!
//! The engine calls `record` after a score is computed. Whatever happens in
//! the sink never changes the returned bundle; failures are logged only.
//! `JsonlScoreSink` appends one JSON line per scored flow, rotating files at
//! `MAX_FILE_SIZE`.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::logic::flow::FlowRecord;
use crate::logic::model::inference::ScoreBundle;

const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024; // 10 MB

/// Receiver of scored flows
pub trait ScoreSink: Send + Sync {
    fn record(&self, flow: &FlowRecord, score: &ScoreBundle) -> io::Result<()>;
}

/// One persisted line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreLine {
    pub timestamp: chrono::DateTime<Utc>,
    pub flow: FlowRecord,
    pub score: ScoreBundle,
}

pub struct JsonlScoreSink {
    file: Mutex<Option<File>>,
    base_dir: PathBuf,
}

impl JsonlScoreSink {
    pub fn new() -> Self {
        let base_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(crate::constants::APP_NAME)
            .join("scores");
        Self::from_path(base_dir)
    }

    pub fn from_path(base_dir: PathBuf) -> Self {
        if let Err(e) = fs::create_dir_all(&base_dir) {
            log::error!("Failed to create score directory {:?}: {}", base_dir, e);
        }

        Self {
            file: Mutex::new(None),
            base_dir,
        }
    }

    pub fn base_dir(&self) -> &std::path::Path {
        &self.base_dir
    }

    fn create_new_file(&self) -> io::Result<File> {
        // YYYY-MM-DD-HHMMSS plus millis so fast rotations never collide
        let filename = format!("scores-{}.jsonl", Utc::now().format("%Y-%m-%d-%H%M%S%.3f"));
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.base_dir.join(filename))
    }

    fn find_latest_file(&self) -> io::Result<Option<PathBuf>> {
        let mut entries = fs::read_dir(&self.base_dir)?
            .filter_map(|res| res.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().map_or(false, |ext| ext == "jsonl"))
            .collect::<Vec<_>>();

        // Timestamped names sort chronologically
        entries.sort();
        Ok(entries.pop())
    }
}

impl Default for JsonlScoreSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ScoreSink for JsonlScoreSink {
    fn record(&self, flow: &FlowRecord, score: &ScoreBundle) -> io::Result<()> {
        let mut guard = self.file.lock();

        if guard.is_none() {
            let file = match self.find_latest_file()? {
                Some(path) => {
                    let f = OpenOptions::new().create(true).append(true).open(&path)?;
                    if f.metadata()?.len() < MAX_FILE_SIZE {
                        f
                    } else {
                        self.create_new_file()?
                    }
                }
                None => self.create_new_file()?,
            };
            *guard = Some(file);
        }

        let should_rotate = match guard.as_ref() {
            Some(f) => f.metadata()?.len() >= MAX_FILE_SIZE,
            None => false,
        };
        if should_rotate {
            *guard = Some(self.create_new_file()?);
        }

        if let Some(file) = guard.as_mut() {
            let line = ScoreLine {
                timestamp: Utc::now(),
                flow: flow.clone(),
                score: score.clone(),
            };
            writeln!(file, "{}", serde_json::to_string(&line)?)?;
        }
        Ok(())
    }
}
