//! Append-only durable record of fitness history.
//!
//! Records are written as JSONL, one record per line, never mutated after
//! write. The store sits on the simulation tick's hot path, so callers treat
//! append failures as log-and-drop.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::task::TaskType;

/// Errors from the metrics store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("metrics writer stopped")]
    WriterStopped,
}

/// One durable fitness measurement. `created_at` is assigned server-side at
/// write time by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsRecord {
    pub agent_id: String,
    pub task_type: TaskType,
    pub generation: u32,
    pub speed: f64,
    pub accuracy: f64,
    pub efficiency: f64,
    pub fitness: f64,
    pub created_at: DateTime<Utc>,
}

/// Sink for metrics records. Abstracted so the feedback bridge can be tested
/// without touching the filesystem.
#[cfg_attr(test, mockall::automock)]
pub trait MetricsSink: Send {
    fn append(&mut self, record: &MetricsRecord) -> Result<(), StoreError>;
}

/// JSONL file store. The file is opened per append, so a deleted or rotated
/// file is simply recreated on the next write.
pub struct JsonlMetricsStore {
    path: PathBuf,
}

impl JsonlMetricsStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Load every record from the file. Missing file reads as empty.
    pub fn load_all(&self) -> Result<Vec<MetricsRecord>, StoreError> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let reader = BufReader::new(file);
        let mut records = Vec::new();
        for line in reader.lines() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            records.push(serde_json::from_str(trimmed)?);
        }
        Ok(records)
    }
}

impl MetricsSink for JsonlMetricsStore {
    fn append(&mut self, record: &MetricsRecord) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let line = serde_json::to_string(record)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

/// Hands records to a dedicated writer thread over a channel, so an append
/// never waits on store latency. Records are written in arrival order;
/// dropping the writer flushes whatever is still queued before returning.
pub struct MetricsWriter {
    tx: Option<mpsc::Sender<MetricsRecord>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MetricsWriter {
    pub fn spawn(mut sink: Box<dyn MetricsSink>) -> Self {
        let (tx, rx) = mpsc::channel::<MetricsRecord>();
        let handle = thread::spawn(move || {
            while let Ok(record) = rx.recv() {
                if let Err(e) = sink.append(&record) {
                    warn!(
                        agent_id = %record.agent_id,
                        error = %e,
                        "metrics append failed, record dropped"
                    );
                }
            }
        });
        Self {
            tx: Some(tx),
            handle: Some(handle),
        }
    }
}

impl MetricsSink for MetricsWriter {
    fn append(&mut self, record: &MetricsRecord) -> Result<(), StoreError> {
        match &self.tx {
            Some(tx) => tx
                .send(record.clone())
                .map_err(|_| StoreError::WriterStopped),
            None => Err(StoreError::WriterStopped),
        }
    }
}

impl Drop for MetricsWriter {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(agent_id: &str, generation: u32) -> MetricsRecord {
        MetricsRecord {
            agent_id: agent_id.to_string(),
            task_type: TaskType::Time,
            generation,
            speed: 1.2,
            accuracy: 0.95,
            efficiency: 1.0,
            fitness: 1.05,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_append_and_load_roundtrip() {
        let dir = tempdir().unwrap();
        let mut store = JsonlMetricsStore::new(dir.path().join("metrics.jsonl"));

        store.append(&record("a1", 0)).unwrap();
        store.append(&record("a1", 1)).unwrap();
        store.append(&record("a2", 0)).unwrap();

        let loaded = store.load_all().unwrap();
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded[0].agent_id, "a1");
        assert_eq!(loaded[1].generation, 1);
        assert_eq!(loaded[2].agent_id, "a2");
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = JsonlMetricsStore::new(dir.path().join("nothing.jsonl"));
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn test_append_creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let mut store = JsonlMetricsStore::new(dir.path().join("nested/deeper/metrics.jsonl"));
        store.append(&record("a1", 0)).unwrap();
        assert_eq!(store.load_all().unwrap().len(), 1);
    }

    #[test]
    fn test_writer_flushes_queued_records_on_drop() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("metrics.jsonl");
        let mut writer = MetricsWriter::spawn(Box::new(JsonlMetricsStore::new(path.clone())));

        for generation in 0..3 {
            writer.append(&record("a1", generation)).unwrap();
        }
        drop(writer);

        assert_eq!(JsonlMetricsStore::new(path).load_all().unwrap().len(), 3);
    }

    #[test]
    fn test_writer_append_does_not_wait_for_slow_sink() {
        struct SlowSink;
        impl MetricsSink for SlowSink {
            fn append(&mut self, _record: &MetricsRecord) -> Result<(), StoreError> {
                std::thread::sleep(std::time::Duration::from_millis(200));
                Ok(())
            }
        }

        let mut writer = MetricsWriter::spawn(Box::new(SlowSink));
        let start = std::time::Instant::now();
        for generation in 0..5 {
            writer.append(&record("a1", generation)).unwrap();
        }
        // Five appends queue a full second of sink latency, none of it here.
        assert!(start.elapsed() < std::time::Duration::from_millis(150));
    }

    #[test]
    fn test_record_wire_shape() {
        let json = serde_json::to_value(record("a1", 3)).unwrap();
        assert_eq!(json["agentId"], "a1");
        assert_eq!(json["taskType"], "time");
        assert_eq!(json["generation"], 3);
        assert!(json["createdAt"].is_string());
    }
}
