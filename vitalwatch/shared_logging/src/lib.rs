#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Structured JSON-lines logging shared by the trainer and the scoring service.
//!
//! Every record written to disk is also forwarded to `tracing`, so console
//! output and the audit file stay in step.

use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Severity attached to every record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    /// Diagnostic detail.
    Debug,
    /// Normal operation.
    Info,
    /// Degraded but recoverable.
    Warn,
    /// Operation failed.
    Error,
}

/// One JSON line in a log file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    /// UTC time the record was created.
    pub timestamp: DateTime<Utc>,
    /// Component emitting the log (`vtrain`, `server`, ...).
    pub module: String,
    /// Record severity.
    pub level: LogLevel,
    /// Short event description.
    pub message: String,
    /// Structured fields attached to the record.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl LogRecord {
    /// Record stamped with the current time and no metadata.
    #[must_use]
    pub fn new(module: impl Into<String>, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            module: module.into(),
            level,
            message: message.into(),
            metadata: Map::new(),
        }
    }

    /// Merges the fields of a JSON object into the metadata. Non-object values are stored under `data`.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        match metadata {
            Value::Object(map) => self.metadata.extend(map),
            Value::Null => {}
            other => {
                self.metadata.insert("data".into(), other);
            }
        }
        self
    }

    /// Emits the record as a `tracing` event at the matching level.
    pub fn trace(&self) {
        let fields = Value::Object(self.metadata.clone());
        match self.level {
            LogLevel::Debug => {
                tracing::debug!(module = %self.module, fields = %fields, "{}", self.message);
            }
            LogLevel::Info => {
                tracing::info!(module = %self.module, fields = %fields, "{}", self.message);
            }
            LogLevel::Warn => {
                tracing::warn!(module = %self.module, fields = %fields, "{}", self.message);
            }
            LogLevel::Error => {
                tracing::error!(module = %self.module, fields = %fields, "{}", self.message);
            }
        }
    }
}

/// Appends records to a JSON-lines file. Safe to share between threads.
#[derive(Debug)]
pub struct JsonLogger {
    path: PathBuf,
    writer: Mutex<File>,
}

impl JsonLogger {
    /// Creates or opens a logger at the desired path, creating parent directories.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating log directory {}", parent.display()))?;
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening log file {}", path.display()))?;
        Ok(Self {
            path,
            writer: Mutex::new(file),
        })
    }

    /// Writes a log record as a JSON line and mirrors it to `tracing`.
    pub fn log(&self, record: &LogRecord) -> Result<()> {
        record.trace();
        let mut writer = self.writer.lock();
        serde_json::to_writer(&mut *writer, record)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }

    /// Returns the underlying file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn writes_json_lines() {
        let dir = tempdir().unwrap();
        let logger = JsonLogger::new(dir.path().join("nested/audit.log")).unwrap();
        logger
            .log(
                &LogRecord::new("server", LogLevel::Info, "user registered")
                    .with_metadata(json!({ "email": "a@b.c" })),
            )
            .unwrap();
        let content = fs::read_to_string(logger.path()).unwrap();
        assert!(content.contains("\"message\":\"user registered\""));
        assert!(content.contains("\"email\":\"a@b.c\""));
    }

    #[test]
    fn reads_back_records_in_order() {
        let dir = tempdir().unwrap();
        let logger = JsonLogger::new(dir.path().join("job.log")).unwrap();
        logger
            .log(&LogRecord::new("vtrain", LogLevel::Info, "job queued"))
            .unwrap();
        logger
            .log(
                &LogRecord::new("vtrain", LogLevel::Error, "job failed")
                    .with_metadata(json!({ "error": "disk full" })),
            )
            .unwrap();
        let records: Vec<LogRecord> = fs::read_to_string(logger.path())
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].level, LogLevel::Error);
        assert_eq!(records[1].metadata["error"], "disk full");
    }

    #[test]
    fn non_object_metadata_lands_under_data() {
        let record = LogRecord::new("m", LogLevel::Debug, "x").with_metadata(json!(3));
        assert_eq!(record.metadata["data"], 3);
    }
}
