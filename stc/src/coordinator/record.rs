//! Persistent status record.
//!
//! One JSON object per line, appended as steps change status and truncated
//! by `reset`. The record is the sole input for the `list` and `listFailed`
//! commands.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::flow::Status;

/// File name of the record inside the scenario log directory. Step logs are
/// named `<stepName>.log`, so this cannot collide.
pub const RECORD_FILE: &str = "scenario.record";

/// One status transition of one step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusEvent {
    /// Event time, epoch milliseconds.
    pub time: i64,
    pub step: String,
    pub status: Status,
    /// The command line, present on dispatch events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

impl StatusEvent {
    /// Create an event stamped with the current time.
    pub fn now(step: impl Into<String>, status: Status, command: Option<String>) -> Self {
        Self {
            time: Utc::now().timestamp_millis(),
            step: step.into(),
            status,
            command,
        }
    }
}

/// Append-only writer over the record file.
pub struct StatusRecord {
    path: PathBuf,
    file: Option<File>,
}

impl StatusRecord {
    pub fn new(log_dir: &Path) -> Self {
        Self {
            path: log_dir.join(RECORD_FILE),
            file: None,
        }
    }

    /// Truncate the record, starting a fresh run.
    pub fn reset(&mut self) -> Result<()> {
        let file = File::create(&self.path)
            .with_context(|| format!("Unable to create record file {}", self.path.display()))?;
        self.file = Some(file);
        Ok(())
    }

    /// Append one event and flush it.
    pub fn append(&mut self, event: &StatusEvent) -> Result<()> {
        if self.file.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .with_context(|| {
                    format!("Unable to open record file {}", self.path.display())
                })?;
            self.file = Some(file);
        }

        let file = self.file.as_mut().expect("opened above");
        let line = serde_json::to_string(event).context("Unable to encode status event")?;
        writeln!(file, "{line}")
            .and_then(|()| file.flush())
            .with_context(|| format!("Unable to append to {}", self.path.display()))?;
        Ok(())
    }

    /// Replay the record of a prior (or current) run.
    pub fn load(log_dir: &Path) -> Result<Vec<StatusEvent>> {
        let path = log_dir.join(RECORD_FILE);
        let file = File::open(&path)
            .with_context(|| format!("No status record at {}", path.display()))?;

        let mut events = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.context("Unable to read status record")?;
            if line.trim().is_empty() {
                continue;
            }
            let event: StatusEvent = serde_json::from_str(&line)
                .with_context(|| format!("Malformed record line: {line}"))?;
            events.push(event);
        }
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_and_replay() {
        let dir = TempDir::new().unwrap();
        let mut record = StatusRecord::new(dir.path());
        record.reset().unwrap();

        record
            .append(&StatusEvent::now(
                "a",
                Status::InProgress,
                Some("echo hi".to_string()),
            ))
            .unwrap();
        record
            .append(&StatusEvent::now("a", Status::Succeeded, None))
            .unwrap();

        let events = StatusRecord::load(dir.path()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].step, "a");
        assert_eq!(events[0].status, Status::InProgress);
        assert_eq!(events[0].command.as_deref(), Some("echo hi"));
        assert_eq!(events[1].status, Status::Succeeded);
        assert!(events[1].command.is_none());
    }

    #[test]
    fn test_reset_truncates() {
        let dir = TempDir::new().unwrap();
        let mut record = StatusRecord::new(dir.path());
        record.reset().unwrap();
        record
            .append(&StatusEvent::now("a", Status::Failed, None))
            .unwrap();

        record.reset().unwrap();
        assert!(StatusRecord::load(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_missing_record_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(StatusRecord::load(dir.path()).is_err());
    }
}
