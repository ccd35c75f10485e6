//! Structured event log
//!
//! `JsonlEventSink` appends one JSON object per pipeline stage event to a
//! file. Each line carries the `stage` tag and a `timestamp`; the file is
//! append-only and survives across runs.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use scan_coordination::events::{EventSink, EventSinkError, EventSinkResult, PipelineEvent};
use tracing::warn;

#[derive(Debug)]
pub struct JsonlEventSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlEventSink {
    /// Open (creating if needed) the log for appending.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .context(format!("Failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .context(format!("Failed to open event log {}", path.display()))?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSink for JsonlEventSink {
    fn record(&self, event: &PipelineEvent) -> EventSinkResult<()> {
        let line = serde_json::to_string(event)?;
        let mut file = self
            .file
            .lock()
            .map_err(|e| EventSinkError::PersistFailed(e.to_string()))?;
        writeln!(file, "{}", line).map_err(|e| EventSinkError::PersistFailed(e.to_string()))
    }
}

/// Read a JSONL event log back. Lines that do not decode are skipped with a
/// warning.
pub fn read_events(path: &Path) -> Result<Vec<PipelineEvent>> {
    let file = File::open(path).context(format!("Failed to open {}", path.display()))?;
    let mut events = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.context(format!("Failed to read {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str(&line) {
            Ok(event) => events.push(event),
            Err(e) => warn!(line = index + 1, error = %e, "Skipping undecodable event"),
        }
    }
    Ok(events)
}
