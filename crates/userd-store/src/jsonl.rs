// ABOUTME: Append-only JSONL event log and the Notifier that writes user events into it.
// ABOUTME: Provides crash-safe append, sequential replay, incremental tailing, and repair for truncated files.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use userd_core::{EventKind, Notifier, NotifyError, Record, UserEvent};

/// Errors that can occur during JSONL log operations.
#[derive(Debug, Error)]
pub enum JsonlError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One line of the event log. `record` is the flat user snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub topic: String,
    pub kind: EventKind,
    pub record: Record,
}

impl LogEntry {
    pub fn new(topic: &str, event: &UserEvent) -> Self {
        Self {
            topic: topic.to_string(),
            kind: event.kind,
            record: event.record.clone(),
        }
    }
}

/// An append-only JSONL event log backed by a file.
/// Each line is a single JSON-serialized LogEntry followed by a newline.
#[derive(Debug)]
pub struct JsonlEventLog {
    path: PathBuf,
    file: File,
}

impl JsonlEventLog {
    /// Returns the path to the underlying JSONL file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open (or create) a log file in append mode, creating parent directories.
    pub fn open(path: &Path) -> Result<Self, JsonlError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Append one entry as a JSON line and fsync it.
    pub fn append(&mut self, entry: &LogEntry) -> Result<(), JsonlError> {
        let json = serde_json::to_string(entry)?;
        writeln!(self.file, "{}", json)?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Replay every entry in order. Empty lines are skipped.
    pub fn replay(path: &Path) -> Result<Vec<LogEntry>, JsonlError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(&line)?);
        }

        Ok(entries)
    }

    /// Read complete lines written after byte `offset`. Returns the entries and
    /// the offset just past the last complete line, so a partially written
    /// trailing line is picked up on the next call.
    pub fn read_since(path: &Path, offset: u64) -> Result<(Vec<LogEntry>, u64), JsonlError> {
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();
        if len < offset {
            // The file was truncated or replaced; start over.
            return Self::read_since(path, 0);
        }
        file.seek(SeekFrom::Start(offset))?;

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;

        let complete = match buf.iter().rposition(|b| *b == b'\n') {
            Some(pos) => &buf[..=pos],
            None => return Ok((Vec::new(), offset)),
        };

        let mut entries = Vec::new();
        for line in complete.split(|b| *b == b'\n') {
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            entries.push(serde_json::from_slice(line)?);
        }

        Ok((entries, offset + complete.len() as u64))
    }

    /// Keep only complete, parseable lines, dropping any partial trailing data.
    /// Uses temp-file + fsync + rename. Returns the count of entries retained.
    pub fn repair(path: &Path) -> Result<usize, JsonlError> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut valid_lines: Vec<String> = Vec::new();

        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            if serde_json::from_str::<LogEntry>(&line).is_ok() {
                valid_lines.push(line);
            }
        }

        let count = valid_lines.len();

        let tmp_path = path.with_extension("jsonl.tmp");
        let mut tmp_file = File::create(&tmp_path)?;
        for line in &valid_lines {
            writeln!(tmp_file, "{}", line)?;
        }
        tmp_file.sync_all()?;

        fs::rename(&tmp_path, path)?;

        // Best-effort: the rename already happened.
        if let Some(parent) = path.parent()
            && let Ok(dir) = File::open(parent)
        {
            let _ = dir.sync_all();
        }

        Ok(count)
    }
}

/// Notifier that appends every event to a JSONL log on the blocking pool.
#[derive(Debug, Clone)]
pub struct JsonlNotifier {
    log: Arc<Mutex<JsonlEventLog>>,
}

impl JsonlNotifier {
    pub fn new(log: JsonlEventLog) -> Self {
        Self {
            log: Arc::new(Mutex::new(log)),
        }
    }

    /// Repair any existing log at `path`, then open it for appending.
    pub fn open(path: &Path) -> Result<Self, JsonlError> {
        if path.exists() {
            let kept = JsonlEventLog::repair(path)?;
            tracing::info!("event log {} holds {} events", path.display(), kept);
        }
        Ok(Self::new(JsonlEventLog::open(path)?))
    }
}

#[async_trait]
impl Notifier for JsonlNotifier {
    async fn publish(&self, topic: &str, event: &UserEvent) -> Result<(), NotifyError> {
        let entry = LogEntry::new(topic, event);
        let log = Arc::clone(&self.log);

        tokio::task::spawn_blocking(move || {
            let mut log = log
                .lock()
                .map_err(|_| NotifyError::Unavailable("event log lock poisoned".to_string()))?;
            log.append(&entry).map_err(|e| match e {
                JsonlError::Json(e) => NotifyError::Encode(e),
                JsonlError::Io(e) => NotifyError::Unavailable(e.to_string()),
            })
        })
        .await
        .map_err(|e| NotifyError::Unavailable(format!("event log task failed: {e}")))?
    }
}
