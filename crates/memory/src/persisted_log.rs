//! Append-only JSON-lines log with an in-memory id index.
//!
//! Each line is a JSON-encoded `PersistedRecord`. Lines are never rewritten.
//! The index of known message ids is rebuilt from the file on open, so the
//! log itself is the single source of truth for "already persisted".
//!
//! Writes go through the log's async mutex, which makes every `PersistedLog`
//! a single logical writer for its file. Readers do not take the lock; they
//! read the file as it is and only parse newline-terminated lines.

use chatrelay_core::error::MemoryError;
use chatrelay_core::record::{PersistedRecord, RecordOrigin};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Result of an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The record was written and its id recorded.
    Written,
    /// The id was already in the log; nothing was written.
    Duplicate,
}

/// A single append-only log file.
pub struct PersistedLog {
    path: PathBuf,
    state: Mutex<LogState>,
}

#[derive(Default)]
struct LogState {
    ids: HashSet<String>,
    max_timestamp: Option<DateTime<Utc>>,
    /// Newest record copied from platform history
    resume_point: Option<DateTime<Utc>>,
    /// The file ends in an unterminated fragment (torn write); the next
    /// append must start on a fresh line.
    needs_newline: bool,
}

impl LogState {
    fn track(&mut self, record: &PersistedRecord) {
        self.ids.insert(record.message_id.clone());
        self.max_timestamp = self.max_timestamp.max(Some(record.timestamp));
        if record.origin == RecordOrigin::History {
            self.resume_point = self.resume_point.max(Some(record.timestamp));
        }
    }
}

impl PersistedLog {
    /// Open a log, creating nothing until the first append.
    ///
    /// Corrupted lines are skipped with a warning. An unterminated last line
    /// is ignored and will be separated from the next record.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, MemoryError> {
        let path = path.into();
        let bytes = read_file(&path).await?;
        let records = parse_complete_lines(&bytes);

        let mut state = LogState {
            needs_newline: !bytes.is_empty() && !bytes.ends_with(b"\n"),
            ..LogState::default()
        };
        for record in &records {
            state.track(record);
        }

        debug!(
            path = %path.display(),
            records = records.len(),
            ids = state.ids.len(),
            "Persisted log opened"
        );

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a record unless its id is already present.
    ///
    /// The id is only recorded after the line was written and flushed; a
    /// failed write leaves the index untouched so the record can be retried.
    pub async fn append(&self, record: &PersistedRecord) -> Result<AppendOutcome, MemoryError> {
        let mut state = self.state.lock().await;
        if state.ids.contains(&record.message_id) {
            return Ok(AppendOutcome::Duplicate);
        }

        let encoded = serde_json::to_string(record)
            .map_err(|e| MemoryError::Serialization(e.to_string()))?;
        let mut line = String::with_capacity(encoded.len() + 2);
        if state.needs_newline {
            line.push('\n');
        }
        line.push_str(&encoded);
        line.push('\n');

        if let Err(e) = self.write_line(&line).await {
            // Part of the line may have reached the file
            state.needs_newline = true;
            return Err(e);
        }

        state.needs_newline = false;
        state.track(record);
        Ok(AppendOutcome::Written)
    }

    async fn write_line(&self, line: &str) -> Result<(), MemoryError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    MemoryError::Storage(format!("Failed to create log directory: {e}"))
                })?;
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to open log file: {e}")))?;

        file.write_all(line.as_bytes())
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to write log file: {e}")))?;
        file.flush()
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to flush log file: {e}")))?;
        Ok(())
    }

    /// Whether a message id has been persisted.
    pub async fn contains(&self, message_id: &str) -> bool {
        self.state.lock().await.ids.contains(message_id)
    }

    /// Number of distinct records in the log.
    pub async fn len(&self) -> usize {
        self.state.lock().await.ids.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Latest timestamp among persisted records.
    pub async fn max_timestamp(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.max_timestamp
    }

    /// Latest timestamp among records fetched from platform history.
    ///
    /// Live saves are left out: they are stamped as the conversation
    /// happens and say nothing about what came before them.
    pub async fn resume_point(&self) -> Option<DateTime<Utc>> {
        self.state.lock().await.resume_point
    }

    /// Point-in-time read of every complete record in the file.
    pub async fn read_records(&self) -> Result<Vec<PersistedRecord>, MemoryError> {
        read_records_at(&self.path).await
    }

    /// Case-insensitive substring match over content and author, newest first.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<PersistedRecord>, MemoryError> {
        let records = self.read_records().await?;
        Ok(matching_records(records, query, limit))
    }
}

pub(crate) fn matching_records(
    records: Vec<PersistedRecord>,
    query: &str,
    limit: usize,
) -> Vec<PersistedRecord> {
    let needle = query.to_lowercase();
    let mut hits: Vec<PersistedRecord> = records
        .into_iter()
        .filter(|r| {
            r.content.to_lowercase().contains(&needle) || r.author.to_lowercase().contains(&needle)
        })
        .collect();
    hits.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    hits.truncate(limit);
    hits
}

/// Read the complete records of a log file without opening a `PersistedLog`.
pub async fn read_records_at(path: &Path) -> Result<Vec<PersistedRecord>, MemoryError> {
    let bytes = read_file(path).await?;
    Ok(parse_complete_lines(&bytes))
}

async fn read_file(path: &Path) -> Result<Vec<u8>, MemoryError> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(MemoryError::Storage(format!(
            "Failed to read log file {}: {e}",
            path.display()
        ))),
    }
}

/// Parse newline-terminated lines only; anything after the last `\n` is a
/// write still in flight (or a torn one) and is not a record yet.
fn parse_complete_lines(bytes: &[u8]) -> Vec<PersistedRecord> {
    let complete = match bytes.iter().rposition(|b| *b == b'\n') {
        Some(end) => &bytes[..=end],
        None => return Vec::new(),
    };

    String::from_utf8_lossy(complete)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<PersistedRecord>(line) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(error = %e, "Skipping corrupted log line");
                None
            }
        })
        .collect()
}
