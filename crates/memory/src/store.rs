//! One persisted log per target (channel or conversation).

use crate::persisted_log::{matching_records, read_records_at, AppendOutcome, PersistedLog};
use chatrelay_core::error::MemoryError;
use chatrelay_core::record::PersistedRecord;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

const LOG_EXTENSION: &str = "jsonl";

/// Totals across every log in the store directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Statistics {
    pub total_persisted: usize,
    pub logs: usize,
    /// Record counts keyed by author class
    pub by_author_class: BTreeMap<String, usize>,
}

/// Directory of append-only logs, opened lazily and shared.
///
/// Each target gets exactly one `PersistedLog` instance, so every file has a
/// single writer no matter how many tasks append to it.
pub struct LogStore {
    dir: PathBuf,
    logs: Mutex<HashMap<String, Arc<PersistedLog>>>,
}

impl LogStore {
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            logs: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path used for a target.
    pub fn path_for(&self, target: &str) -> PathBuf {
        self.dir
            .join(format!("{}.{LOG_EXTENSION}", sanitize_target(target)))
    }

    /// The log for a target, opening it on first use.
    pub async fn log(&self, target: &str) -> Result<Arc<PersistedLog>, MemoryError> {
        let key = sanitize_target(target);
        let mut logs = self.logs.lock().await;
        if let Some(log) = logs.get(&key) {
            return Ok(log.clone());
        }

        let log = Arc::new(PersistedLog::open(self.path_for(target)).await?);
        debug!(target = %key, "Opened log for target");
        logs.insert(key, log.clone());
        Ok(log)
    }

    pub async fn append(
        &self,
        target: &str,
        record: &PersistedRecord,
    ) -> Result<AppendOutcome, MemoryError> {
        self.log(target).await?.append(record).await
    }

    /// Case-insensitive substring search over every log, newest first.
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
    ) -> Result<Vec<PersistedRecord>, MemoryError> {
        Ok(matching_records(self.all_records().await?, query, limit))
    }

    pub async fn statistics(&self) -> Result<Statistics, MemoryError> {
        let mut stats = Statistics::default();
        for path in self.log_files().await? {
            stats.logs += 1;
            for record in read_records_at(&path).await? {
                stats.total_persisted += 1;
                *stats
                    .by_author_class
                    .entry(record.author_class.as_str().to_string())
                    .or_default() += 1;
            }
        }
        Ok(stats)
    }

    async fn all_records(&self) -> Result<Vec<PersistedRecord>, MemoryError> {
        let mut records = Vec::new();
        for path in self.log_files().await? {
            records.extend(read_records_at(&path).await?);
        }
        Ok(records)
    }

    async fn log_files(&self) -> Result<Vec<PathBuf>, MemoryError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(MemoryError::Storage(format!(
                    "Failed to list log directory: {e}"
                )))
            }
        };

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| MemoryError::Storage(format!("Failed to list log directory: {e}")))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some(LOG_EXTENSION) {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

/// Map a target name onto a safe file stem.
fn sanitize_target(target: &str) -> String {
    let stem: String = target
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if stem.is_empty() {
        "default".into()
    } else {
        stem
    }
}
