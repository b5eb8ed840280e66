//! Backfill engine: reconciles a channel's persisted log with the
//! platform's history.
//!
//! A run starts from the newest record previously copied from history (or
//! the configured start instant), pages forward oldest-first and writes
//! every unseen message through the channel's log. Re-running is idempotent
//! and resumes where the last run stopped, because the cursor is always
//! derived from what is already on disk. Live saves share the log but never
//! count towards the cursor.

use chatrelay_config::BackfillConfig;
use chatrelay_core::error::{ChannelError, MemoryError};
use chatrelay_core::event::{DomainEvent, EventBus};
use chatrelay_core::platform::{ChannelRef, ChatPlatform, PlatformMessage};
use chatrelay_core::record::PersistedRecord;
use chatrelay_memory::{AppendOutcome, LogStore};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Owner side of the shutdown flag.
pub struct Shutdown {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn signal(&self) -> CancellationSignal {
        CancellationSignal {
            rx: Some(self.tx.subscribe()),
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Observed between batches and while waiting out a rate limit.
#[derive(Clone, Default)]
pub struct CancellationSignal {
    rx: Option<watch::Receiver<bool>>,
}

impl CancellationSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Resolves once cancellation is requested.
    pub async fn cancelled(&self) {
        if let Some(rx) = &self.rx {
            let mut rx = rx.clone();
            if rx.wait_for(|cancelled| *cancelled).await.is_ok() {
                return;
            }
        }
        // Sender gone or no sender at all: cancellation can no longer happen
        std::future::pending::<()>().await
    }
}

/// Summary of one backfill run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackfillReport {
    /// Non-empty batches processed
    pub batches: usize,
    pub fetched: usize,
    /// Newly written records
    pub persisted: usize,
    /// Messages whose id was already persisted
    pub skipped: usize,
    /// Cursor after the last processed batch
    pub cursor: Option<DateTime<Utc>>,
    pub cancelled: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum BackfillError {
    #[error("history fetch for channel {channel} failed after {attempts} attempt(s) (cursor {cursor:?}): {source}")]
    Fetch {
        channel: String,
        cursor: Option<DateTime<Utc>>,
        attempts: u32,
        source: ChannelError,
    },

    #[error("could not persist history of channel {channel}: {source}")]
    Storage { channel: String, source: MemoryError },
}

/// Base delay between retries of a failed (non-throttled) fetch.
const FETCH_RETRY_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub struct BackfillEngine {
    platform: Arc<dyn ChatPlatform>,
    store: Arc<LogStore>,
    config: BackfillConfig,
    event_bus: Arc<EventBus>,
    shutdown: CancellationSignal,
    in_flight: Arc<Mutex<HashSet<ChannelRef>>>,
}

impl BackfillEngine {
    pub fn new(platform: Arc<dyn ChatPlatform>, store: Arc<LogStore>, config: BackfillConfig) -> Self {
        Self {
            platform,
            store,
            config,
            event_bus: Arc::new(EventBus::default()),
            shutdown: CancellationSignal::never(),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    /// Signal observed by runs started through [`run_if_idle`](Self::run_if_idle).
    pub fn with_shutdown(mut self, shutdown: CancellationSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn store(&self) -> &Arc<LogStore> {
        &self.store
    }

    fn batch_size(&self) -> usize {
        self.config.batch_size.clamp(1, 100) as usize
    }

    /// Drain the channel's history from the resume cursor.
    pub async fn run(
        &self,
        channel: &ChannelRef,
        cancel: &CancellationSignal,
    ) -> Result<BackfillReport, BackfillError> {
        let storage = |source| BackfillError::Storage {
            channel: channel.to_string(),
            source,
        };
        let log = self.store.log(channel.as_str()).await.map_err(storage)?;

        let mut cursor = match log.resume_point().await {
            Some(latest) => Some(latest),
            None => self.config.start_instant(),
        };
        let mut report = BackfillReport {
            cursor,
            ..Default::default()
        };
        info!(channel = %channel, cursor = ?cursor, "Backfill started");

        loop {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let Some(batch) = self.fetch_batch(channel, cursor, cancel).await? else {
                report.cancelled = true;
                break;
            };
            if batch.is_empty() {
                break;
            }

            let mut persisted = 0;
            for (i, message) in batch.iter().enumerate() {
                if self.config.yield_every > 0 && i > 0 && i % self.config.yield_every == 0 {
                    tokio::time::sleep(Duration::from_millis(self.config.yield_pause_ms)).await;
                }
                match log.append(&PersistedRecord::from(message)).await.map_err(storage)? {
                    AppendOutcome::Written => persisted += 1,
                    AppendOutcome::Duplicate => report.skipped += 1,
                }
            }

            cursor = advance(cursor, &batch);
            report.batches += 1;
            report.fetched += batch.len();
            report.persisted += persisted;
            report.cursor = cursor;

            debug!(channel = %channel, fetched = batch.len(), persisted, cursor = ?cursor, "Backfill batch done");
            self.event_bus.publish(DomainEvent::BackfillBatch {
                channel: channel.to_string(),
                fetched: batch.len(),
                persisted,
                cursor,
                timestamp: Utc::now(),
            });

            if !pause(Duration::from_millis(self.config.batch_pause_ms), cancel).await {
                report.cancelled = true;
                break;
            }
        }

        info!(
            channel = %channel,
            batches = report.batches,
            persisted = report.persisted,
            skipped = report.skipped,
            cancelled = report.cancelled,
            "Backfill finished"
        );
        Ok(report)
    }

    /// One batch at `cursor`. Rate limits wait and retry the same request;
    /// transient faults retry up to `fetch_retries` times. `None` means
    /// cancellation arrived while waiting.
    async fn fetch_batch(
        &self,
        channel: &ChannelRef,
        cursor: Option<DateTime<Utc>>,
        cancel: &CancellationSignal,
    ) -> Result<Option<Vec<PlatformMessage>>, BackfillError> {
        let mut failures = 0u32;

        loop {
            let delay = match self.platform.fetch_history(channel, cursor, self.batch_size()).await {
                Ok(batch) => return Ok(Some(batch)),
                Err(ChannelError::RateLimited { retry_after_ms }) => {
                    let wait = retry_after_ms.unwrap_or(self.config.rate_limit_default_ms);
                    warn!(channel = %channel, wait_ms = wait, "Rate limited, retrying the same batch");
                    Duration::from_millis(wait)
                }
                Err(e) if e.is_transient() && failures < self.config.fetch_retries => {
                    failures += 1;
                    warn!(
                        channel = %channel,
                        attempt = failures,
                        error = %e,
                        "History fetch failed, retrying"
                    );
                    FETCH_RETRY_BACKOFF * failures
                }
                Err(source) => {
                    return Err(BackfillError::Fetch {
                        channel: channel.to_string(),
                        cursor,
                        attempts: failures + 1,
                        source,
                    });
                }
            };

            if !pause(delay, cancel).await {
                return Ok(None);
            }
        }
    }

    /// Start a background run for `channel` unless one is already going.
    pub fn run_if_idle(&self, channel: ChannelRef) -> Option<JoinHandle<()>> {
        let guard = InFlight::claim(&self.in_flight, &channel)?;
        let engine = self.clone();

        Some(tokio::spawn(async move {
            let _guard = guard;
            if let Err(e) = engine.run(&channel, &engine.shutdown).await {
                error!(channel = %channel, error = %e, "Backfill aborted");
            }
        }))
    }

    /// One background run per watched channel.
    pub fn spawn_watchers(
        &self,
        channels: Vec<ChannelRef>,
        shutdown: &CancellationSignal,
    ) -> Vec<JoinHandle<()>> {
        channels
            .into_iter()
            .filter_map(|channel| {
                let guard = InFlight::claim(&self.in_flight, &channel)?;
                let engine = self.clone();
                let cancel = shutdown.clone();
                Some(tokio::spawn(async move {
                    let _guard = guard;
                    match engine.run(&channel, &cancel).await {
                        Ok(report) => info!(channel = %channel, persisted = report.persisted, "Watcher finished"),
                        Err(e) => error!(channel = %channel, error = %e, "Backfill aborted"),
                    }
                }))
            })
            .collect()
    }

    pub fn is_running(&self, channel: &ChannelRef) -> bool {
        self.in_flight
            .lock()
            .map(|set| set.contains(channel))
            .unwrap_or(false)
    }
}

/// Next cursor: one millisecond past the newest message of the batch, never
/// moving backwards.
///
/// A full page that ends partway through a millisecond loses the rest of
/// that millisecond; the platform cannot page below millisecond resolution
/// by time.
fn advance(cursor: Option<DateTime<Utc>>, batch: &[PlatformMessage]) -> Option<DateTime<Utc>> {
    let Some(newest) = batch.iter().map(|m| m.timestamp).max() else {
        return cursor;
    };
    let next = newest + chrono::Duration::milliseconds(1);
    Some(cursor.map_or(next, |current| current.max(next)))
}

/// Sleep unless cancelled first. Returns `false` on cancellation.
async fn pause(duration: Duration, cancel: &CancellationSignal) -> bool {
    if duration.is_zero() {
        return !cancel.is_cancelled();
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.cancelled() => false,
    }
}

/// Membership in the in-flight set, released on drop.
struct InFlight {
    set: Arc<Mutex<HashSet<ChannelRef>>>,
    channel: ChannelRef,
}

impl InFlight {
    fn claim(set: &Arc<Mutex<HashSet<ChannelRef>>>, channel: &ChannelRef) -> Option<Self> {
        let mut guard = set.lock().ok()?;
        if !guard.insert(channel.clone()) {
            debug!(channel = %channel, "Backfill already running, skipping");
            return None;
        }
        Some(Self {
            set: Arc::clone(set),
            channel: channel.clone(),
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        if let Ok(mut set) = self.set.lock() {
            set.remove(&self.channel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{at, message, HistoryPlatform};
    use chatrelay_core::record::{AuthorClass, RecordOrigin};
    use chrono::Duration as ChronoDuration;

    fn history() -> Vec<PlatformMessage> {
        (1..=5).map(|n| message("general", &n.to_string(), n)).collect()
    }

    fn config(batch_size: u32) -> BackfillConfig {
        BackfillConfig {
            batch_size,
            ..Default::default()
        }
    }

    fn engine(platform: Arc<HistoryPlatform>, dir: &tempfile::TempDir, config: BackfillConfig) -> BackfillEngine {
        BackfillEngine::new(platform, Arc::new(LogStore::open(dir.path())), config)
    }

    fn general() -> ChannelRef {
        ChannelRef::new("general")
    }

    async fn persisted_ids(engine: &BackfillEngine) -> Vec<String> {
        let log = engine.store().log("general").await.unwrap();
        log.read_records()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.message_id)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn drains_history_in_batches() {
        let dir = tempfile::tempdir().unwrap();
        let platform = Arc::new(HistoryPlatform::new(history()));
        let engine = engine(platform.clone(), &dir, config(2));

        let report = engine.run(&general(), &CancellationSignal::never()).await.unwrap();

        assert_eq!(report.batches, 3);
        assert_eq!(report.fetched, 5);
        assert_eq!(report.persisted, 5);
        assert_eq!(report.skipped, 0);
        assert!(!report.cancelled);
        assert_eq!(report.cursor, Some(at(5) + ChronoDuration::milliseconds(1)));
        assert_eq!(persisted_ids(&engine).await, vec!["1", "2", "3", "4", "5"]);

        // The empty fourth batch ends the run
        let cursors = platform.cursors();
        assert_eq!(cursors.len(), 4);
        assert_eq!(cursors[0], None);
        assert_eq!(cursors[1], Some(at(2) + ChronoDuration::milliseconds(1)));
        assert!(cursors.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_batch_is_retried_with_same_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let platform = Arc::new(
            HistoryPlatform::new(history())
                .fail_request(1, ChannelError::RateLimited { retry_after_ms: Some(250) }),
        );
        let engine = engine(platform.clone(), &dir, config(2));

        let report = engine.run(&general(), &CancellationSignal::never()).await.unwrap();

        let cursors = platform.cursors();
        assert_eq!(cursors[1], cursors[2]);
        assert_eq!(report.persisted, 5);
        assert_eq!(persisted_ids(&engine).await, vec!["1", "2", "3", "4", "5"]);
    }

    #[tokio::test(start_paused = true)]
    async fn resumes_after_newest_persisted_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LogStore::open(dir.path()));
        for m in &history()[..3] {
            store.append("general", &PersistedRecord::from(m)).await.unwrap();
        }
        let platform = Arc::new(HistoryPlatform::new(history()));
        let engine = BackfillEngine::new(platform.clone(), store, config(100));

        let report = engine.run(&general(), &CancellationSignal::never()).await.unwrap();

        assert_eq!(platform.cursors()[0], Some(at(3)));
        assert_eq!(report.fetched, 2);
        assert_eq!(report.persisted, 2);
        assert_eq!(report.skipped, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn live_saves_do_not_move_the_start() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(LogStore::open(dir.path()));
        store
            .append("general", &PersistedRecord::from(&history()[0]))
            .await
            .unwrap();
        let reply = PersistedRecord {
            timestamp: at(100),
            author: "assistant".into(),
            content: "hello".into(),
            message_id: "reply-1".into(),
            author_class: AuthorClass::Assistant,
            origin: RecordOrigin::Live,
        };
        store.append("general", &reply).await.unwrap();

        let platform = Arc::new(HistoryPlatform::new(history()));
        let engine = BackfillEngine::new(platform.clone(), store, config(100));
        let report = engine.run(&general(), &CancellationSignal::never()).await.unwrap();

        assert_eq!(platform.cursors()[0], Some(at(1)));
        assert_eq!(report.persisted, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn rerun_persists_nothing_new() {
        let dir = tempfile::tempdir().unwrap();
        let platform = Arc::new(HistoryPlatform::new(history()));
        let engine = engine(platform, &dir, config(2));

        engine.run(&general(), &CancellationSignal::never()).await.unwrap();
        let second = engine.run(&general(), &CancellationSignal::never()).await.unwrap();

        assert_eq!(second.persisted, 0);
        assert_eq!(second.batches, 0);
        assert_eq!(persisted_ids(&engine).await.len(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn configured_start_applies_to_empty_logs() {
        let dir = tempfile::tempdir().unwrap();
        let platform = Arc::new(HistoryPlatform::new(history()));
        let config = BackfillConfig {
            start: Some(at(2).to_rfc3339()),
            ..Default::default()
        };
        let engine = engine(platform.clone(), &dir, config);

        let report = engine.run(&general(), &CancellationSignal::never()).await.unwrap();

        assert_eq!(platform.cursors()[0], Some(at(2)));
        assert_eq!(report.persisted, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_fault_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let platform = Arc::new(
            HistoryPlatform::new(history())
                .fail_request(0, ChannelError::ConnectionLost("reset".into())),
        );
        let engine = engine(platform.clone(), &dir, config(100));

        let report = engine.run(&general(), &CancellationSignal::never()).await.unwrap();

        assert_eq!(report.persisted, 5);
        assert_eq!(platform.cursors()[0], platform.cursors()[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_fault_aborts_and_keeps_progress() {
        let dir = tempfile::tempdir().unwrap();
        let platform = Arc::new(HistoryPlatform::new(history()).fail_request(
            1,
            ChannelError::ApiError {
                status_code: 403,
                message: "Missing Access".into(),
            },
        ));
        let engine = engine(platform, &dir, config(2));

        let err = engine.run(&general(), &CancellationSignal::never()).await.unwrap_err();
        match err {
            BackfillError::Fetch { attempts, cursor, .. } => {
                assert_eq!(attempts, 1);
                assert_eq!(cursor, Some(at(2) + ChronoDuration::milliseconds(1)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(persisted_ids(&engine).await, vec!["1", "2"]);

        // A fresh run picks up after the persisted records
        let platform = Arc::new(HistoryPlatform::new(history()));
        let retry = BackfillEngine::new(platform.clone(), engine.store().clone(), config(2));
        let report = retry.run(&general(), &CancellationSignal::never()).await.unwrap();
        assert_eq!(platform.cursors()[0], Some(at(2)));
        assert_eq!(report.persisted, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_start_fetches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let platform = Arc::new(HistoryPlatform::new(history()));
        let engine = engine(platform.clone(), &dir, config(2));
        let shutdown = Shutdown::new();
        shutdown.cancel();

        let report = engine.run(&general(), &shutdown.signal()).await.unwrap();

        assert!(report.cancelled);
        assert!(platform.cursors().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_rate_limit_wait() {
        let dir = tempfile::tempdir().unwrap();
        let platform = Arc::new(
            HistoryPlatform::new(history())
                .fail_request(0, ChannelError::RateLimited { retry_after_ms: Some(60_000) }),
        );
        let engine = engine(platform.clone(), &dir, config(2));
        let shutdown = Shutdown::new();
        let signal = shutdown.signal();

        let handle = tokio::spawn(async move { engine.run(&general(), &signal).await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        shutdown.cancel();

        let report = handle.await.unwrap().unwrap();
        assert!(report.cancelled);
        assert_eq!(report.persisted, 0);
        assert_eq!(platform.cursors().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn run_if_idle_skips_busy_channel() {
        let dir = tempfile::tempdir().unwrap();
        let platform = Arc::new(
            HistoryPlatform::new(history())
                .fail_request(0, ChannelError::RateLimited { retry_after_ms: Some(60_000) }),
        );
        let shutdown = Shutdown::new();
        let engine = engine(platform, &dir, config(100)).with_shutdown(shutdown.signal());

        let first = engine.run_if_idle(general()).expect("first run starts");
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(engine.is_running(&general()));
        assert!(engine.run_if_idle(general()).is_none());

        shutdown.cancel();
        first.await.unwrap();
        assert!(!engine.is_running(&general()));
    }

    #[tokio::test(start_paused = true)]
    async fn watchers_cover_every_channel() {
        let dir = tempfile::tempdir().unwrap();
        let mut messages = history();
        messages.push(message("random", "r1", 1));
        let platform = Arc::new(HistoryPlatform::new(messages));
        let engine = engine(platform, &dir, config(100));

        let handles = engine.spawn_watchers(
            vec![general(), ChannelRef::new("random")],
            &CancellationSignal::never(),
        );
        assert_eq!(handles.len(), 2);
        for handle in handles {
            handle.await.unwrap();
        }

        let stats = engine.store().statistics().await.unwrap();
        assert_eq!(stats.total_persisted, 6);
    }

    #[test]
    fn cursor_never_moves_backwards() {
        let later = at(10);
        let batch = vec![message("general", "1", 1)];
        assert_eq!(advance(Some(later), &batch), Some(later));
        assert_eq!(advance(None, &batch), Some(at(1) + ChronoDuration::milliseconds(1)));
        assert_eq!(advance(Some(later), &[]), Some(later));
    }
}
