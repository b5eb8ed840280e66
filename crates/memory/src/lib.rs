//! Persisted message log for chatrelay.
//!
//! Every chat message the relay sees, live or backfilled, ends up as one
//! JSON line in a per-target log file. The log doubles as the ledger of
//! processed message ids: ids are indexed in memory when a log is opened.

pub mod persisted_log;
pub mod store;

pub use persisted_log::{AppendOutcome, PersistedLog};
pub use store::{LogStore, Statistics};
