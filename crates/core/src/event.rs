//! Relay events for observers (tests, status reporting, future metrics).
//!
//! Publishing never blocks and never fails: with no subscriber the event is
//! dropped, and a slow subscriber sees `RecvError::Lagged` instead of
//! holding up the relay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    /// A user message entered a conversation
    MessageReceived {
        conversation_id: String,
        author: String,
        content_preview: String,
        timestamp: DateTime<Utc>,
    },

    /// A dispatch loop finished with a user-visible answer
    AnswerProduced {
        conversation_id: String,
        terminal: String,
        rounds: u32,
        timestamp: DateTime<Utc>,
    },

    /// A capability provider was invoked
    ToolExecuted {
        tool_name: String,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// A backfill batch was written through the persisted log
    BackfillBatch {
        channel: String,
        fetched: usize,
        persisted: usize,
        cursor: Option<DateTime<Utc>>,
        timestamp: DateTime<Utc>,
    },

    /// A record could not be written; the write was dropped
    PersistFailed {
        target: String,
        message_id: String,
        error_message: String,
        timestamp: DateTime<Utc>,
    },
}

impl DomainEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessageReceived { .. } => "message_received",
            Self::AnswerProduced { .. } => "answer_produced",
            Self::ToolExecuted { .. } => "tool_executed",
            Self::BackfillBatch { .. } => "backfill_batch",
            Self::PersistFailed { .. } => "persist_failed",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::MessageReceived { timestamp, .. }
            | Self::AnswerProduced { timestamp, .. }
            | Self::ToolExecuted { timestamp, .. }
            | Self::BackfillBatch { timestamp, .. }
            | Self::PersistFailed { timestamp, .. } => *timestamp,
        }
    }
}

/// Broadcast fan-out of [`DomainEvent`]s.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self {
            sender: broadcast::channel(capacity).0,
        }
    }

    pub fn publish(&self, event: DomainEvent) {
        let _ = self.sender.send(Arc::new(event));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
