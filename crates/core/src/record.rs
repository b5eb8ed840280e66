//! Persisted message records.
//!
//! One record per chat message, written once to an append-only log and
//! never edited. The `message_id` is the idempotence key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::platform::PlatformMessage;

/// Who wrote a persisted message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorClass {
    /// A human on the chat platform
    #[default]
    User,
    /// Another bot account on the platform
    Bot,
    /// This relay's own replies
    Assistant,
}

impl AuthorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorClass::User => "user",
            AuthorClass::Bot => "bot",
            AuthorClass::Assistant => "assistant",
        }
    }
}

/// How a record reached the log.
///
/// Only `History` records say anything about how far the platform's history
/// has been copied; live saves can run ahead of it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordOrigin {
    /// Fetched from the platform's message history
    #[default]
    History,
    /// Saved by the relay as the conversation happened
    Live,
}

/// A single line of the persisted log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRecord {
    /// When the message was posted (ISO-8601 on disk)
    pub timestamp: DateTime<Utc>,

    /// Display name of the author
    pub author: String,

    /// Message text
    pub content: String,

    /// Platform message id (or a generated id for live-saved turns)
    #[serde(rename = "messageId", alias = "message_id")]
    pub message_id: String,

    #[serde(default)]
    pub author_class: AuthorClass,

    #[serde(default)]
    pub origin: RecordOrigin,
}

impl From<&PlatformMessage> for PersistedRecord {
    fn from(msg: &PlatformMessage) -> Self {
        Self {
            timestamp: msg.timestamp,
            author: msg.author.clone(),
            content: msg.content.clone(),
            message_id: msg.id.clone(),
            author_class: if msg.author_is_bot {
                AuthorClass::Bot
            } else {
                AuthorClass::User
            },
            origin: RecordOrigin::History,
        }
    }
}
