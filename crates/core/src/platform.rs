//! ChatPlatform trait: read-only access to the chat platform's records.
//!
//! The relay never talks to the platform's gateway directly. What it needs
//! is history paging (for backfill) and a handful of lookups the model can
//! request through capability providers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::ChannelError;

/// A reference to one channel (or thread) on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelRef(pub String);

impl ChannelRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message as stored by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformMessage {
    pub id: String,
    pub channel: ChannelRef,
    pub author: String,
    #[serde(default)]
    pub author_is_bot: bool,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// A channel listing entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInfo {
    pub id: String,
    pub name: String,
    /// Platform-specific kind ("text", "voice", "thread", ...)
    pub kind: String,
}

/// A member/user lookup result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub id: String,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub bot: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joined_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
}

/// Read API of a chat platform.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Platform name (e.g., "discord").
    fn name(&self) -> &str;

    /// Fetch up to `limit` messages with timestamp strictly after `after`
    /// (or from the beginning when `None`), oldest first.
    ///
    /// A throttling response is reported as [`ChannelError::RateLimited`].
    async fn fetch_history(
        &self,
        channel: &ChannelRef,
        after: Option<DateTime<Utc>>,
        limit: usize,
    ) -> std::result::Result<Vec<PlatformMessage>, ChannelError>;

    /// List the channels visible to the bot.
    async fn list_channels(&self) -> std::result::Result<Vec<ChannelInfo>, ChannelError>;

    /// The most recent `limit` messages of a channel, oldest first.
    async fn recent_messages(
        &self,
        channel: &ChannelRef,
        limit: usize,
    ) -> std::result::Result<Vec<PlatformMessage>, ChannelError>;

    /// Look up a member by id or (partial) name.
    async fn lookup_member(&self, query: &str) -> std::result::Result<Option<MemberInfo>, ChannelError>;
}
