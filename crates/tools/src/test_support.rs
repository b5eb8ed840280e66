//! In-memory chat platform for provider tests.

use async_trait::async_trait;
use chatrelay_core::error::ChannelError;
use chatrelay_core::platform::{ChannelInfo, ChannelRef, ChatPlatform, MemberInfo, PlatformMessage};
use chrono::{DateTime, Utc};
use std::sync::Mutex;

#[derive(Default)]
pub struct MockPlatform {
    pub channels: Vec<ChannelInfo>,
    pub messages: Vec<PlatformMessage>,
    pub members: Vec<MemberInfo>,
    /// Every call fails with this error when set
    pub failure: Option<ChannelError>,
    pub recent_limits: Mutex<Vec<usize>>,
}

impl MockPlatform {
    fn check(&self) -> Result<(), ChannelError> {
        match &self.failure {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

pub fn message(id: &str, channel: &str, author: &str, content: &str, ts: &str) -> PlatformMessage {
    PlatformMessage {
        id: id.into(),
        channel: ChannelRef::new(channel),
        author: author.into(),
        author_is_bot: false,
        content: content.into(),
        timestamp: ts.parse().unwrap(),
    }
}

#[async_trait]
impl ChatPlatform for MockPlatform {
    fn name(&self) -> &str {
        "mock"
    }

    async fn fetch_history(
        &self,
        channel: &ChannelRef,
        after: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<PlatformMessage>, ChannelError> {
        self.check()?;
        Ok(self
            .messages
            .iter()
            .filter(|m| &m.channel == channel && after.is_none_or(|a| m.timestamp > a))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_channels(&self) -> Result<Vec<ChannelInfo>, ChannelError> {
        self.check()?;
        Ok(self.channels.clone())
    }

    async fn recent_messages(
        &self,
        channel: &ChannelRef,
        limit: usize,
    ) -> Result<Vec<PlatformMessage>, ChannelError> {
        self.check()?;
        self.recent_limits.lock().unwrap().push(limit);
        let in_channel: Vec<_> = self.messages.iter().filter(|m| &m.channel == channel).collect();
        let skip = in_channel.len().saturating_sub(limit);
        Ok(in_channel.into_iter().skip(skip).cloned().collect())
    }

    async fn lookup_member(&self, query: &str) -> Result<Option<MemberInfo>, ChannelError> {
        self.check()?;
        let q = query.to_lowercase();
        Ok(self
            .members
            .iter()
            .find(|m| m.id == query || m.username.to_lowercase().contains(&q))
            .cloned())
    }
}
