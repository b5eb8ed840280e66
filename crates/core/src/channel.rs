//! Inbound channels: interactive sources of user lines.
//!
//! The Discord gateway (presence, mentions, message splitting) lives outside
//! this workspace and talks to the relay over HTTP. A `Channel` is the
//! in-process alternative; the terminal is the only built-in one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::error::ChannelError;
use crate::message::ConversationId;

/// One line of user input, addressed to a conversation.
#[derive(Debug, Clone)]
pub struct ChannelMessage {
    pub conversation_id: ConversationId,
    pub author: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl ChannelMessage {
    pub fn new(
        conversation_id: ConversationId,
        author: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id,
            author: author.into(),
            text: text.into(),
            received_at: Utc::now(),
        }
    }
}

pub type ChannelStream = mpsc::Receiver<Result<ChannelMessage, ChannelError>>;

#[async_trait]
pub trait Channel: Send + Sync {
    fn name(&self) -> &str;

    /// Start reading input. The stream ends when the user leaves.
    async fn start(&self) -> Result<ChannelStream, ChannelError>;

    /// Deliver a reply into a conversation.
    async fn send(&self, conversation: &ConversationId, text: &str) -> Result<(), ChannelError>;

    async fn stop(&self) -> Result<(), ChannelError> {
        Ok(())
    }
}
