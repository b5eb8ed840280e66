//! Terminal channel for `chatrelay chat`.
//!
//! Every non-empty stdin line becomes a message from one configured author
//! in one conversation. Replies go to stdout.

use async_trait::async_trait;
use chatrelay_core::channel::{Channel, ChannelMessage, ChannelStream};
use chatrelay_core::error::ChannelError;
use chatrelay_core::message::ConversationId;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

pub struct CliChannel {
    author: String,
    conversation: ConversationId,
}

impl CliChannel {
    pub fn new() -> Self {
        Self {
            author: "user".into(),
            conversation: ConversationId("cli".into()),
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_conversation(mut self, conversation: impl Into<String>) -> Self {
        self.conversation = ConversationId(conversation.into());
        self
    }

    /// The message for one typed line, or `None` for blank input.
    fn message_for(&self, line: &str) -> Option<ChannelMessage> {
        let text = line.trim();
        if text.is_empty() {
            return None;
        }
        Some(ChannelMessage::new(
            self.conversation.clone(),
            &self.author,
            text,
        ))
    }
}

impl Default for CliChannel {
    fn default() -> Self {
        Self::new()
    }
}

/// Lines that end the session.
pub fn is_exit_command(line: &str) -> bool {
    matches!(line.trim(), "exit" | "quit" | "/exit" | "/quit" | ":q")
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn start(&self) -> Result<ChannelStream, ChannelError> {
        let (tx, rx) = mpsc::channel(32);
        let channel = Self {
            author: self.author.clone(),
            conversation: self.conversation.clone(),
        };

        tokio::spawn(async move {
            let mut lines = BufReader::new(io::stdin()).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if is_exit_command(&line) => break,
                    Ok(Some(line)) => {
                        let Some(msg) = channel.message_for(&line) else {
                            continue;
                        };
                        if tx.send(Ok(msg)).await.is_err() {
                            break;
                        }
                    }
                    // EOF (Ctrl+D)
                    Ok(None) => break,
                    Err(e) => {
                        let _ = tx.send(Err(ChannelError::ConnectionLost(e.to_string()))).await;
                        break;
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn send(&self, _conversation: &ConversationId, text: &str) -> Result<(), ChannelError> {
        for line in text.lines() {
            println!("  Assistant > {line}");
        }
        Ok(())
    }
}
