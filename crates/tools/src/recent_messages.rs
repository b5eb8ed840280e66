//! Recent messages of one channel.

use async_trait::async_trait;
use chatrelay_core::error::ToolError;
use chatrelay_core::platform::{ChannelRef, ChatPlatform};
use chatrelay_core::tool::{Arguments, CapabilityProvider};
use std::sync::Arc;

use crate::{clamped_limit, platform_failure, required_str};

const MAX_MESSAGES: usize = 50;

pub struct RecentMessagesTool {
    platform: Arc<dyn ChatPlatform>,
}

impl RecentMessagesTool {
    pub fn new(platform: Arc<dyn ChatPlatform>) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl CapabilityProvider for RecentMessagesTool {
    fn name(&self) -> &str {
        "recent_messages"
    }

    fn description(&self) -> &str {
        "Fetch the most recent messages of a channel, oldest first (1 to 50 messages)."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "channel_id": {
                    "type": "string",
                    "description": "Id of the channel (see list_channels)"
                },
                "limit": {
                    "type": "integer",
                    "description": "How many messages to fetch (default 10, max 50)",
                    "default": 10
                }
            },
            "required": ["channel_id"]
        })
    }

    async fn execute(&self, arguments: &Arguments) -> Result<serde_json::Value, ToolError> {
        let channel = ChannelRef::new(required_str(arguments, "channel_id")?);
        let limit = clamped_limit(arguments, "limit", 10, 1, MAX_MESSAGES)?;

        let messages = self
            .platform
            .recent_messages(&channel, limit)
            .await
            .map_err(|e| platform_failure(self.name(), e))?;

        Ok(serde_json::Value::Array(
            messages
                .into_iter()
                .map(|m| {
                    serde_json::json!({
                        "id": m.id,
                        "author": m.author,
                        "content": m.content,
                        "timestamp": m.timestamp.to_rfc3339(),
                    })
                })
                .collect(),
        ))
    }
}
