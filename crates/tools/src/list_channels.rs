//! Channel listing.

use async_trait::async_trait;
use chatrelay_core::error::ToolError;
use chatrelay_core::platform::ChatPlatform;
use chatrelay_core::tool::{Arguments, CapabilityProvider};
use std::sync::Arc;

use crate::platform_failure;

pub struct ListChannelsTool {
    platform: Arc<dyn ChatPlatform>,
}

impl ListChannelsTool {
    pub fn new(platform: Arc<dyn ChatPlatform>) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl CapabilityProvider for ListChannelsTool {
    fn name(&self) -> &str {
        "list_channels"
    }

    fn description(&self) -> &str {
        "List the channels of this server with their ids, names and kinds."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _arguments: &Arguments) -> Result<serde_json::Value, ToolError> {
        let channels = self
            .platform
            .list_channels()
            .await
            .map_err(|e| platform_failure(self.name(), e))?;
        serde_json::to_value(channels).map_err(|e| platform_failure(self.name(), e))
    }
}
