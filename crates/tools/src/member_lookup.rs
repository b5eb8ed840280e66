//! Member lookup by id, mention or name.

use async_trait::async_trait;
use chatrelay_core::error::ToolError;
use chatrelay_core::platform::ChatPlatform;
use chatrelay_core::tool::{Arguments, CapabilityProvider};
use std::sync::Arc;

use crate::{platform_failure, required_str};

pub struct MemberLookupTool {
    platform: Arc<dyn ChatPlatform>,
}

impl MemberLookupTool {
    pub fn new(platform: Arc<dyn ChatPlatform>) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl CapabilityProvider for MemberLookupTool {
    fn name(&self) -> &str {
        "member_lookup"
    }

    fn description(&self) -> &str {
        "Look up a server member by user id, mention or (partial) name. \
         Returns their username, display name, roles and join date."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "User id, <@mention> or name to search for"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: &Arguments) -> Result<serde_json::Value, ToolError> {
        let query = required_str(arguments, "query")?;

        match self.platform.lookup_member(&query).await {
            Ok(Some(member)) => {
                serde_json::to_value(member).map_err(|e| platform_failure(self.name(), e))
            }
            Ok(None) => Err(platform_failure(self.name(), "member not found")),
            Err(e) => Err(platform_failure(self.name(), e)),
        }
    }
}
