//! Capability providers for chatrelay.
//!
//! Read-only lookups the model may request before answering:
//!
//! - `context_lookup`: search the persisted message logs
//! - `list_channels`: channels visible on the chat platform
//! - `recent_messages`: latest messages of one channel
//! - `member_lookup`: a member by id or name

pub mod context_lookup;
pub mod list_channels;
pub mod member_lookup;
pub mod recent_messages;

#[cfg(test)]
pub(crate) mod test_support;

pub use context_lookup::ContextLookupTool;
pub use list_channels::ListChannelsTool;
pub use member_lookup::MemberLookupTool;
pub use recent_messages::RecentMessagesTool;

use chatrelay_core::error::ToolError;
use chatrelay_core::platform::ChatPlatform;
use chatrelay_core::tool::{Arguments, ToolRegistry};
use chatrelay_memory::LogStore;
use std::sync::Arc;

/// Create a registry with the default providers.
///
/// Platform lookups are only registered when a platform is available; the
/// log search works everywhere.
pub fn default_registry(
    log_store: Arc<LogStore>,
    platform: Option<Arc<dyn ChatPlatform>>,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(ContextLookupTool::new(log_store)));
    if let Some(platform) = platform {
        registry.register(Arc::new(ListChannelsTool::new(platform.clone())));
        registry.register(Arc::new(RecentMessagesTool::new(platform.clone())));
        registry.register(Arc::new(MemberLookupTool::new(platform)));
    }
    registry
}

/// A required string argument. Numbers are accepted and stringified, since
/// models often emit ids unquoted.
pub(crate) fn required_str(arguments: &Arguments, key: &str) -> Result<String, ToolError> {
    match arguments.get(key) {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
        _ => Err(ToolError::InvalidArguments(format!(
            "Missing '{key}' argument"
        ))),
    }
}

/// An optional count, defaulted and clamped into `min..=max`.
pub(crate) fn clamped_limit(
    arguments: &Arguments,
    key: &str,
    default: usize,
    min: usize,
    max: usize,
) -> Result<usize, ToolError> {
    match arguments.get(key) {
        None | Some(serde_json::Value::Null) => Ok(default.clamp(min, max)),
        Some(value) => value
            .as_i64()
            .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
            .map(|n| (n.max(0) as usize).clamp(min, max))
            .ok_or_else(|| ToolError::InvalidArguments(format!("'{key}' must be an integer"))),
    }
}

pub(crate) fn platform_failure(tool_name: &str, error: impl std::fmt::Display) -> ToolError {
    ToolError::ExecutionFailed {
        tool_name: tool_name.into(),
        reason: error.to_string(),
    }
}
