//! Context lookup: search the persisted message logs.
//!
//! Gives the model access to conversation history older than what fits in
//! the window, including backfilled channel history.

use async_trait::async_trait;
use chatrelay_core::error::ToolError;
use chatrelay_core::tool::{Arguments, CapabilityProvider};
use chatrelay_memory::LogStore;
use std::sync::Arc;

use crate::{clamped_limit, platform_failure, required_str};

pub struct ContextLookupTool {
    store: Arc<LogStore>,
}

impl ContextLookupTool {
    pub fn new(store: Arc<LogStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CapabilityProvider for ContextLookupTool {
    fn name(&self) -> &str {
        "context_lookup"
    }

    fn description(&self) -> &str {
        "Search saved chat history for messages containing a word or phrase. \
         Returns the newest matches first."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Text to look for in message content or author names"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of messages to return (default 10)",
                    "default": 10
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: &Arguments) -> Result<serde_json::Value, ToolError> {
        let query = required_str(arguments, "query")?;
        let limit = clamped_limit(arguments, "limit", 10, 1, 50)?;

        let records = self
            .store
            .search(&query, limit)
            .await
            .map_err(|e| platform_failure(self.name(), e))?;

        Ok(serde_json::Value::Array(
            records
                .into_iter()
                .map(|r| {
                    serde_json::json!({
                        "timestamp": r.timestamp.to_rfc3339(),
                        "author": r.author,
                        "content": r.content,
                    })
                })
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatrelay_core::record::{AuthorClass, PersistedRecord, RecordOrigin};
    use serde_json::json;

    async fn seeded_store(dir: &std::path::Path) -> Arc<LogStore> {
        let store = Arc::new(LogStore::open(dir));
        for (id, content, ts) in [
            ("1", "the release is friday", "2026-02-01T10:00:00Z"),
            ("2", "pizza for lunch", "2026-02-01T11:00:00Z"),
            ("3", "release moved to monday", "2026-02-02T09:00:00Z"),
        ] {
            store
                .append(
                    "general",
                    &PersistedRecord {
                        timestamp: ts.parse().unwrap(),
                        author: "alice".into(),
                        content: content.into(),
                        message_id: id.into(),
                        author_class: AuthorClass::User,
                        origin: RecordOrigin::History,
                    },
                )
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn finds_matches_newest_first() {
        let dir = tempfile::TempDir::new().unwrap();
        let tool = ContextLookupTool::new(seeded_store(dir.path()).await);

        let args = json!({"query": "release"}).as_object().cloned().unwrap();
        let result = tool.execute(&args).await.unwrap();
        let items = result.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["content"], "release moved to monday");
        assert_eq!(items[1]["author"], "alice");
    }

    #[tokio::test]
    async fn respects_limit() {
        let dir = tempfile::TempDir::new().unwrap();
        let tool = ContextLookupTool::new(seeded_store(dir.path()).await);

        let args = json!({"query": "e", "limit": 1}).as_object().cloned().unwrap();
        let result = tool.execute(&args).await.unwrap();
        assert_eq!(result.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn no_matches_is_an_empty_list() {
        let dir = tempfile::TempDir::new().unwrap();
        let tool = ContextLookupTool::new(seeded_store(dir.path()).await);

        let args = json!({"query": "kubernetes"}).as_object().cloned().unwrap();
        assert_eq!(tool.execute(&args).await.unwrap(), json!([]));
    }

    #[tokio::test]
    async fn missing_query() {
        let dir = tempfile::TempDir::new().unwrap();
        let tool = ContextLookupTool::new(Arc::new(LogStore::open(dir.path())));
        let err = tool.execute(&Arguments::new()).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
