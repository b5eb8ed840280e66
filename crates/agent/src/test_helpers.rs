//! Scripted stand-ins for the completion service, capability providers and
//! the chat platform.

use async_trait::async_trait;
use chatrelay_core::error::{ChannelError, ProviderError, ToolError};
use chatrelay_core::platform::{ChannelInfo, ChannelRef, ChatPlatform, MemberInfo, PlatformMessage};
use chatrelay_core::provider::{CompletionProvider, CompletionRequest, CompletionResponse};
use chatrelay_core::tool::{Arguments, CapabilityProvider};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Returns scripted outputs in order, recording every request.
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    repeat: Option<String>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new(script: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            repeat: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Ok(t.to_string())).collect())
    }

    /// Answers every request with the same text.
    pub fn repeating(text: &str) -> Self {
        Self {
            repeat: Some(text.to_string()),
            ..Self::new(Vec::new())
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        let model = request.model.clone();
        self.requests.lock().unwrap().push(request);

        let next = match &self.repeat {
            Some(text) => Ok(text.clone()),
            None => self
                .script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::NotConfigured("script exhausted".into()))),
        };

        next.map(|content| CompletionResponse {
            content,
            model,
            usage: None,
        })
    }
}

/// Echoes its `text` argument.
pub struct EchoTool;

#[async_trait]
impl CapabilityProvider for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes the text argument"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }

    async fn execute(&self, arguments: &Arguments) -> Result<serde_json::Value, ToolError> {
        let text = arguments
            .get("text")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'text' argument".into()))?;
        Ok(serde_json::json!({ "text": text }))
    }
}

/// Never finishes within any sane timeout.
pub struct SlowTool;

#[async_trait]
impl CapabilityProvider for SlowTool {
    fn name(&self) -> &str {
        "slow"
    }

    fn description(&self) -> &str {
        "Takes an hour"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _arguments: &Arguments) -> Result<serde_json::Value, ToolError> {
        tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        Ok(serde_json::Value::Null)
    }
}

/// Instant `n` seconds after a fixed epoch.
pub fn at(n: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + Duration::seconds(n)
}

pub fn message(channel: &str, id: &str, seconds: i64) -> PlatformMessage {
    PlatformMessage {
        id: id.into(),
        channel: ChannelRef::new(channel),
        author: "alice".into(),
        author_is_bot: false,
        content: format!("message {id}"),
        timestamp: at(seconds),
    }
}

/// Serves a fixed history honoring `after` and `limit`, with injectable
/// faults consumed one per request.
pub struct HistoryPlatform {
    history: Vec<PlatformMessage>,
    faults: Mutex<VecDeque<(usize, ChannelError)>>,
    cursors: Mutex<Vec<Option<DateTime<Utc>>>>,
}

impl HistoryPlatform {
    pub fn new(mut history: Vec<PlatformMessage>) -> Self {
        history.sort_by_key(|m| m.timestamp);
        Self {
            history,
            faults: Mutex::new(VecDeque::new()),
            cursors: Mutex::new(Vec::new()),
        }
    }

    /// Fail the request with the given zero-based index.
    pub fn fail_request(self, index: usize, error: ChannelError) -> Self {
        self.faults.lock().unwrap().push_back((index, error));
        self
    }

    /// The `after` argument of every request, in order.
    pub fn cursors(&self) -> Vec<Option<DateTime<Utc>>> {
        self.cursors.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatPlatform for HistoryPlatform {
    fn name(&self) -> &str {
        "history"
    }

    async fn fetch_history(
        &self,
        channel: &ChannelRef,
        after: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<PlatformMessage>, ChannelError> {
        let index = {
            let mut cursors = self.cursors.lock().unwrap();
            cursors.push(after);
            cursors.len() - 1
        };

        {
            let mut faults = self.faults.lock().unwrap();
            if let Some(pos) = faults.iter().position(|(i, _)| *i == index) {
                let (_, error) = faults.remove(pos).unwrap();
                return Err(error);
            }
        }

        Ok(self
            .history
            .iter()
            .filter(|m| &m.channel == channel)
            .filter(|m| after.is_none_or(|a| m.timestamp > a))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn list_channels(&self) -> Result<Vec<ChannelInfo>, ChannelError> {
        Ok(Vec::new())
    }

    async fn recent_messages(
        &self,
        _channel: &ChannelRef,
        _limit: usize,
    ) -> Result<Vec<PlatformMessage>, ChannelError> {
        Ok(Vec::new())
    }

    async fn lookup_member(&self, _query: &str) -> Result<Option<MemberInfo>, ChannelError> {
        Ok(None)
    }
}
