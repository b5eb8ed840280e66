//! Capability providers: the lookups the model may request before answering.
//!
//! The model asks for a lookup by emitting a [`ToolDirective`]; the dispatch
//! loop resolves it against the [`ToolRegistry`] and always produces a
//! [`ToolResult`], whether the provider succeeded, failed or does not exist.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use crate::error::ToolError;

/// Argument mapping carried by a directive.
pub type Arguments = serde_json::Map<String, serde_json::Value>;

/// A structured request parsed out of model output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDirective {
    /// Name of the capability provider to invoke
    pub name: String,

    /// Arguments as a JSON object
    #[serde(default)]
    pub arguments: Arguments,
}

impl ToolDirective {
    pub fn new(name: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// The outcome of one directive. Failures live in `error`, never in a `Result`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The directive name this result answers
    pub name: String,

    /// Structured payload (null on failure)
    pub payload: serde_json::Value,

    /// Error text if the provider was missing or failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
            error: None,
        }
    }

    pub fn failed(name: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            payload: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Describes a provider to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The directive name
    pub name: String,

    /// Description of what the provider returns
    pub description: String,

    /// JSON Schema describing the arguments
    pub parameters: serde_json::Value,
}

/// The core capability trait.
///
/// Providers are read-only: they look things up on the chat platform or in
/// the persisted log and return a plain JSON value.
#[async_trait]
pub trait CapabilityProvider: Send + Sync {
    /// The unique directive name (e.g., "list_channels").
    fn name(&self) -> &str;

    /// A description of what this provider does (shown to the model).
    fn description(&self) -> &str;

    /// JSON Schema describing this provider's arguments.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Run the lookup.
    async fn execute(&self, arguments: &Arguments) -> std::result::Result<serde_json::Value, ToolError>;

    /// Convert this provider into a ToolDefinition for the catalogue prompt.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Registered capability providers keyed by directive name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    providers: BTreeMap<String, Arc<dyn CapabilityProvider>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider. Replaces any existing provider with the same name.
    pub fn register(&mut self, provider: Arc<dyn CapabilityProvider>) {
        let name = provider.name().to_string();
        self.providers.insert(name, provider);
    }

    /// Get a provider by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn CapabilityProvider>> {
        self.providers.get(name)
    }

    /// All definitions, ordered by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.providers.values().map(|p| p.to_definition()).collect()
    }

    /// Execute a directive.
    pub async fn execute(&self, directive: &ToolDirective) -> std::result::Result<serde_json::Value, ToolError> {
        let provider = self
            .providers
            .get(&directive.name)
            .ok_or_else(|| ToolError::NotFound(directive.name.clone()))?;
        provider.execute(&directive.arguments).await
    }

    /// List all registered names.
    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    /// System text telling the model which lookups exist and how to ask
    /// for them. Pinned after the personality prompt.
    pub fn catalogue_prompt(&self) -> String {
        let mut prompt = String::from(
            "You can look things up before answering. Available tools:\n",
        );
        for def in self.definitions() {
            prompt.push_str(&format!(
                "- {}: {}\n  arguments: {}\n",
                def.name, def.description, def.parameters
            ));
        }
        prompt.push_str(
            "\nTo use a tool, reply with ONLY a JSON object and nothing else, for example:\n\
             {\"name\": \"list_channels\", \"arguments\": {}}\n\
             To use several tools at once, reply with ONLY a JSON array of such objects. \
             You may wrap the JSON in a single ```tool code block. \
             Any reply that is not exactly a tool request is shown to the user as your answer, \
             so never mix a tool request with prose.",
        );
        prompt
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
