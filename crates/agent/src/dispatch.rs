//! The tool dispatch loop.
//!
//! An explicit state machine drives one exchange with the completion
//! service:
//!
//! ```text
//! AwaitingCompletion -> ParseOutput -> ExecuteDirectives -> AwaitingCompletion
//!                                   \-> Final
//! ```
//!
//! Terminal states are `Final`, `DepthExceeded` (the depth bound was hit and
//! the fallback message is returned) and `CompletionFailed` (the completion
//! service stayed unavailable and the apology is returned). Every run yields
//! exactly one answer and never returns an error to the caller.

use chatrelay_config::{AppConfig, RelayConfig};
use chatrelay_core::event::{DomainEvent, EventBus};
use chatrelay_core::message::Turn;
use chatrelay_core::provider::{CompletionProvider, CompletionRequest};
use chatrelay_core::error::{ProviderError, ToolError};
use chatrelay_core::tool::{ToolDirective, ToolRegistry, ToolResult};
use chatrelay_providers::RetryProvider;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::directive::parse_directives;
use crate::window::ContextWindow;

const DEFAULT_FALLBACK: &str =
    "I couldn't finish looking that up. Could you rephrase the question?";
const DEFAULT_APOLOGY: &str =
    "Sorry, I'm having trouble reaching my language model right now. Please try again in a moment.";
const FOLLOW_UP_INSTRUCTION: &str = "Answer the user's last message using the tool results above. \
     Reply in plain language and do not request another tool.";

/// How a dispatch run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalState {
    Final,
    DepthExceeded,
    CompletionFailed,
}

impl TerminalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalState::Final => "final",
            TerminalState::DepthExceeded => "depth_exceeded",
            TerminalState::CompletionFailed => "completion_failed",
        }
    }
}

impl std::fmt::Display for TerminalState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one dispatch run.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    /// The user-visible answer
    pub answer: String,
    pub terminal: TerminalState,
    /// Tool-execution rounds performed
    pub rounds: u32,
    /// Every tool result produced, in order
    pub results: Vec<ToolResult>,
}

enum DispatchState {
    AwaitingCompletion,
    ParseOutput(String),
    ExecuteDirectives(Vec<ToolDirective>),
}

/// Drives the completion service and capability providers for one user turn.
#[derive(Clone)]
pub struct DispatchLoop {
    completion: RetryProvider,
    model: String,
    temperature: f32,
    max_tokens: Option<u32>,
    tools: Arc<ToolRegistry>,
    max_depth: u32,
    tool_timeout: Duration,
    follow_up_instruction: bool,
    fallback_message: String,
    apology_message: String,
    event_bus: Arc<EventBus>,
}

impl DispatchLoop {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        model: impl Into<String>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            completion: RetryProvider::new(provider),
            model: model.into(),
            temperature: 0.7,
            max_tokens: None,
            tools,
            max_depth: 3,
            tool_timeout: Duration::from_secs(15),
            follow_up_instruction: true,
            fallback_message: DEFAULT_FALLBACK.into(),
            apology_message: DEFAULT_APOLOGY.into(),
            event_bus: Arc::new(EventBus::default()),
        }
    }

    /// Build with every knob taken from the loaded configuration.
    pub fn from_config(
        provider: Arc<dyn CompletionProvider>,
        tools: Arc<ToolRegistry>,
        config: &AppConfig,
    ) -> Self {
        Self::new(provider, &config.default_model, tools)
            .with_temperature(config.default_temperature)
            .with_max_tokens(config.default_max_tokens)
            .with_relay_config(&config.relay)
    }

    /// Apply the depth bound, timeouts, retries and canned messages.
    pub fn with_relay_config(self, relay: &RelayConfig) -> Self {
        self.with_max_depth(relay.max_tool_depth)
            .with_completion_timeout(Duration::from_secs(relay.completion_timeout_secs))
            .with_completion_retries(relay.completion_retries)
            .with_tool_timeout(Duration::from_secs(relay.tool_timeout_secs))
            .with_follow_up_instruction(relay.follow_up_instruction)
            .with_fallback_message(&relay.fallback_message)
            .with_apology_message(&relay.apology_message)
    }

    /// Maximum tool-execution rounds before the fallback answer.
    pub fn with_max_depth(mut self, depth: u32) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_completion_timeout(mut self, timeout: Duration) -> Self {
        self.completion = self.completion.with_attempt_timeout(timeout);
        self
    }

    /// Extra attempts for transient completion faults.
    pub fn with_completion_retries(mut self, retries: u32) -> Self {
        self.completion = self.completion.with_retries(retries);
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn with_follow_up_instruction(mut self, enabled: bool) -> Self {
        self.follow_up_instruction = enabled;
        self
    }

    pub fn with_fallback_message(mut self, message: impl Into<String>) -> Self {
        self.fallback_message = message.into();
        self
    }

    pub fn with_apology_message(mut self, message: impl Into<String>) -> Self {
        self.apology_message = message.into();
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Run the loop on a window that already holds the new user turn.
    ///
    /// Every turn appended along the way (model outputs, tool results,
    /// follow-up instructions, the final answer) stays in the window.
    pub async fn run(&self, window: &mut ContextWindow, conversation_id: &str) -> DispatchOutcome {
        let mut rounds = 0u32;
        let mut results = Vec::new();
        let mut state = DispatchState::AwaitingCompletion;

        loop {
            state = match state {
                DispatchState::AwaitingCompletion => {
                    if rounds >= self.max_depth {
                        warn!(
                            conversation_id,
                            depth = rounds,
                            "Tool depth bound reached, answering with fallback"
                        );
                        window.append(Turn::assistant(&self.fallback_message));
                        return DispatchOutcome {
                            answer: self.fallback_message.clone(),
                            terminal: TerminalState::DepthExceeded,
                            rounds,
                            results,
                        };
                    }

                    debug!(conversation_id, depth = rounds, turns = window.len(), "Requesting completion");
                    match self.complete(window).await {
                        Ok(output) => {
                            window.append(Turn::assistant(&output));
                            DispatchState::ParseOutput(output)
                        }
                        Err(e) => {
                            warn!(conversation_id, error = %e, "Completion failed, sending apology");
                            window.append(Turn::assistant(&self.apology_message));
                            return DispatchOutcome {
                                answer: self.apology_message.clone(),
                                terminal: TerminalState::CompletionFailed,
                                rounds,
                                results,
                            };
                        }
                    }
                }

                DispatchState::ParseOutput(output) => match parse_directives(&output) {
                    Some(directives) => DispatchState::ExecuteDirectives(directives),
                    None => {
                        info!(conversation_id, rounds, "Final answer produced");
                        return DispatchOutcome {
                            answer: output,
                            terminal: TerminalState::Final,
                            rounds,
                            results,
                        };
                    }
                },

                DispatchState::ExecuteDirectives(directives) => {
                    debug!(conversation_id, count = directives.len(), depth = rounds, "Executing directives");
                    let round_results = self.execute_all(&directives).await;

                    window.append(Turn::system(render_results(&round_results)));
                    if self.follow_up_instruction {
                        window.append(Turn::system(FOLLOW_UP_INSTRUCTION));
                    }

                    results.extend(round_results);
                    rounds += 1;
                    DispatchState::AwaitingCompletion
                }
            };
        }
    }

    async fn complete(
        &self,
        window: &ContextWindow,
    ) -> Result<String, ProviderError> {
        let request = CompletionRequest {
            model: self.model.clone(),
            turns: window.snapshot(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        let response = self.completion.complete(request).await?;
        Ok(response.content)
    }

    /// Execute directives in order. Never fails: every fault becomes a result.
    async fn execute_all(&self, directives: &[ToolDirective]) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(directives.len());

        for directive in directives {
            let start = Instant::now();
            let outcome = match tokio::time::timeout(self.tool_timeout, self.tools.execute(directive)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ToolError::Timeout {
                    tool_name: directive.name.clone(),
                    timeout_secs: self.tool_timeout.as_secs(),
                }),
            };
            let duration_ms = start.elapsed().as_millis() as u64;

            let result = match outcome {
                Ok(payload) => ToolResult::ok(&directive.name, payload),
                Err(e) => {
                    warn!(tool = %directive.name, error = %e, "Tool execution failed");
                    ToolResult::failed(&directive.name, e.to_string())
                }
            };

            self.event_bus.publish(DomainEvent::ToolExecuted {
                tool_name: directive.name.clone(),
                success: result.is_ok(),
                duration_ms,
                timestamp: chrono::Utc::now(),
            });
            results.push(result);
        }

        results
    }
}

/// One system turn carrying every result of a round.
fn render_results(results: &[ToolResult]) -> String {
    let body = serde_json::to_string_pretty(results).unwrap_or_else(|_| "[]".into());
    format!("Tool results:\n{body}")
}
