//! Configuration loading, validation, and management for chatrelay.
//!
//! Loads configuration from `~/.chatrelay/config.toml`, then a `.env` file
//! if one is present, then environment variable overrides. Validates all
//! settings at startup; an invalid file is a fatal configuration fault.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Number of turns the relay pins at the head of every conversation window:
/// the system prompt and the capability catalogue.
pub const PINNED_TURNS: usize = 2;

/// The root configuration structure.
///
/// Maps directly to `~/.chatrelay/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default completion provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per completion
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Verbose logging
    #[serde(default)]
    pub debug: bool,

    /// Conversation and dispatch behavior
    #[serde(default)]
    pub relay: RelayConfig,

    /// Discord connection
    #[serde(default)]
    pub discord: DiscordConfig,

    /// Persisted log location
    #[serde(default)]
    pub storage: StorageConfig,

    /// History backfill
    #[serde(default)]
    pub backfill: BackfillConfig,

    /// HTTP gateway
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "ollama".into()
}
fn default_model() -> String {
    "llama3.2".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_true() -> bool {
    true
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("debug", &self.debug)
            .field("relay", &self.relay)
            .field("discord", &self.discord)
            .field("storage", &self.storage)
            .field("backfill", &self.backfill)
            .field("gateway", &self.gateway)
            .field("providers", &self.providers)
            .finish()
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Personality prompt, pinned as the first turn of every conversation
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Maximum turns kept per conversation, pinned prefix included
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,

    /// Tool-execution rounds allowed before the fallback answer
    #[serde(default = "default_max_tool_depth")]
    pub max_tool_depth: u32,

    #[serde(default = "default_completion_timeout")]
    pub completion_timeout_secs: u64,

    /// Extra attempts for a completion call that failed transiently
    #[serde(default = "default_completion_retries")]
    pub completion_retries: u32,

    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    /// Follow tool results with an instruction to answer from them
    #[serde(default = "default_true")]
    pub follow_up_instruction: bool,

    #[serde(default = "default_fallback_message")]
    pub fallback_message: String,

    #[serde(default = "default_apology_message")]
    pub apology_message: String,

    #[serde(default = "default_empty_message_reply")]
    pub empty_message_reply: String,

    /// Render user turns as `"{author}: {text}"`
    #[serde(default = "default_true")]
    pub prefix_author: bool,

    /// Save inbound messages and replies to the persisted log
    #[serde(default = "default_true")]
    pub persist_live: bool,

    /// Trigger a channel backfill after each inbound message
    #[serde(default)]
    pub backfill_on_message: bool,
}

fn default_system_prompt() -> String {
    "You are a helpful assistant in a Discord server. Be friendly, concise and \
     accurate. Several people may talk to you in the same channel; their \
     messages are prefixed with their names."
        .into()
}
fn default_history_cap() -> usize {
    20
}
fn default_max_tool_depth() -> u32 {
    3
}
fn default_completion_timeout() -> u64 {
    120
}
fn default_completion_retries() -> u32 {
    2
}
fn default_tool_timeout() -> u64 {
    15
}
fn default_fallback_message() -> String {
    "I looked that up several times but couldn't settle on an answer. Could you rephrase the question?"
        .into()
}
fn default_apology_message() -> String {
    "Sorry, I'm having trouble reaching my language model right now. Please try again in a moment."
        .into()
}
fn default_empty_message_reply() -> String {
    "Hello! How can I help you?".into()
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            history_cap: default_history_cap(),
            max_tool_depth: default_max_tool_depth(),
            completion_timeout_secs: default_completion_timeout(),
            completion_retries: default_completion_retries(),
            tool_timeout_secs: default_tool_timeout(),
            follow_up_instruction: true,
            fallback_message: default_fallback_message(),
            apology_message: default_apology_message(),
            empty_message_reply: default_empty_message_reply(),
            prefix_author: true,
            persist_live: true,
            backfill_on_message: false,
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,

    /// Guild used for channel listing and member lookup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guild_id: Option<String>,

    /// Channels the relay answers in and backfills
    #[serde(default)]
    pub channel_ids: Vec<String>,

    #[serde(default = "default_discord_api_base")]
    pub api_base: String,
}

fn default_discord_api_base() -> String {
    "https://discord.com/api/v10".into()
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            bot_token: None,
            guild_id: None,
            channel_ids: Vec::new(),
            api_base: default_discord_api_base(),
        }
    }
}

impl std::fmt::Debug for DiscordConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordConfig")
            .field("bot_token", &redact(&self.bot_token))
            .field("guild_id", &self.guild_id)
            .field("channel_ids", &self.channel_ids)
            .field("api_base", &self.api_base)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory of per-target log files; `~/.chatrelay/logs` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// RFC 3339 instant to start from when a channel has no persisted history
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,

    #[serde(default = "default_batch_size")]
    pub batch_size: u32,

    #[serde(default = "default_batch_pause_ms")]
    pub batch_pause_ms: u64,

    /// Pause every this many messages inside a batch (0 disables)
    #[serde(default = "default_yield_every")]
    pub yield_every: usize,

    #[serde(default = "default_yield_pause_ms")]
    pub yield_pause_ms: u64,

    /// Wait used when a rate limit carries no retry hint
    #[serde(default = "default_rate_limit_ms")]
    pub rate_limit_default_ms: u64,

    #[serde(default = "default_fetch_retries")]
    pub fetch_retries: u32,
}

fn default_batch_size() -> u32 {
    100
}
fn default_batch_pause_ms() -> u64 {
    1000
}
fn default_yield_every() -> usize {
    50
}
fn default_yield_pause_ms() -> u64 {
    100
}
fn default_rate_limit_ms() -> u64 {
    5000
}
fn default_fetch_retries() -> u32 {
    3
}

impl Default for BackfillConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            start: None,
            batch_size: default_batch_size(),
            batch_pause_ms: default_batch_pause_ms(),
            yield_every: default_yield_every(),
            yield_pause_ms: default_yield_pause_ms(),
            rate_limit_default_ms: default_rate_limit_ms(),
            fetch_retries: default_fetch_retries(),
        }
    }
}

impl BackfillConfig {
    /// Parsed `start`, or `None` when unset or unparseable.
    pub fn start_instant(&self) -> Option<DateTime<Utc>> {
        self.start
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Per-client request budget; 0 disables limiting
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_port() -> u16 {
    42618
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_requests_per_minute() -> u32 {
    60
}
fn default_max_body_bytes() -> usize {
    64 * 1024
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            requests_per_minute: default_requests_per_minute(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path with `.env` and environment
    /// variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!("Loaded environment from {}", path.display());
        }

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides (highest priority).
    ///
    /// `lookup` is `std::env::var` in production and a map in tests.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if self.api_key.is_none() {
            self.api_key = lookup("CHATRELAY_API_KEY")
                .or_else(|| lookup("OPENAI_API_KEY"))
                .or_else(|| lookup("OPENROUTER_API_KEY"));
        }

        if let Some(provider) = lookup("CHATRELAY_PROVIDER") {
            self.default_provider = provider;
        }

        if let Some(model) = lookup("CHATRELAY_MODEL").or_else(|| lookup("OLLAMA_MODEL")) {
            self.default_model = model;
        }

        if let Some(host) = lookup("OLLAMA_HOST") {
            let base = host.trim_end_matches('/');
            let url = if base.ends_with("/v1") {
                base.to_string()
            } else {
                format!("{base}/v1")
            };
            self.providers.entry("ollama".into()).or_default().api_url = Some(url);
        }

        if let Some(token) = lookup("DISCORD_BOT_TOKEN") {
            self.discord.bot_token = Some(token);
        }

        if let Some(guild) = lookup("DISCORD_GUILD_ID") {
            self.discord.guild_id = Some(guild.trim().to_string());
        }

        if let Some(ids) = lookup("DISCORD_CHANNEL_IDS") {
            self.discord.channel_ids = parse_channel_ids(&ids);
        }

        if let Some(personality) = lookup("BOT_PERSONALITY") {
            self.relay.system_prompt = personality;
        }

        if let Some(debug) = lookup("DEBUG") {
            self.debug = debug.trim().eq_ignore_ascii_case("true");
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".chatrelay")
    }

    /// Directory holding the persisted logs.
    pub fn log_dir(&self) -> PathBuf {
        self.storage
            .log_dir
            .clone()
            .unwrap_or_else(|| Self::config_dir().join("logs"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.relay.history_cap < PINNED_TURNS {
            return Err(ConfigError::ValidationError(format!(
                "relay.history_cap must be at least {PINNED_TURNS} (the pinned prompt turns)"
            )));
        }

        if self.relay.max_tool_depth == 0 {
            return Err(ConfigError::ValidationError(
                "relay.max_tool_depth must be at least 1".into(),
            ));
        }

        if !(1..=100).contains(&self.backfill.batch_size) {
            return Err(ConfigError::ValidationError(
                "backfill.batch_size must be between 1 and 100".into(),
            ));
        }

        if let Some(start) = &self.backfill.start {
            if DateTime::parse_from_rfc3339(start).is_err() {
                return Err(ConfigError::ValidationError(format!(
                    "backfill.start is not an RFC 3339 timestamp: {start}"
                )));
            }
        }

        Ok(())
    }

    /// Problems that keep the Discord side from starting. Empty when ready.
    pub fn validate_for_discord(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.discord.bot_token.is_none() {
            problems.push("DISCORD_BOT_TOKEN is not set".to_string());
        }
        if self.discord.channel_ids.is_empty() {
            problems.push("DISCORD_CHANNEL_IDS is not set or contains no valid ids".to_string());
        }
        problems
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            debug: false,
            relay: RelayConfig::default(),
            discord: DiscordConfig::default(),
            storage: StorageConfig::default(),
            backfill: BackfillConfig::default(),
            gateway: GatewayConfig::default(),
            providers: HashMap::new(),
        }
    }
}

/// Parse a comma-separated list of numeric channel ids, skipping bad entries.
fn parse_channel_ids(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .filter(|id| {
            let valid = id.chars().all(|c| c.is_ascii_digit());
            if !valid {
                tracing::warn!(channel_id = %id, "Skipping invalid channel id");
            }
            valid
        })
        .map(String::from)
        .collect()
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_provider, "ollama");
        assert_eq!(config.gateway.port, 42618);
        assert_eq!(config.relay.history_cap, 20);
        assert_eq!(config.relay.max_tool_depth, 3);
        assert_eq!(config.backfill.batch_size, 100);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.default_provider, config.default_provider);
        assert_eq!(parsed.gateway.port, config.gateway.port);
        assert_eq!(parsed.relay.fallback_message, config.relay.fallback_message);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            default_temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn history_cap_below_pinned_prefix_rejected() {
        let mut config = AppConfig::default();
        config.relay.history_cap = 1;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("history_cap"));

        config.relay.history_cap = PINNED_TURNS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_depth_and_oversized_batch_rejected() {
        let mut config = AppConfig::default();
        config.relay.max_tool_depth = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.backfill.batch_size = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn backfill_start_must_be_rfc3339() {
        let mut config = AppConfig::default();
        config.backfill.start = Some("last tuesday".into());
        assert!(config.validate().is_err());

        config.backfill.start = Some("2026-03-01T00:00:00Z".into());
        assert!(config.validate().is_ok());
        assert_eq!(
            config.backfill.start_instant(),
            Some("2026-03-01T00:00:00Z".parse().unwrap())
        );
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        let config = result.unwrap();
        assert_eq!(config.default_provider, "ollama");
    }

    #[test]
    fn load_from_file_with_sections() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            tmp,
            r#"
default_model = "mistral"

[relay]
history_cap = 8
max_tool_depth = 4

[discord]
channel_ids = ["111", "222"]

[backfill]
batch_size = 50
start = "2026-01-01T00:00:00Z"
"#
        )
        .unwrap();

        let config = AppConfig::load_from(tmp.path()).unwrap();
        assert_eq!(config.default_model, "mistral");
        assert_eq!(config.relay.history_cap, 8);
        assert_eq!(config.relay.max_tool_depth, 4);
        assert!(config.relay.prefix_author);
        assert_eq!(config.discord.channel_ids, vec!["111", "222"]);
        assert_eq!(config.backfill.batch_size, 50);
        assert_eq!(config.backfill.batch_pause_ms, 1000);
    }

    #[test]
    fn invalid_file_is_a_validation_error() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "[relay]\nhistory_cap = 0").unwrap();
        assert!(matches!(
            AppConfig::load_from(tmp.path()),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = AppConfig::default();
        config.apply_env_overrides(env(&[
            ("OLLAMA_MODEL", "qwen2.5"),
            ("OLLAMA_HOST", "http://gpu-box:11434/"),
            ("DISCORD_BOT_TOKEN", "secret-token"),
            ("DISCORD_CHANNEL_IDS", "123, abc ,456,"),
            ("DISCORD_GUILD_ID", "999"),
            ("BOT_PERSONALITY", "You are a pirate."),
            ("DEBUG", "True"),
        ]));

        assert_eq!(config.default_model, "qwen2.5");
        assert_eq!(
            config.providers["ollama"].api_url.as_deref(),
            Some("http://gpu-box:11434/v1")
        );
        assert_eq!(config.discord.bot_token.as_deref(), Some("secret-token"));
        assert_eq!(config.discord.channel_ids, vec!["123", "456"]);
        assert_eq!(config.discord.guild_id.as_deref(), Some("999"));
        assert_eq!(config.relay.system_prompt, "You are a pirate.");
        assert!(config.debug);
    }

    #[test]
    fn api_key_from_config_wins_over_env() {
        let mut config = AppConfig {
            api_key: Some("from-file".into()),
            ..AppConfig::default()
        };
        config.apply_env_overrides(env(&[("OPENAI_API_KEY", "from-env")]));
        assert_eq!(config.api_key.as_deref(), Some("from-file"));

        let mut config = AppConfig::default();
        config.apply_env_overrides(env(&[("OPENAI_API_KEY", "from-env")]));
        assert_eq!(config.api_key.as_deref(), Some("from-env"));
    }

    #[test]
    fn discord_problems_are_listed() {
        let config = AppConfig::default();
        let problems = config.validate_for_discord();
        assert_eq!(problems.len(), 2);

        let mut config = AppConfig::default();
        config.discord.bot_token = Some("t".into());
        config.discord.channel_ids = vec!["1".into()];
        assert!(config.validate_for_discord().is_empty());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let mut config = AppConfig {
            api_key: Some("sk-very-secret".into()),
            ..AppConfig::default()
        };
        config.discord.bot_token = Some("discord-secret".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-very-secret"));
        assert!(!debug.contains("discord-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("ollama"));
        assert!(toml_str.contains("42618"));
        assert!(toml_str.contains("[relay]"));
    }
}
