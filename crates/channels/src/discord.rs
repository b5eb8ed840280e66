//! Discord REST adapter.
//!
//! Implements `ChatPlatform` against the Discord HTTP API (v10). The live
//! gateway connection (presence, message events) is not handled here; this
//! adapter only reads: channel history for backfill, and the lookups the
//! model can request.
//!
//! Time cursors are turned into snowflakes for the `after=` query parameter,
//! so paging is by creation time.

use async_trait::async_trait;
use chatrelay_core::error::ChannelError;
use chatrelay_core::platform::{ChannelInfo, ChannelRef, ChatPlatform, MemberInfo, PlatformMessage};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Discord's epoch (2015-01-01T00:00:00Z) in unix milliseconds.
const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;

/// Discord refuses larger pages.
const MAX_PAGE: usize = 100;

/// Discord REST client.
pub struct DiscordPlatform {
    api_base: String,
    bot_token: String,
    guild_id: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for DiscordPlatform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordPlatform")
            .field("api_base", &self.api_base)
            .field("bot_token", &"[REDACTED]")
            .field("guild_id", &self.guild_id)
            .finish()
    }
}

impl DiscordPlatform {
    pub fn new(bot_token: impl Into<String>, guild_id: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            api_base: "https://discord.com/api/v10".into(),
            bot_token: bot_token.into(),
            guild_id,
            client,
        }
    }

    /// Build from the `[discord]` config section.
    pub fn from_config(config: &chatrelay_config::DiscordConfig) -> Result<Self, ChannelError> {
        let token = config
            .bot_token
            .clone()
            .ok_or_else(|| ChannelError::NotConfigured("DISCORD_BOT_TOKEN is not set".into()))?;
        Ok(Self::new(token, config.guild_id.clone()).with_api_base(&config.api_base))
    }

    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    fn guild(&self) -> Result<&str, ChannelError> {
        self.guild_id
            .as_deref()
            .ok_or_else(|| ChannelError::NotConfigured("DISCORD_GUILD_ID is not set".into()))
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ChannelError> {
        let url = format!("{}{path}", self.api_base);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bot {}", self.bot_token))
            .query(query)
            .send()
            .await
            .map_err(|e| ChannelError::ConnectionLost(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            let header = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .map(String::from);
            let body = response.text().await.unwrap_or_default();
            let retry_after_ms = rate_limit_delay_ms(&body, header.as_deref());
            debug!(path, ?retry_after_ms, "Discord rate limit");
            return Err(ChannelError::RateLimited { retry_after_ms });
        }

        if status == 404 {
            return Err(ChannelError::NotFound(path.to_string()));
        }

        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            warn!(status, path, body = %body, "Discord API error");
            return Err(ChannelError::ApiError {
                status_code: status,
                message: body,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ChannelError::InvalidPayload(e.to_string()))
    }
}

#[async_trait]
impl ChatPlatform for DiscordPlatform {
    fn name(&self) -> &str {
        "discord"
    }

    async fn fetch_history(
        &self,
        channel: &ChannelRef,
        after: Option<DateTime<Utc>>,
        limit: usize,
    ) -> Result<Vec<PlatformMessage>, ChannelError> {
        let snowflake = after.map(snowflake_for).unwrap_or(0);
        let query = [
            ("after", snowflake.to_string()),
            ("limit", limit.clamp(1, MAX_PAGE).to_string()),
        ];
        let raw: Vec<ApiMessage> = self
            .get(&format!("/channels/{}/messages", channel.as_str()), &query)
            .await?;
        Ok(into_platform_messages(channel, raw))
    }

    async fn list_channels(&self) -> Result<Vec<ChannelInfo>, ChannelError> {
        let guild = self.guild()?;
        let raw: Vec<ApiChannel> = self.get(&format!("/guilds/{guild}/channels"), &[]).await?;
        Ok(raw
            .into_iter()
            .map(|c| ChannelInfo {
                id: c.id,
                name: c.name.unwrap_or_default(),
                kind: channel_kind(c.kind).to_string(),
            })
            .collect())
    }

    async fn recent_messages(
        &self,
        channel: &ChannelRef,
        limit: usize,
    ) -> Result<Vec<PlatformMessage>, ChannelError> {
        let query = [("limit", limit.clamp(1, MAX_PAGE).to_string())];
        let raw: Vec<ApiMessage> = self
            .get(&format!("/channels/{}/messages", channel.as_str()), &query)
            .await?;
        Ok(into_platform_messages(channel, raw))
    }

    async fn lookup_member(&self, query: &str) -> Result<Option<MemberInfo>, ChannelError> {
        let guild = self.guild()?;
        let query = query.trim().trim_start_matches("<@").trim_end_matches('>');

        if !query.is_empty() && query.chars().all(|c| c.is_ascii_digit()) {
            return match self
                .get::<ApiMember>(&format!("/guilds/{guild}/members/{query}"), &[])
                .await
            {
                Ok(member) => Ok(Some(member.into())),
                Err(ChannelError::NotFound(_)) => Ok(None),
                Err(e) => Err(e),
            };
        }

        let found: Vec<ApiMember> = self
            .get(
                &format!("/guilds/{guild}/members/search"),
                &[("query", query.to_string()), ("limit", "1".into())],
            )
            .await?;
        Ok(found.into_iter().next().map(MemberInfo::from))
    }
}

/// Smallest snowflake created at `instant`.
pub fn snowflake_for(instant: DateTime<Utc>) -> u64 {
    let offset = instant.timestamp_millis() - DISCORD_EPOCH_MS;
    if offset <= 0 {
        0
    } else {
        (offset as u64) << 22
    }
}

/// Retry delay from a 429 response: the JSON `retry_after` (seconds, float)
/// wins over the `Retry-After` header.
fn rate_limit_delay_ms(body: &str, header: Option<&str>) -> Option<u64> {
    let from_body = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("retry_after").and_then(|r| r.as_f64()));
    let from_header = header.and_then(|h| h.trim().parse::<f64>().ok());

    from_body
        .or(from_header)
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(|secs| (secs * 1000.0).ceil() as u64)
}

fn channel_kind(kind: u8) -> &'static str {
    match kind {
        0 => "text",
        2 => "voice",
        4 => "category",
        5 => "announcement",
        10..=12 => "thread",
        13 => "stage",
        15 => "forum",
        _ => "other",
    }
}

/// Convert a page to oldest-first platform messages. Discord returns pages
/// newest first; entries with unparseable timestamps are dropped.
fn into_platform_messages(channel: &ChannelRef, raw: Vec<ApiMessage>) -> Vec<PlatformMessage> {
    let mut messages: Vec<PlatformMessage> = raw
        .into_iter()
        .filter_map(|m| {
            let timestamp = match DateTime::parse_from_rfc3339(&m.timestamp) {
                Ok(ts) => ts.with_timezone(&Utc),
                Err(e) => {
                    warn!(message_id = %m.id, error = %e, "Skipping message with bad timestamp");
                    return None;
                }
            };
            Some(PlatformMessage {
                id: m.id,
                channel: channel.clone(),
                author: m.author.global_name.unwrap_or(m.author.username),
                author_is_bot: m.author.bot,
                content: m.content,
                timestamp,
            })
        })
        .collect();

    messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
    messages
}

// --- Discord API types ---

#[derive(Debug, Deserialize)]
struct ApiUser {
    id: String,
    username: String,
    #[serde(default)]
    global_name: Option<String>,
    #[serde(default)]
    bot: bool,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    id: String,
    #[serde(default)]
    content: String,
    timestamp: String,
    author: ApiUser,
}

#[derive(Debug, Deserialize)]
struct ApiChannel {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(rename = "type")]
    kind: u8,
}

#[derive(Debug, Deserialize)]
struct ApiMember {
    user: ApiUser,
    #[serde(default)]
    nick: Option<String>,
    #[serde(default)]
    joined_at: Option<DateTime<Utc>>,
    #[serde(default)]
    roles: Vec<String>,
}

impl From<ApiMember> for MemberInfo {
    fn from(m: ApiMember) -> Self {
        MemberInfo {
            id: m.user.id,
            username: m.user.username,
            display_name: m.nick.or(m.user.global_name),
            bot: m.user.bot,
            joined_at: m.joined_at,
            roles: m.roles,
        }
    }
}
