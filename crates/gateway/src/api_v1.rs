//! HTTP API v1.
//!
//! Endpoints:
//!
//! - `POST   /v1/conversations/{id}/messages`: Relay a message, get the reply
//! - `DELETE /v1/conversations/{id}`: Reset a conversation
//! - `GET    /v1/conversations`: Active conversations
//! - `GET    /v1/stats`: Persisted-log statistics
//! - `GET    /v1/status`: Runtime status

use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
};
use chatrelay_agent::InboundMessage;
use chatrelay_core::message::ConversationId;
use chatrelay_core::platform::ChannelRef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{error, info};

use crate::SharedState;

/// Build the v1 router. Nest this under "/v1".
pub fn v1_router(state: SharedState) -> Router {
    Router::new()
        .route("/conversations", get(list_conversations_handler))
        .route("/conversations/{id}", delete(reset_conversation_handler))
        .route("/conversations/{id}/messages", post(message_handler))
        .route("/stats", get(stats_handler))
        .route("/status", get(status_handler))
        .with_state(state)
}

// ── DTOs ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct MessageRequest {
    pub author: String,
    pub text: String,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub channel_id: Option<String>,
    #[serde(default)]
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub conversation_id: String,
    pub reply: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub total_persisted: usize,
    pub by_author_class: BTreeMap<String, usize>,
    pub logs: usize,
}

#[derive(Debug, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub turns: usize,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub provider: String,
    pub model: String,
    pub tools: Vec<String>,
    pub active_conversations: usize,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn internal(message: impl std::fmt::Display) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn message_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(payload): Json<MessageRequest>,
) -> Result<Json<MessageResponse>, ApiError> {
    if payload.author.trim().is_empty() {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse {
                error: "author must not be empty".into(),
            }),
        ));
    }
    info!(conversation_id = %id, text_len = payload.text.len(), "Inbound message");

    let mut message = InboundMessage::new(id.clone(), payload.author, payload.text);
    if let Some(message_id) = payload.message_id {
        message = message.with_message_id(message_id);
    }
    if let Some(channel) = payload.channel_id {
        message = message.with_channel(ChannelRef::new(channel));
    }
    if let Some(timestamp) = payload.timestamp {
        message = message.with_timestamp(timestamp);
    }

    let reply = state.relay.handle_inbound(message).await.map_err(|e| {
        error!(conversation_id = %id, error = %e, "Relay failed");
        internal(e)
    })?;

    Ok(Json(MessageResponse {
        conversation_id: id,
        reply,
    }))
}

async fn reset_conversation_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .relay
        .reset_conversation(&ConversationId(id))
        .await
        .map_err(internal)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_conversations_handler(
    State(state): State<SharedState>,
) -> Json<Vec<ConversationSummary>> {
    let mut summaries = Vec::new();
    for id in state.relay.active_conversations().await {
        let turns = state.relay.conversation_len(&id).await.unwrap_or(0);
        summaries.push(ConversationSummary { id: id.0, turns });
    }
    Json(summaries)
}

async fn stats_handler(State(state): State<SharedState>) -> Result<Json<StatsResponse>, ApiError> {
    let stats = state.relay.statistics().await.map_err(internal)?;
    Ok(Json(StatsResponse {
        total_persisted: stats.total_persisted,
        by_author_class: stats.by_author_class,
        logs: stats.logs,
    }))
}

async fn status_handler(State(state): State<SharedState>) -> Json<StatusResponse> {
    let uptime = chrono::Utc::now()
        .signed_duration_since(state.start_time)
        .num_seconds()
        .max(0) as u64;

    Json(StatusResponse {
        status: "healthy".into(),
        version: env!("CARGO_PKG_VERSION").into(),
        uptime_secs: uptime,
        provider: state.provider.clone(),
        model: state.relay.model().to_string(),
        tools: state.relay.tool_names(),
        active_conversations: state.relay.active_conversations().await.len(),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────
