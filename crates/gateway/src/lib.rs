//! HTTP gateway for chatrelay.
//!
//! Exposes the relay's gateway contract (inbound messages, conversation
//! reset, statistics) as a small REST API next to a health check.
//!
//! Built on Axum.

pub mod api_v1;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::{Router, routing::get};
use chatrelay_agent::{CancellationSignal, Relay};
use chatrelay_config::GatewayConfig;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

/// Shared state handed to every handler.
pub struct GatewayState {
    pub relay: Arc<Relay>,
    pub provider: String,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub config: GatewayConfig,
}

impl GatewayState {
    pub fn new(relay: Arc<Relay>, provider: impl Into<String>) -> Self {
        Self {
            relay,
            provider: provider.into(),
            start_time: chrono::Utc::now(),
            config: GatewayConfig::default(),
        }
    }

    pub fn with_config(mut self, config: GatewayConfig) -> Self {
        self.config = config;
        self
    }
}

pub type SharedState = Arc<GatewayState>;

/// Build the router with every gateway route.
///
/// `/v1` sits behind the per-client request budget; `/health` never does.
pub fn build_router(state: SharedState) -> Router {
    let budget = Arc::new(RequestBudget::per_minute(state.config.requests_per_minute));
    let body_limit = state.config.max_body_bytes;

    let v1 = api_v1::v1_router(state)
        .layer(middleware::from_fn_with_state(budget, enforce_budget));

    Router::new()
        .route("/health", get(health_handler))
        .nest("/v1", v1)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Serve until `shutdown` fires.
pub async fn start(
    state: SharedState,
    addr: &str,
    shutdown: CancellationSignal,
) -> std::io::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Gateway stopped");
    Ok(())
}

// --- Request budget ---

/// Fixed-window request counter keyed by client.
struct RequestBudget {
    limit: u32,
    window: Duration,
    windows: Mutex<HashMap<String, (Instant, u32)>>,
}

impl RequestBudget {
    fn per_minute(limit: u32) -> Self {
        Self {
            limit,
            window: Duration::from_secs(60),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Spend one request, or return how long until the client's window
    /// reopens.
    fn spend(&self, client: &str) -> Result<(), Duration> {
        if self.limit == 0 {
            return Ok(());
        }
        let now = Instant::now();
        let mut windows = self.windows.lock().unwrap_or_else(|e| e.into_inner());
        windows.retain(|_, (opened, _)| now.duration_since(*opened) < self.window);

        let (opened, used) = windows.entry(client.to_string()).or_insert((now, 0));
        if *used >= self.limit {
            return Err(self.window.saturating_sub(now.duration_since(*opened)));
        }
        *used += 1;
        Ok(())
    }
}

/// Clients are told apart by `X-Forwarded-For`; everything else shares one
/// budget.
async fn enforce_budget(
    State(budget): State<Arc<RequestBudget>>,
    req: axum::extract::Request,
    next: Next,
) -> Response {
    let client = req
        .headers()
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "direct".to_string());

    match budget.spend(&client) {
        Ok(()) => next.run(req).await,
        Err(wait) => {
            warn!(client = %client, retry_after_secs = wait.as_secs(), "Request budget exhausted");
            let mut response = StatusCode::TOO_MANY_REQUESTS.into_response();
            let secs = wait.as_secs().max(1).to_string();
            if let Ok(value) = HeaderValue::from_str(&secs) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
            response
        }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
