//! `chatrelay serve`: HTTP gateway plus backfill watchers.

use chatrelay_agent::Shutdown;
use chatrelay_core::provider::CompletionProvider;
use chatrelay_gateway::GatewayState;
use std::sync::Arc;
use tracing::{info, warn};

use super::runtime::{CliResult, Runtime};

pub async fn run(port_override: Option<u16>) -> CliResult {
    let mut runtime = Runtime::load()?;
    if let Some(port) = port_override {
        runtime.config.gateway.port = port;
    }
    runtime.warn_discord_problems();

    let shutdown = Shutdown::new();
    let engine = runtime
        .backfill_engine()
        .map(|engine| engine.with_shutdown(shutdown.signal()));

    let mut watchers = Vec::new();
    if let Some(engine) = &engine
        && runtime.config.backfill.enabled
    {
        watchers = engine.spawn_watchers(runtime.watched_channels(), &shutdown.signal());
    }

    let relay = Arc::new(runtime.relay(engine)?);
    let state = Arc::new(
        GatewayState::new(relay, runtime.provider.name()).with_config(runtime.config.gateway.clone()),
    );
    let addr = format!("{}:{}", runtime.config.gateway.host, runtime.config.gateway.port);

    println!("💬 chatrelay gateway");
    println!("   Listening: {addr}");
    println!("   Model:     {}", runtime.config.default_model);
    println!("   Watching:  {} channel(s)", watchers.len());
    println!("   Logs:      {}", runtime.config.log_dir().display());

    let signal = shutdown.signal();
    let server = tokio::spawn(async move { chatrelay_gateway::start(state, &addr, signal).await });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    shutdown.cancel();

    for watcher in watchers {
        if let Err(e) = watcher.await {
            warn!(error = %e, "Backfill watcher panicked");
        }
    }
    server.await??;

    println!("   Stopped.");
    Ok(())
}
