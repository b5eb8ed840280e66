//! `chatrelay backfill`: One-shot history backfill.

use chatrelay_agent::Shutdown;
use chatrelay_core::platform::ChannelRef;

use super::runtime::{CliResult, Runtime};

pub async fn run(channel: Option<String>) -> CliResult {
    let runtime = Runtime::load()?;

    let problems = runtime.config.validate_for_discord();
    let Some(engine) = runtime.backfill_engine() else {
        for problem in &problems {
            eprintln!("  ❌ {problem}");
        }
        return Err("Backfill needs a Discord bot token".into());
    };

    let channels = match channel {
        Some(id) => vec![ChannelRef::new(id)],
        None => runtime.watched_channels(),
    };
    if channels.is_empty() {
        return Err("No channels to backfill: pass --channel or set DISCORD_CHANNEL_IDS".into());
    }

    let shutdown = Shutdown::new();
    let signal = shutdown.signal();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });

    println!("📥 Backfilling {} channel(s)", channels.len());
    let mut failures = 0;
    for channel in &channels {
        match engine.run(channel, &signal).await {
            Ok(report) => {
                println!(
                    "  ✅ {channel}: {} fetched, {} new, {} already stored{}",
                    report.fetched,
                    report.persisted,
                    report.skipped,
                    if report.cancelled { " (cancelled)" } else { "" }
                );
                if report.cancelled {
                    break;
                }
            }
            Err(e) => {
                eprintln!("  ❌ {channel}: {e}");
                failures += 1;
            }
        }
    }
    ctrl_c.abort();

    if failures > 0 {
        return Err(format!("{failures} channel(s) failed").into());
    }
    Ok(())
}
