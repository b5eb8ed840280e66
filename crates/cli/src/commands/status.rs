//! `chatrelay status`: Show configuration status.

use chatrelay_config::AppConfig;

use super::runtime::CliResult;

pub async fn run() -> CliResult {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    println!("💬 chatrelay Status");
    println!("===================");
    println!("  Config dir:   {}", AppConfig::config_dir().display());
    println!("  Log dir:      {}", config.log_dir().display());
    println!("  Provider:     {}", config.default_provider);
    println!("  Model:        {}", config.default_model);
    println!("  Temperature:  {}", config.default_temperature);
    println!("  History cap:  {} turns", config.relay.history_cap);
    println!("  Tool depth:   {}", config.relay.max_tool_depth);
    println!("  Gateway:      {}:{}", config.gateway.host, config.gateway.port);
    println!("  Discord:      {}", if config.discord.bot_token.is_some() { "token set" } else { "not configured" });
    println!("  Channels:     {}", config.discord.channel_ids.len());
    println!("  Backfill:     {}", if config.backfill.enabled { "enabled" } else { "disabled" });

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("\n  ✅ Config file found");
    } else {
        println!("\n  ⚠️  No config file, run `chatrelay onboard` first");
    }

    Ok(())
}
