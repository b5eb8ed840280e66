//! `chatrelay onboard`: First-time setup.

use chatrelay_config::AppConfig;

use super::runtime::CliResult;

pub async fn run() -> CliResult {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");
    let log_dir = config_dir.join("logs");

    println!("💬 chatrelay — First-Time Setup");
    println!("===============================\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("✅ Created config directory: {}", config_dir.display());
    } else {
        println!("  Config directory exists: {}", config_dir.display());
    }

    if !log_dir.exists() {
        std::fs::create_dir_all(&log_dir)?;
        println!("✅ Created log directory: {}", log_dir.display());
    }

    if config_path.exists() {
        println!("\n⚠️  Config already exists at: {}", config_path.display());
        println!("   Edit it manually or delete and re-run onboard.\n");
    } else {
        std::fs::write(&config_path, AppConfig::default_toml())?;
        println!("✅ Created config.toml at: {}", config_path.display());
        println!("\n📝 Next steps:");
        println!("   1. Start Ollama, or add an API key to {}", config_path.display());
        println!("   2. Set DISCORD_BOT_TOKEN and DISCORD_CHANNEL_IDS for backfill");
        println!("   3. Run: chatrelay doctor\n");
    }

    println!("🎉 Setup complete! Run `chatrelay chat` to start chatting.\n");
    Ok(())
}
