//! chatrelay CLI: the main entry point.
//!
//! Commands:
//! - `onboard`: Write the default config
//! - `chat`: Interactive or single-message chat
//! - `serve`: HTTP gateway plus backfill watchers
//! - `backfill`: One-shot history backfill
//! - `stats`: Persisted-log statistics
//! - `models`: Models offered by the provider
//! - `status`: Show configuration
//! - `doctor`: Diagnose configuration and connectivity

use clap::{Parser, Subcommand, ValueEnum};

mod commands;

#[derive(Parser)]
#[command(
    name = "chatrelay",
    about = "chatrelay — LLM relay for chat platforms",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize configuration
    Onboard,

    /// Chat through the relay
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Conversation to talk in
        #[arg(short, long)]
        conversation: Option<String>,
    },

    /// Start the HTTP gateway and backfill watchers
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Backfill channel history into the persisted logs
    Backfill {
        /// Only this channel (defaults to every configured channel)
        #[arg(long)]
        channel: Option<String>,
    },

    /// Show persisted-log statistics
    Stats,

    /// List models offered by the configured provider
    Models,

    /// Show configuration status
    Status,

    /// Diagnose configuration and connectivity
    Doctor,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let debug_env = std::env::var("DEBUG").is_ok_and(|v| v.eq_ignore_ascii_case("true"));
    let filter = if cli.verbose || debug_env { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    match cli.log_format {
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init(),
    }

    match cli.command {
        Commands::Onboard => commands::onboard::run().await?,
        Commands::Chat {
            message,
            conversation,
        } => commands::chat::run(message, conversation).await?,
        Commands::Serve { port } => commands::serve::run(port).await?,
        Commands::Backfill { channel } => commands::backfill::run(channel).await?,
        Commands::Stats => commands::stats::run().await?,
        Commands::Models => commands::models::run().await?,
        Commands::Status => commands::status::run().await?,
        Commands::Doctor => commands::doctor::run().await?,
    }

    Ok(())
}
