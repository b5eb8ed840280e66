//! Chat platform adapters for chatrelay.
//!
//! - **Discord**: REST implementation of `ChatPlatform` (history paging,
//!   channel listing, recent messages, member lookup)
//! - **CLI**: interactive terminal chat (stdin/stdout)

pub mod cli;
pub mod discord;

pub use cli::CliChannel;
pub use discord::DiscordPlatform;
