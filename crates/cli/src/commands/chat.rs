//! `chatrelay chat`: Interactive or single-message chat through the relay.

use chatrelay_agent::InboundMessage;
use chatrelay_channels::CliChannel;
use chatrelay_core::channel::Channel;
use chatrelay_core::message::ConversationId;
use chatrelay_core::provider::CompletionProvider;
use std::io::Write;

use super::runtime::{CliResult, Runtime};

const DEFAULT_CONVERSATION: &str = "cli_session";

/// Slash commands understood in interactive mode.
#[derive(Debug, PartialEq, Eq)]
enum SlashCommand {
    Reset,
    Status,
    Ping,
}

fn parse_slash(line: &str) -> Option<SlashCommand> {
    match line.trim() {
        "/reset" => Some(SlashCommand::Reset),
        "/status" => Some(SlashCommand::Status),
        "/ping" => Some(SlashCommand::Ping),
        _ => None,
    }
}

pub async fn run(message: Option<String>, conversation: Option<String>) -> CliResult {
    let runtime = Runtime::load()?;
    let relay = runtime.relay(None)?;
    let conversation = conversation.unwrap_or_else(|| DEFAULT_CONVERSATION.to_string());
    let user = std::env::var("USER").unwrap_or_else(|_| "User".into());

    if let Some(text) = message {
        eprint!("  Thinking...");
        let reply = relay
            .handle_inbound(InboundMessage::new(&conversation, &user, text))
            .await?;
        eprint!("\r              \r");
        println!("{reply}");
        return Ok(());
    }

    println!();
    println!("  ╔══════════════════════════════════════════════╗");
    println!("  ║        chatrelay: Interactive Mode           ║");
    println!("  ╚══════════════════════════════════════════════╝");
    println!();
    println!("  Provider:      {}", runtime.config.default_provider);
    println!("  Model:         {}", runtime.config.default_model);
    println!("  Tools:         {}", relay.tool_names().join(", "));
    println!("  Conversation:  {conversation}");
    println!();
    println!("  Commands: /reset, /status, /ping. Type 'exit' or Ctrl+C to quit.");
    println!();

    let channel = CliChannel::new()
        .with_author(&user)
        .with_conversation(&conversation);
    let mut rx = channel.start().await.map_err(|e| format!("Channel error: {e}"))?;
    let id = ConversationId(conversation.clone());

    print!("  You > ");
    std::io::stdout().flush()?;

    while let Some(result) = rx.recv().await {
        let chan_msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                eprintln!("  [Channel Error] {e}");
                break;
            }
        };

        match parse_slash(&chan_msg.text) {
            Some(SlashCommand::Reset) => {
                relay.reset_conversation(&id).await?;
                println!("  Conversation history cleared.");
            }
            Some(SlashCommand::Status) => {
                let turns = relay.conversation_len(&id).await.unwrap_or(0);
                let stats = relay.statistics().await?;
                println!("  Turns in window: {turns}");
                println!("  Persisted:       {} messages", stats.total_persisted);
            }
            Some(SlashCommand::Ping) => {
                let start = std::time::Instant::now();
                match runtime.provider.health_check().await {
                    Ok(true) => println!("  Pong! ({} ms)", start.elapsed().as_millis()),
                    Ok(false) => println!("  Completion service answered but is not healthy"),
                    Err(e) => println!("  Completion service unreachable: {e}"),
                }
            }
            None => {
                eprint!("  ...");
                let inbound = InboundMessage::new(
                    chan_msg.conversation_id.0.clone(),
                    chan_msg.author,
                    chan_msg.text,
                )
                .with_timestamp(chan_msg.received_at);
                match relay.handle_inbound(inbound).await {
                    Ok(reply) => {
                        eprint!("\r     \r");
                        println!();
                        channel.send(&id, &reply).await?;
                        println!();
                    }
                    Err(e) => {
                        eprint!("\r     \r");
                        eprintln!("  [Error] {e}");
                    }
                }
            }
        }

        print!("  You > ");
        std::io::stdout().flush()?;
    }

    println!();
    println!("  Goodbye! 👋");
    println!();
    Ok(())
}
