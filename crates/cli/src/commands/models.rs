//! `chatrelay models`: Models offered by the configured provider.

use chatrelay_core::provider::CompletionProvider;

use super::runtime::{CliResult, Runtime};

pub async fn run() -> CliResult {
    let runtime = Runtime::load()?;
    let models = runtime
        .provider
        .list_models()
        .await
        .map_err(|e| format!("Could not list models: {e}"))?;

    println!("🤖 Models on {}", runtime.provider.name());
    if models.is_empty() {
        println!("  (none reported)");
    }
    for model in models {
        let marker = if model == runtime.config.default_model { "*" } else { " " };
        println!("  {marker} {model}");
    }
    Ok(())
}
