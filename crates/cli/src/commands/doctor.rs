//! `chatrelay doctor`: Diagnose configuration and connectivity.

use chatrelay_config::AppConfig;
use chatrelay_core::provider::CompletionProvider;

use super::runtime::{CliResult, Runtime};

pub async fn run() -> CliResult {
    println!("🩺 chatrelay Doctor");
    println!("===================\n");

    let mut issues = 0;

    let config_path = AppConfig::config_dir().join("config.toml");
    if config_path.exists() {
        println!("  ✅ Config file found");
    } else {
        println!("  ⚠️  No config file, defaults in use (run `chatrelay onboard`)");
    }

    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ✅ Configuration valid");
            config
        }
        Err(e) => {
            println!("  ❌ Configuration invalid: {e}");
            println!("\n  ⚠️  1 issue(s) found. See above for details.");
            return Ok(());
        }
    };

    for problem in config.validate_for_discord() {
        println!("  ⚠️  {problem}");
        issues += 1;
    }

    let runtime = Runtime::from_config(config)?;
    match runtime.provider.health_check().await {
        Ok(true) => println!("  ✅ Completion service reachable ({})", runtime.provider.name()),
        Ok(false) => {
            println!("  ❌ Completion service answered but is not healthy");
            issues += 1;
        }
        Err(e) => {
            println!("  ❌ Completion service unreachable: {e}");
            issues += 1;
        }
    }

    match runtime.provider.list_models().await {
        Ok(models) if models.iter().any(|m| m == &runtime.config.default_model) => {
            println!("  ✅ Model '{}' available", runtime.config.default_model);
        }
        Ok(_) => {
            println!(
                "  ⚠️  Model '{}' not listed by the provider",
                runtime.config.default_model
            );
            issues += 1;
        }
        Err(_) => {}
    }

    match runtime.store.statistics().await {
        Ok(stats) => println!(
            "  ✅ Log directory readable ({} messages in {} file(s))",
            stats.total_persisted, stats.logs
        ),
        Err(e) => {
            println!("  ❌ Log directory unreadable: {e}");
            issues += 1;
        }
    }

    println!();
    if issues == 0 {
        println!("  🎉 All checks passed!");
    } else {
        println!("  ⚠️  {issues} issue(s) found. See above for details.");
    }
    Ok(())
}
