//! `chatrelay stats`: Persisted-log statistics.

use super::runtime::{CliResult, Runtime};

pub async fn run() -> CliResult {
    let runtime = Runtime::load()?;
    let stats = runtime.store.statistics().await?;

    println!("📊 Persisted messages");
    println!("=====================");
    println!("  Log directory:  {}", runtime.store.dir().display());
    println!("  Log files:      {}", stats.logs);
    println!("  Total:          {}", stats.total_persisted);
    for (class, count) in &stats.by_author_class {
        println!("    {class:<12} {count}");
    }
    Ok(())
}
