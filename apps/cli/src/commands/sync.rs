//! Dataset synchronization command.

use anyhow::{Context, Result};
use colored::Colorize;
use ember_core::{EmberConfig, Runtime};
use serde_json::json;
use std::path::PathBuf;

pub async fn execute(config: EmberConfig, testing: bool, target: Option<PathBuf>, json_output: bool) -> Result<()> {
    let root = match target {
        Some(dir) => dir,
        None if testing => config.testing_data_dir(),
        None => config.data_dir(),
    };

    let runtime = Runtime::bootstrap(config).await.context("Failed to initialize storage")?;
    let counts = runtime
        .sync_dataset(&root)
        .await
        .with_context(|| format!("Failed to sync dataset into {}", root.display()))?;

    if json_output {
        let classes: serde_json::Map<String, serde_json::Value> =
            counts.iter().map(|(k, v)| (k.to_string(), json!(v))).collect();
        let out = json!({ "root": root, "counts": classes, "total": counts.total() });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!("{}", "Dataset ready".bold().green());
    println!("  Root: {}", root.display().to_string().dimmed());
    for (class, count) in counts.iter() {
        println!("  {:<48} {}", class, count.to_string().cyan());
    }
    println!();
    Ok(())
}
