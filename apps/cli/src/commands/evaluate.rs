//! Evaluation command implementation.

use anyhow::{Context, Result};
use colored::Colorize;
use ember_core::{EmberConfig, evaluate_model};
use std::path::Path;

pub async fn execute(config: &EmberConfig, model: &Path, data_dir: Option<&Path>, json_output: bool) -> Result<()> {
    let evaluation = evaluate_model(config, model, data_dir)
        .await
        .with_context(|| format!("Failed to evaluate {}", model.display()))?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&evaluation)?);
        return Ok(());
    }

    println!();
    println!("{}", "Evaluation".bold().cyan());
    println!("  Model:     {}", model.display().to_string().dimmed());
    println!("  Samples:   {}", evaluation.samples);
    println!("  Loss:      {:.4}", evaluation.loss);
    println!("  Accuracy:  {:.3}", evaluation.accuracy);
    println!("  Precision: {:.3}", evaluation.precision);
    println!("  Recall:    {:.3}", evaluation.recall);
    println!();
    Ok(())
}
