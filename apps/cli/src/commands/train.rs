//! Training command implementation.

use crate::progress::BarProgressSink;
use anyhow::{Context, Result};
use colored::Colorize;
use ember_core::{EmberConfig, Runtime};
use ember_training::{ProgressSink, RunManifest, TracingProgressSink};
use std::sync::Arc;

pub async fn execute(mut config: EmberConfig, epochs: Option<u32>, json_output: bool) -> Result<()> {
    if let Some(epochs) = epochs {
        config.training.epochs = Some(epochs);
    }

    let spec = config.pipeline_spec().context("Invalid training configuration")?;
    let runtime = Runtime::bootstrap(config).await.context("Failed to initialize storage")?;
    let mut model = Runtime::baseline_model(&spec);

    let progress: Arc<dyn ProgressSink> =
        if json_output { Arc::new(TracingProgressSink) } else { Arc::new(BarProgressSink::new()) };

    let report = runtime.train(spec, &mut model, progress).await.context("Training failed")?;

    if json_output {
        println!("{}", serde_json::to_string_pretty(&report.manifest)?);
        return Ok(());
    }

    print_summary(&report.manifest);
    println!("  Manifest: {}", report.manifest_path.display().to_string().dimmed());
    println!();
    Ok(())
}

fn print_summary(manifest: &RunManifest) {
    println!();
    println!("{}", "Training complete".bold().green());
    println!("  Run:      {}", manifest.run_id.to_string().cyan());
    println!("  VM:       {}", manifest.vm_label);
    println!("  Images:   {}", manifest.counts);
    println!(
        "  Weights:  fire {:.4}  nofire {:.4}",
        manifest.weights.weight_a, manifest.weights.weight_b
    );
    println!("  Split:    {} train / {} validation", manifest.train_items, manifest.validation_items);
    println!();

    println!("{:<7} {:>9} {:>9} {:>9} {:>9}", "Epoch", "loss", "acc", "val_loss", "val_acc");
    println!("{}", "─".repeat(47));
    for row in &manifest.history.epochs {
        println!(
            "{:<7} {:>9.4} {:>9.3} {:>9.4} {:>9.3}",
            row.epoch, row.train.loss, row.train.accuracy, row.validation.loss, row.validation.accuracy
        );
    }
    if manifest.history.stopped_early {
        println!("  {}", "Stopped early: validation loss stopped improving".yellow());
    }
    println!();

    match manifest.uploaded().and_then(|a| a.remote.as_deref()) {
        Some(remote) => println!("  Uploaded: {}", remote.cyan()),
        None => println!("  {}", "No checkpoint uploaded (target epoch not reached)".yellow()),
    }
}
