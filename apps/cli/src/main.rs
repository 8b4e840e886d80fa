//! Ember CLI - training and model management for the fire / no-fire classifier
//!
//! Provides the `ember` command: dataset synchronization, training runs with
//! checkpoint upload, evaluation of saved models, and model transfer to and
//! from the model container.

mod commands;
mod progress;

use clap::{Parser, Subcommand};
use ember_core::EmberConfig;
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Ember CLI - fire / no-fire classifier training
#[derive(Parser, Debug)]
#[command(
    name = "ember",
    author,
    version,
    about = "Ember - fire / no-fire classifier training",
    long_about = "Ember keeps an image dataset in sync with blob storage, trains a binary fire / no-fire\nclassifier over it and uploads the resulting checkpoint."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error); defaults to the configured level
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Configuration file (TOML, or JSON with a .json extension)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train the classifier and upload the target-epoch checkpoint
    Train {
        /// Override the configured number of epochs
        #[arg(long)]
        epochs: Option<u32>,

        /// Print the run manifest as JSON
        #[arg(long)]
        json: bool,
    },

    /// Make sure the local dataset cache is populated, downloading the archive if needed
    SyncDataset {
        /// Sync into the testing directory instead of the training directory
        #[arg(long)]
        testing: bool,

        /// Explicit target directory
        #[arg(long, conflicts_with = "testing")]
        target: Option<PathBuf>,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Evaluate a saved model on a local test directory
    Evaluate {
        /// Saved model file
        #[arg(long)]
        model: PathBuf,

        /// Directory holding the class subdirectories (defaults to the testing directory)
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Output results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Upload an existing model file to the model container
    UploadModel {
        /// Model file to upload
        path: PathBuf,
    },

    /// Download a model from the model container
    DownloadModel {
        /// Blob name (defaults to the configured model_name)
        name: Option<String>,
    },
}

fn parse_level(value: &str) -> Level {
    match value.to_ascii_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Configuration is loaded before tracing so its log_level can apply;
    // load errors are reported once the subscriber is in place.
    let loaded = EmberConfig::load(args.config.as_deref());
    let configured_level = loaded.as_ref().ok().and_then(|c| c.log_level.clone());
    let level = parse_level(args.log_level.as_deref().or(configured_level.as_deref()).unwrap_or("info"));

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = loaded.map_err(|e| anyhow::anyhow!("Failed to load configuration: {e}"))?;

    match args.command {
        Command::Train { epochs, json } => commands::train::execute(config, epochs, json).await,
        Command::SyncDataset { testing, target, json } => {
            commands::sync::execute(config, testing, target, json).await
        }
        Command::Evaluate { model, data_dir, json } => {
            commands::evaluate::execute(&config, &model, data_dir.as_deref(), json).await
        }
        Command::UploadModel { path } => commands::models::upload(config, &path).await,
        Command::DownloadModel { name } => commands::models::download(config, name.as_deref()).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_are_well_formed() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("DEBUG"), Level::DEBUG);
        assert_eq!(parse_level("bogus"), Level::INFO);
    }

    #[test]
    fn test_evaluate_requires_model() {
        assert!(Args::try_parse_from(["ember", "evaluate"]).is_err());
        let args = Args::try_parse_from(["ember", "--log-level", "warn", "evaluate", "--model", "m.json"]).unwrap();
        assert!(matches!(args.command, Command::Evaluate { .. }));
        assert_eq!(args.log_level.as_deref(), Some("warn"));
    }
}
