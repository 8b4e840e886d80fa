//! Model upload and download commands.

use anyhow::{Context, Result};
use colored::Colorize;
use ember_core::{EmberConfig, Runtime};
use std::path::Path;

pub async fn upload(config: EmberConfig, path: &Path) -> Result<()> {
    let runtime = Runtime::bootstrap(config).await.context("Failed to initialize storage")?;
    let name = runtime
        .upload_model(path)
        .await
        .with_context(|| format!("Failed to upload {}", path.display()))?;

    let container = runtime.config().model_container_name.as_deref().unwrap_or_default();
    println!("{} {}/{}", "✓ Uploaded".green(), container, name.cyan());
    Ok(())
}

pub async fn download(config: EmberConfig, name: Option<&str>) -> Result<()> {
    let runtime = Runtime::bootstrap(config).await.context("Failed to initialize storage")?;
    let path = runtime.download_model(name).await.context("Failed to download model")?;
    println!("{} {}", "✓ Downloaded".green(), path.display().to_string().cyan());
    Ok(())
}
