//! Ember Core
//!
//! Glue between configuration and the training pipeline:
//! - Loading and validating `ember.toml` / `config.json`
//! - Resolving the storage secret and wiring stores into a [`Runtime`]
//! - A bundled logistic baseline classifier
//!
//! # Example
//!
//! ```rust,no_run
//! use ember_core::{EmberConfig, Runtime};
//! use ember_training::TracingProgressSink;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> ember_core::Result<()> {
//!     let config = EmberConfig::load(None)?;
//!     let spec = config.pipeline_spec()?;
//!     let runtime = Runtime::bootstrap(config).await?;
//!     let mut model = Runtime::baseline_model(&spec);
//!     runtime.train(spec, &mut model, Arc::new(TracingProgressSink)).await?;
//!     Ok(())
//! }
//! ```

pub mod baseline;
pub mod config;
pub mod error;
pub mod runtime;

pub use baseline::LogisticBaseline;
pub use config::{ConfigError, EmberConfig, Requirement, StorageBackend, StrategyKind};
pub use error::{EmberError, Result};
pub use runtime::{Runtime, evaluate_model, secret_provider, vm_label_source};
