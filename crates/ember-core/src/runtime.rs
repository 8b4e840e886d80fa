//! Turns configuration and secrets into live collaborators.
//!
//! Secrets are resolved exactly once, at bootstrap. Every command then works
//! against the stores, VM label source and run layout held by [`Runtime`].

use crate::baseline::LogisticBaseline;
use crate::config::{ConfigError, EmberConfig, Requirement, StorageBackend};
use crate::error::Result;
use ember_abstraction::{ObjectStore, SecretError, SecretProvider, StaticVmLabel, VmLabelSource};
use ember_cloud::{AzureBlobStore, EnvSecretProvider, FsObjectStore, InstanceMetadataClient, KeyVaultSecretProvider};
use ember_training::{
    ArchiveSynchronizer, Evaluation, ImageCountTable, PipelineContext, PipelineSpec, ProgressSink, RunReport,
    TrainableModel, TrainingLayout, TrainingPipeline, download_snapshot, evaluate_directories, upload_snapshot_file,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const EVAL_BATCH_SIZE: usize = 32;

enum StoreRoot {
    Azure(AzureBlobStore),
    Local(PathBuf),
}

pub struct Runtime {
    config: EmberConfig,
    stores: StoreRoot,
    vm_labels: Arc<dyn VmLabelSource>,
    layout: TrainingLayout,
}

/// Key Vault when a vault is configured, otherwise `EMBER_SECRET_*` variables read through `lookup`.
pub fn secret_provider(
    config: &EmberConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Box<dyn SecretProvider>> {
    if let Some(vault) = config.key_vault_name.as_deref().filter(|v| !v.trim().is_empty()) {
        debug!(vault, "Using Key Vault secret provider");
        return Ok(Box::new(KeyVaultSecretProvider::for_vault_name(vault)?));
    }

    let env = EnvSecretProvider::default();
    let var = env.env_var_name(config.secret_name());
    if lookup(&var).is_some_and(|v| !v.trim().is_empty()) {
        debug!(var = %var, "Using environment secret provider");
        return Ok(Box::new(env));
    }

    Err(ConfigError::Missing(vec!["key_vault_name"]).into())
}

/// Configured VM size if present, the instance metadata endpoint otherwise.
pub fn vm_label_source(config: &EmberConfig) -> Arc<dyn VmLabelSource> {
    match config.vm_size.as_deref().filter(|v| !v.trim().is_empty()) {
        Some(size) => Arc::new(StaticVmLabel(size.to_string())),
        None => Arc::new(InstanceMetadataClient::default()),
    }
}

impl Runtime {
    /// Resolves the storage secret (azure backend) and builds the runtime.
    pub async fn bootstrap(config: EmberConfig) -> Result<Self> {
        match config.backend() {
            StorageBackend::Local => Self::connect(config, None).await,
            StorageBackend::Azure => {
                let secrets = secret_provider(&config, |key| std::env::var(key).ok())?;
                Self::connect(config, Some(secrets.as_ref())).await
            }
        }
    }

    /// Builds the runtime with an explicit secret source.
    ///
    /// An empty or missing storage secret is fatal.
    pub async fn connect(config: EmberConfig, secrets: Option<&dyn SecretProvider>) -> Result<Self> {
        config.validate(&[Requirement::Storage])?;

        let stores = match config.backend() {
            StorageBackend::Azure => {
                let secrets = secrets.ok_or(ConfigError::Missing(vec!["key_vault_name"]))?;
                let name = config.secret_name();
                let raw = secrets.resolve(name).await?;
                if raw.trim().is_empty() {
                    return Err(SecretError::Empty(name.to_string()).into());
                }
                let container = config.container_name.as_deref().unwrap_or_default();
                StoreRoot::Azure(AzureBlobStore::from_connection_string(&raw, container)?)
            }
            StorageBackend::Local => {
                let root = config.storage.local_root.clone().unwrap_or_default();
                info!(root = %root.display(), "Using local object store");
                StoreRoot::Local(root)
            }
        };

        let vm_labels = vm_label_source(&config);
        let layout = TrainingLayout::new(config.output_dir());
        Ok(Self { config, stores, vm_labels, layout })
    }

    #[must_use]
    pub fn config(&self) -> &EmberConfig {
        &self.config
    }

    #[must_use]
    pub fn layout(&self) -> &TrainingLayout {
        &self.layout
    }

    #[must_use]
    pub fn vm_labels(&self) -> Arc<dyn VmLabelSource> {
        self.vm_labels.clone()
    }

    /// Store reading from `container`; writes may target any container.
    #[must_use]
    pub fn store_for(&self, container: &str) -> Arc<dyn ObjectStore> {
        match &self.stores {
            StoreRoot::Azure(base) => Arc::new(base.for_container(container)),
            StoreRoot::Local(root) => Arc::new(FsObjectStore::new(root.clone(), container)),
        }
    }

    pub fn dataset_store(&self) -> Result<Arc<dyn ObjectStore>> {
        self.config.validate(&[Requirement::DatasetContainer])?;
        Ok(self.store_for(self.config.container_name.as_deref().unwrap_or_default()))
    }

    pub fn model_store(&self) -> Result<Arc<dyn ObjectStore>> {
        self.config.validate(&[Requirement::ModelContainer])?;
        Ok(self.store_for(self.config.model_container_name.as_deref().unwrap_or_default()))
    }

    pub fn pipeline_context(&self, progress: Arc<dyn ProgressSink>) -> Result<PipelineContext> {
        Ok(PipelineContext {
            store: self.dataset_store()?,
            vm_labels: self.vm_labels.clone(),
            progress,
            layout: self.layout.clone(),
        })
    }

    /// Baseline model matching the run's learning rate and input normalization.
    #[must_use]
    pub fn baseline_model(spec: &PipelineSpec) -> LogisticBaseline {
        LogisticBaseline::new(spec.hyperparams.learning_rate, spec.image.normalization)
    }

    pub async fn train(
        &self,
        spec: PipelineSpec,
        model: &mut dyn TrainableModel,
        progress: Arc<dyn ProgressSink>,
    ) -> Result<RunReport> {
        let pipeline = TrainingPipeline::new(self.pipeline_context(progress)?, spec);
        Ok(pipeline.run(model).await?)
    }

    /// Runs the archive synchronizer alone against `cache_root`.
    pub async fn sync_dataset(&self, cache_root: &Path) -> Result<ImageCountTable> {
        self.config.validate(&[Requirement::DatasetContainer, Requirement::DatasetArchive])?;
        let archive = self.config.dataset_archive.as_deref().unwrap_or_default();
        let (fire_dir, nofire_dir) = self.config.class_dirs(cache_root);
        let synchronizer = ArchiveSynchronizer::new(self.dataset_store()?);
        let counts = synchronizer.ensure_local_dataset(cache_root, &fire_dir, &nofire_dir, archive).await?;
        Ok(counts)
    }

    /// Uploads an existing model file to the model container. Returns the blob name.
    pub async fn upload_model(&self, path: &Path) -> Result<String> {
        self.config.validate(&[Requirement::ModelContainer])?;
        let container = self.config.model_container_name.as_deref().unwrap_or_default();
        let store = self.store_for(container);
        Ok(upload_snapshot_file(store.as_ref(), self.vm_labels.as_ref(), container, path).await?)
    }

    /// Fetches `name` (or the configured `model_name`) into the models directory.
    pub async fn download_model(&self, name: Option<&str>) -> Result<PathBuf> {
        let name = match name {
            Some(name) => name.to_string(),
            None => {
                self.config.validate(&[Requirement::ModelName])?;
                self.config.model_name.clone().unwrap_or_default()
            }
        };
        let store = self.model_store()?;
        Ok(download_snapshot(store.as_ref(), &name, &self.layout.models_dir()).await?)
    }
}

/// Scores a saved baseline model on the class directories under `data_dir`.
///
/// Needs no storage; `data_dir` defaults to the configured testing directory.
pub async fn evaluate_model(config: &EmberConfig, model_path: &Path, data_dir: Option<&Path>) -> Result<Evaluation> {
    let model = LogisticBaseline::load(model_path)?;
    let root = data_dir.map_or_else(|| config.testing_data_dir(), Path::to_path_buf);
    let batch_size = config.training.batch_size.unwrap_or(EVAL_BATCH_SIZE);

    let (fire_dir, nofire_dir) = config.class_dirs(&root);
    let evaluation =
        evaluate_directories(&model, &fire_dir, &nofire_dir, batch_size, config.image_spec(), config.label_rule())
            .await?;
    Ok(evaluation)
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match self.stores {
            StoreRoot::Azure(_) => "azure",
            StoreRoot::Local(_) => "local",
        };
        f.debug_struct("Runtime").field("backend", &backend).field("layout", &self.layout).finish_non_exhaustive()
    }
}
