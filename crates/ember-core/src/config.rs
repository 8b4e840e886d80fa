//! Configuration file support.
//!
//! Ember reads TOML (`ember.toml`) and also accepts the flat JSON
//! `config.json` used by the VM provisioning scripts. Both map onto
//! [`EmberConfig`].

use ember_training::{
    Augmentation, CheckpointSpec, DataStrategy, HyperParams, ImageSpec, LabelRule, Normalization, PipelineSpec,
    SplitOrder, SplitStrategy,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_SECRET_NAME: &str = "AzureStorageConnectionString";
const DEFAULT_DATA_DIR: &str = "/mnt/data/training";
const DEFAULT_TESTING_DIR: &str = "/mnt/data/testing";
const DEFAULT_OUTPUT_DIR: &str = "/mnt/data";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    /// Azure Blob Storage, connection string from the vault.
    Azure,
    /// A directory tree standing in for the storage account.
    Local,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: Option<StorageBackend>,

    /// Root directory for the local backend; containers are subdirectories.
    #[serde(default)]
    pub local_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Archive,
    RemoteStream,
    RemoteMaterialize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitKind {
    Seeded,
    Ratio,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default)]
    pub strategy: Option<StrategyKind>,
    #[serde(default)]
    pub epochs: Option<u32>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub learning_rate: Option<f64>,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub split: Option<SplitKind>,
    /// Validation share for the seeded split.
    #[serde(default)]
    pub validation_split: Option<f64>,
    /// Training share for the ratio split.
    #[serde(default)]
    pub train_ratio: Option<f64>,
    #[serde(default)]
    pub split_order: Option<SplitOrder>,
    /// Epoch whose model is uploaded; defaults to the last one.
    #[serde(default)]
    pub target_epoch: Option<u32>,
    #[serde(default)]
    pub include_epoch_in_name: Option<bool>,
    #[serde(default)]
    pub image_size: Option<u32>,
    #[serde(default)]
    pub normalization: Option<Normalization>,
    #[serde(default)]
    pub early_stopping_patience: Option<u32>,
    /// Where remote objects are written for `remote_materialize`.
    #[serde(default)]
    pub materialize_dir: Option<PathBuf>,
    /// Random rotation, zoom and flip on training batches. On by default for `archive`.
    #[serde(default)]
    pub augment: Option<bool>,
}

/// Ember configuration.
///
/// Top-level keys keep the names used by the provisioning scripts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmberConfig {
    #[serde(default)]
    pub key_vault_name: Option<String>,

    /// Vault secret holding the storage connection string.
    #[serde(default)]
    pub storage_secret_name: Option<String>,

    /// Dataset container.
    #[serde(default)]
    pub container_name: Option<String>,

    #[serde(default)]
    pub model_container_name: Option<String>,

    /// Archive blob name inside the dataset container.
    #[serde(default)]
    pub dataset_archive: Option<String>,

    /// Fixed VM label; the instance metadata endpoint is queried when unset.
    #[serde(default)]
    pub vm_size: Option<String>,

    /// Positive-class directory name or remote prefix.
    #[serde(default)]
    pub fire_directory: Option<String>,

    #[serde(default)]
    pub nofire_directory: Option<String>,

    /// Blob to fetch with `download-model`.
    #[serde(default)]
    pub model_name: Option<String>,

    /// Local training dataset cache.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub testing_data_dir: Option<PathBuf>,

    /// Root for snapshots, run manifests and downloaded models.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,

    #[serde(default)]
    pub log_level: Option<String>,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub training: TrainingConfig,
}

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    #[error("Failed to read configuration file: {0}")]
    ReadError(String),

    #[error("Failed to parse configuration file: {0}")]
    ParseError(String),

    #[error("Missing required configuration keys: {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Keys a command cannot run without.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    /// Local root for the local backend. The azure secret source is checked at bootstrap.
    Storage,
    DatasetContainer,
    ModelContainer,
    DatasetArchive,
    ModelName,
}

macro_rules! merge_fields {
    ($dst:expr, $src:expr; $($field:ident),+ $(,)?) => {
        $(
            if let Some(ref value) = $src.$field {
                $dst.$field = Some(value.clone());
            }
        )+
    };
}

impl EmberConfig {
    /// Load configuration from a file. `.json` files are read as JSON, anything else as TOML.
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;

        let is_json = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))
        } else {
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))
        }
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> ConfigResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(format!("Failed to serialize: {}", e)))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::ReadError(format!("Failed to create directory: {}", e)))?;
        }

        std::fs::write(path, content).map_err(|e| ConfigError::ReadError(format!("Failed to write file: {}", e)))?;

        Ok(())
    }

    /// Get default global configuration file path.
    pub fn default_global_path() -> PathBuf {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".ember")
            .join("config.toml")
    }

    /// Get default local configuration file path.
    pub fn default_local_path() -> PathBuf {
        PathBuf::from("ember.toml")
    }

    /// Discover and load configuration files.
    ///
    /// Loads configuration from:
    /// 1. Global config (~/.ember/config.toml)
    /// 2. Local config (./ember.toml)
    ///
    /// Local config overrides global config. Unreadable files are skipped.
    pub fn discover_and_load() -> Self {
        let mut config = Self::default();

        for path in [Self::default_global_path(), Self::default_local_path()] {
            if let Ok(found) = Self::load_from_file(&path) {
                config.merge(&found);
            }
        }

        config
    }

    /// Explicit path if given (must exist), discovery otherwise; then environment overrides.
    pub fn load(explicit: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match explicit {
            Some(path) => Self::load_from_file(path)?,
            None => Self::discover_and_load(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Merge another configuration into this one.
    ///
    /// Values from `other` override values in `self` if they are Some.
    pub fn merge(&mut self, other: &Self) {
        merge_fields!(self, other;
            key_vault_name, storage_secret_name, container_name, model_container_name,
            dataset_archive, vm_size, fire_directory, nofire_directory, model_name,
            data_dir, testing_data_dir, output_dir, log_level,
        );
        merge_fields!(self.storage, other.storage; backend, local_root);
        merge_fields!(self.training, other.training;
            strategy, epochs, batch_size, learning_rate, seed, split, validation_split,
            train_ratio, split_order, target_epoch, include_epoch_in_name, image_size,
            normalization, early_stopping_patience, materialize_dir, augment,
        );
    }

    /// Applies `EMBER_*` overrides read through `lookup`. Empty values are ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = get("EMBER_CONTAINER") {
            self.container_name = Some(v);
        }
        if let Some(v) = get("EMBER_MODEL_CONTAINER") {
            self.model_container_name = Some(v);
        }
        if let Some(v) = get("EMBER_VM_SIZE") {
            self.vm_size = Some(v);
        }
        if let Some(v) = get("EMBER_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(v));
        }
    }

    /// Reports every missing key for `requirements` at once.
    pub fn validate(&self, requirements: &[Requirement]) -> ConfigResult<()> {
        let mut missing = Vec::new();
        let absent = |v: &Option<String>| v.as_deref().is_none_or(|s| s.trim().is_empty());

        for requirement in requirements {
            match requirement {
                Requirement::Storage => {
                    if self.backend() == StorageBackend::Local && self.storage.local_root.is_none() {
                        missing.push("storage.local_root");
                    }
                }
                Requirement::DatasetContainer if absent(&self.container_name) => missing.push("container_name"),
                Requirement::ModelContainer if absent(&self.model_container_name) => {
                    missing.push("model_container_name");
                }
                Requirement::DatasetArchive if absent(&self.dataset_archive) => missing.push("dataset_archive"),
                Requirement::ModelName if absent(&self.model_name) => missing.push("model_name"),
                _ => {}
            }
        }

        if missing.is_empty() { Ok(()) } else { Err(ConfigError::Missing(missing)) }
    }

    pub fn backend(&self) -> StorageBackend {
        self.storage.backend.unwrap_or(StorageBackend::Azure)
    }

    pub fn secret_name(&self) -> &str {
        self.storage_secret_name.as_deref().unwrap_or(DEFAULT_SECRET_NAME)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR))
    }

    pub fn testing_data_dir(&self) -> PathBuf {
        self.testing_data_dir.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_TESTING_DIR))
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR))
    }

    pub fn fire_directory(&self) -> &str {
        self.fire_directory.as_deref().unwrap_or("fire")
    }

    pub fn nofire_directory(&self) -> &str {
        self.nofire_directory.as_deref().unwrap_or("nofire")
    }

    /// Local class directories under `root`, named after the last segment of each class setting.
    pub fn class_dirs(&self, root: &Path) -> (PathBuf, PathBuf) {
        (root.join(key_tail(self.fire_directory())), root.join(key_tail(self.nofire_directory())))
    }

    /// Label rule derived from the class directory names.
    pub fn label_rule(&self) -> LabelRule {
        let positive = key_tail(self.fire_directory());
        let negative = key_tail(self.nofire_directory());
        LabelRule::new(positive, (!negative.is_empty()).then(|| negative.to_string()))
    }

    pub fn strategy(&self) -> StrategyKind {
        self.training.strategy.unwrap_or(if self.dataset_archive.is_some() {
            StrategyKind::Archive
        } else {
            StrategyKind::RemoteStream
        })
    }

    /// Square input size; remote streaming defaults to ResNet-style BGR preprocessing.
    pub fn image_spec(&self) -> ImageSpec {
        let size = self.training.image_size.unwrap_or(224);
        let normalization = self.training.normalization.unwrap_or(match self.strategy() {
            StrategyKind::RemoteStream => Normalization::CaffeBgr,
            _ => Normalization::UnitRange,
        });
        ImageSpec { width: size, height: size, normalization }
    }

    /// Builds the run description for `train`.
    pub fn pipeline_spec(&self) -> ConfigResult<PipelineSpec> {
        let mut requirements = vec![Requirement::Storage, Requirement::DatasetContainer, Requirement::ModelContainer];
        let strategy = self.strategy();
        if strategy == StrategyKind::Archive {
            requirements.push(Requirement::DatasetArchive);
        }
        self.validate(&requirements)?;

        let data = match strategy {
            StrategyKind::Archive => {
                let cache_root = self.data_dir();
                let (class_a_dir, class_b_dir) = self.class_dirs(&cache_root);
                DataStrategy::Archive {
                    archive_key: self.dataset_archive.clone().unwrap_or_default(),
                    class_a_dir,
                    class_b_dir,
                    cache_root,
                }
            }
            StrategyKind::RemoteStream => DataStrategy::RemoteStream {
                class_a_prefix: self.fire_directory().to_string(),
                class_b_prefix: self.nofire_directory().to_string(),
            },
            StrategyKind::RemoteMaterialize => DataStrategy::RemoteMaterialize {
                class_a_prefix: self.fire_directory().to_string(),
                class_b_prefix: self.nofire_directory().to_string(),
                target_root: self.training.materialize_dir.clone().unwrap_or_else(|| self.data_dir()),
            },
        };

        let t = &self.training;
        let defaults = HyperParams::default();
        let hyperparams = HyperParams {
            seed: t.seed.unwrap_or(defaults.seed),
            epochs: t.epochs.unwrap_or(defaults.epochs),
            learning_rate: t.learning_rate.unwrap_or(defaults.learning_rate),
            batch_size: t.batch_size.unwrap_or(defaults.batch_size),
            early_stopping_patience: t.early_stopping_patience,
        };

        let split = match t.split.unwrap_or(SplitKind::Seeded) {
            SplitKind::Seeded => SplitStrategy::SeededShuffle {
                validation_fraction: t.validation_split.unwrap_or(0.2),
                seed: hyperparams.seed,
            },
            SplitKind::Ratio => SplitStrategy::RatioSlice {
                train_ratio: t.train_ratio.unwrap_or(0.8),
                order: t.split_order.unwrap_or_default(),
            },
        };

        let mut spec = PipelineSpec::new(data);
        spec.split = split;
        spec.image = self.image_spec();
        spec.labels = self.label_rule();
        spec.checkpoint = CheckpointSpec {
            target_epoch: t.target_epoch.unwrap_or(hyperparams.epochs),
            model_container: self.model_container_name.clone().unwrap_or_default(),
            include_epoch_in_name: t.include_epoch_in_name.unwrap_or(false),
        };
        spec.hyperparams = hyperparams;
        spec.augmentation = t.augment.unwrap_or(strategy == StrategyKind::Archive).then(Augmentation::default);

        spec.validate().map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
        Ok(spec)
    }
}

/// Last non-empty path segment: `training/fire/` -> `fire`.
fn key_tail(value: &str) -> &str {
    value.trim_end_matches(['/', '\\']).rsplit(['/', '\\']).next().unwrap_or(value)
}
