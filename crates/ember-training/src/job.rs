use crate::dataset::{DatasetLocation, LabelRule};
use crate::error::{TrainingError, TrainingResult};
use crate::preprocess::{Augmentation, ImageSpec};
use crate::split::SplitOrder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;
use uuid::Uuid;

/// Identifier for a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Where training data comes from. Chosen once per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataStrategy {
    /// Local cache kept in sync with a remote archive.
    Archive { archive_key: String, cache_root: PathBuf, class_a_dir: PathBuf, class_b_dir: PathBuf },
    /// Objects are fetched per batch, never stored locally.
    RemoteStream { class_a_prefix: String, class_b_prefix: String },
    /// Objects are downloaded under `target_root`, one directory per label marker, before training.
    RemoteMaterialize { class_a_prefix: String, class_b_prefix: String, target_root: PathBuf },
}

impl DataStrategy {
    #[must_use]
    pub fn location(&self) -> DatasetLocation {
        match self {
            Self::Archive { class_a_dir, class_b_dir, .. } => {
                DatasetLocation::Local { class_a: class_a_dir.clone(), class_b: class_b_dir.clone() }
            }
            Self::RemoteStream { class_a_prefix, class_b_prefix }
            | Self::RemoteMaterialize { class_a_prefix, class_b_prefix, .. } => DatasetLocation::Remote {
                class_a_prefix: class_a_prefix.clone(),
                class_b_prefix: class_b_prefix.clone(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SplitStrategy {
    RatioSlice {
        train_ratio: f64,
        #[serde(default)]
        order: SplitOrder,
    },
    SeededShuffle { validation_fraction: f64, seed: u64 },
}

impl Default for SplitStrategy {
    fn default() -> Self {
        Self::SeededShuffle { validation_fraction: 0.2, seed: 481 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HyperParams {
    pub seed: u64,
    pub epochs: u32,
    pub learning_rate: f64,
    pub batch_size: usize,
    /// Stop after this many epochs without validation-loss improvement.
    #[serde(default)]
    pub early_stopping_patience: Option<u32>,
}

impl Default for HyperParams {
    fn default() -> Self {
        Self { seed: 481, epochs: 10, learning_rate: 1e-3, batch_size: 32, early_stopping_patience: None }
    }
}

impl HyperParams {
    pub fn validate(&self) -> TrainingResult<()> {
        if self.epochs == 0 {
            return Err(TrainingError::InvalidSpec("epochs must be >= 1".to_string()));
        }
        if !(self.learning_rate.is_finite()) || self.learning_rate <= 0.0 {
            return Err(TrainingError::InvalidSpec("learning_rate must be > 0".to_string()));
        }
        if self.batch_size == 0 {
            return Err(TrainingError::InvalidSpec("batch_size must be >= 1".to_string()));
        }
        if self.early_stopping_patience == Some(0) {
            return Err(TrainingError::InvalidSpec("early_stopping_patience must be >= 1".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointSpec {
    /// 1-based epoch whose model is uploaded.
    pub target_epoch: u32,
    pub model_container: String,
    #[serde(default)]
    pub include_epoch_in_name: bool,
}

impl Default for CheckpointSpec {
    fn default() -> Self {
        Self { target_epoch: 10, model_container: "models".to_string(), include_epoch_in_name: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub run_id: RunId,
    pub created_at: DateTime<Utc>,
    pub data: DataStrategy,
    #[serde(default)]
    pub split: SplitStrategy,
    #[serde(default)]
    pub hyperparams: HyperParams,
    #[serde(default)]
    pub image: ImageSpec,
    #[serde(default)]
    pub labels: LabelRule,
    #[serde(default)]
    pub checkpoint: CheckpointSpec,
    /// Applied to training batches only.
    #[serde(default)]
    pub augmentation: Option<Augmentation>,
}

impl PipelineSpec {
    #[must_use]
    pub fn new(data: DataStrategy) -> Self {
        Self {
            run_id: RunId::new(),
            created_at: Utc::now(),
            data,
            split: SplitStrategy::default(),
            hyperparams: HyperParams::default(),
            image: ImageSpec::default(),
            labels: LabelRule::default(),
            checkpoint: CheckpointSpec::default(),
            augmentation: None,
        }
    }

    pub fn validate(&self) -> TrainingResult<()> {
        self.hyperparams.validate()?;

        match self.split {
            SplitStrategy::RatioSlice { train_ratio: r, .. }
            | SplitStrategy::SeededShuffle { validation_fraction: r, .. } => {
                if !(r.is_finite() && r > 0.0 && r < 1.0) {
                    return Err(TrainingError::InvalidSpec(format!("split ratio must be in (0, 1), got {r}")));
                }
            }
        }

        if self.image.width == 0 || self.image.height == 0 {
            return Err(TrainingError::InvalidSpec("image size must be non-zero".to_string()));
        }
        if let Some(augmentation) = &self.augmentation {
            augmentation.validate()?;
        }
        if self.labels.positive_marker.trim().is_empty() {
            return Err(TrainingError::InvalidSpec("labels.positive_marker is required".to_string()));
        }
        if self.checkpoint.model_container.trim().is_empty() {
            return Err(TrainingError::InvalidSpec("checkpoint.model_container is required".to_string()));
        }

        match &self.data {
            DataStrategy::Archive { archive_key, .. } if archive_key.trim().is_empty() => {
                return Err(TrainingError::InvalidSpec("data.archive_key is required".to_string()));
            }
            DataStrategy::RemoteStream { class_a_prefix, class_b_prefix }
            | DataStrategy::RemoteMaterialize { class_a_prefix, class_b_prefix, .. }
                if class_a_prefix == class_b_prefix =>
            {
                return Err(TrainingError::InvalidSpec("class prefixes must differ".to_string()));
            }
            _ => {}
        }

        let target = self.checkpoint.target_epoch;
        if target == 0 || target > self.hyperparams.epochs {
            warn!(
                target_epoch = target,
                epochs = self.hyperparams.epochs,
                "Checkpoint target epoch is outside the run; no checkpoint will be uploaded"
            );
        }
        Ok(())
    }
}
