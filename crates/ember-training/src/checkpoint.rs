//! Epoch callbacks: local snapshots, the uploaded checkpoint and early stopping.

use crate::error::TrainingResult;
use crate::job::CheckpointSpec;
use crate::layout::TrainingLayout;
use crate::metrics::EpochMetrics;
use crate::model::TrainableModel;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::NaiveDate;
use ember_abstraction::{ObjectStore, VmLabelSource};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// `{date}-GPU-{vm_label}[-epoch-{epoch}].{ext}`
#[must_use]
pub fn snapshot_name(date: NaiveDate, vm_label: &str, epoch: Option<u32>, extension: &str) -> String {
    let date = date.format("%Y-%m-%d");
    match epoch {
        Some(epoch) => format!("{date}-GPU-{vm_label}-epoch-{epoch}.{extension}"),
        None => format!("{date}-GPU-{vm_label}.{extension}"),
    }
}

/// Blob name for a snapshot file uploaded by hand: `{date}-GPU-{vm_label}-{file_name}`.
#[must_use]
pub fn upload_name(date: NaiveDate, vm_label: &str, file_name: &str) -> String {
    format!("{}-GPU-{vm_label}-{file_name}", date.format("%Y-%m-%d"))
}

#[must_use]
pub fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackAction {
    Continue,
    Stop,
}

/// Runs after every completed epoch, in registration order.
#[async_trait]
pub trait EpochCallback: Send {
    async fn on_epoch_end(
        &mut self,
        metrics: &EpochMetrics,
        model: &dyn TrainableModel,
    ) -> TrainingResult<CallbackAction>;
}

/// Writes `model_epoch_<run>_<epoch:02>.<ext>` after every epoch.
pub struct LocalSnapshotCallback {
    layout: TrainingLayout,
    run_label: String,
    written: Vec<PathBuf>,
}

impl LocalSnapshotCallback {
    #[must_use]
    pub fn new(layout: TrainingLayout, run_label: impl Into<String>) -> Self {
        Self { layout, run_label: run_label.into(), written: Vec::new() }
    }

    #[must_use]
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }
}

#[async_trait]
impl EpochCallback for LocalSnapshotCallback {
    async fn on_epoch_end(
        &mut self,
        metrics: &EpochMetrics,
        model: &dyn TrainableModel,
    ) -> TrainingResult<CallbackAction> {
        let path = self.layout.epoch_snapshot_path(&self.run_label, metrics.epoch, model.file_extension());
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        model.save(&path)?;
        debug!(epoch = metrics.epoch, path = %path.display(), "Saved epoch snapshot");
        self.written.push(path);
        Ok(CallbackAction::Continue)
    }
}

/// A snapshot handed to the model container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedSnapshot {
    pub container: String,
    pub name: String,
    pub local_path: PathBuf,
    pub epoch: u32,
}

/// Saves and uploads the model once, at the configured epoch.
pub struct CheckpointSink {
    store: Arc<dyn ObjectStore>,
    vm_labels: Arc<dyn VmLabelSource>,
    snapshots_dir: PathBuf,
    spec: CheckpointSpec,
    date: Option<NaiveDate>,
    uploaded: Option<UploadedSnapshot>,
}

impl CheckpointSink {
    #[must_use]
    pub fn new(
        store: Arc<dyn ObjectStore>,
        vm_labels: Arc<dyn VmLabelSource>,
        snapshots_dir: PathBuf,
        spec: CheckpointSpec,
    ) -> Self {
        Self { store, vm_labels, snapshots_dir, spec, date: None, uploaded: None }
    }

    /// Pins the date used in snapshot names instead of today's.
    #[must_use]
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    #[must_use]
    pub fn uploaded(&self) -> Option<&UploadedSnapshot> {
        self.uploaded.as_ref()
    }

    /// No-op unless `epoch` is the target epoch and nothing was uploaded yet.
    pub async fn maybe_checkpoint(
        &mut self,
        model: &dyn TrainableModel,
        epoch: u32,
    ) -> TrainingResult<Option<&UploadedSnapshot>> {
        if epoch != self.spec.target_epoch || self.uploaded.is_some() {
            return Ok(None);
        }

        let vm_label = self.vm_labels.vm_label().await;
        let epoch_tag = self.spec.include_epoch_in_name.then_some(epoch);
        let name = snapshot_name(self.date.unwrap_or_else(today), &vm_label, epoch_tag, model.file_extension());

        tokio::fs::create_dir_all(&self.snapshots_dir).await?;
        let local_path = self.snapshots_dir.join(&name);
        model.save(&local_path)?;

        let bytes = tokio::fs::read(&local_path).await?;
        let size = bytes.len();
        self.store
            .put_bytes(&self.spec.model_container, &name, Bytes::from(bytes), true)
            .await?;
        info!(epoch, container = %self.spec.model_container, name = %name, bytes = size, "Uploaded checkpoint");

        let uploaded = self.uploaded.insert(UploadedSnapshot {
            container: self.spec.model_container.clone(),
            name,
            local_path,
            epoch,
        });
        Ok(Some(&*uploaded))
    }
}

#[async_trait]
impl EpochCallback for CheckpointSink {
    async fn on_epoch_end(
        &mut self,
        metrics: &EpochMetrics,
        model: &dyn TrainableModel,
    ) -> TrainingResult<CallbackAction> {
        self.maybe_checkpoint(model, metrics.epoch).await?;
        Ok(CallbackAction::Continue)
    }
}

/// Stops training once validation loss has not improved by `min_delta`
/// for `patience` consecutive epochs.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: u32,
    min_delta: f64,
    best: Option<f64>,
    waited: u32,
}

impl EarlyStopping {
    #[must_use]
    pub fn new(patience: u32, min_delta: f64) -> Self {
        Self { patience, min_delta, best: None, waited: 0 }
    }
}

#[async_trait]
impl EpochCallback for EarlyStopping {
    async fn on_epoch_end(
        &mut self,
        metrics: &EpochMetrics,
        _model: &dyn TrainableModel,
    ) -> TrainingResult<CallbackAction> {
        let loss = metrics.validation.loss;
        match self.best {
            Some(best) if loss > best - self.min_delta => {
                self.waited += 1;
                if self.waited >= self.patience {
                    info!(epoch = metrics.epoch, best, "Validation loss stalled; stopping early");
                    return Ok(CallbackAction::Stop);
                }
            }
            _ => {
                self.best = Some(loss);
                self.waited = 0;
            }
        }
        Ok(CallbackAction::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Batch;
    use crate::metrics::Evaluation;
    use crate::model::BatchOutcome;
    use crate::weights::ClassWeights;
    use ember_abstraction::{MemoryObjectStore, StaticVmLabel};
    use std::path::Path;
    use tempfile::TempDir;

    struct ConstModel;

    impl TrainableModel for ConstModel {
        fn id(&self) -> &'static str {
            "const"
        }
        fn file_extension(&self) -> &'static str {
            "json"
        }
        fn train_on_batch(&mut self, batch: &Batch, _: &ClassWeights) -> TrainingResult<BatchOutcome> {
            Ok(BatchOutcome { loss: 0.0, predictions: vec![0.5; batch.len()] })
        }
        fn predict_batch(&self, batch: &Batch) -> TrainingResult<Vec<f64>> {
            Ok(vec![0.5; batch.len()])
        }
        fn save(&self, path: &Path) -> TrainingResult<()> {
            std::fs::write(path, b"{\"model\":\"const\"}")?;
            Ok(())
        }
    }

    fn metrics(epoch: u32, val_loss: f64) -> EpochMetrics {
        EpochMetrics {
            epoch,
            train: Evaluation::default(),
            validation: Evaluation { loss: val_loss, ..Evaluation::default() },
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, 1).unwrap()
    }

    #[test]
    fn test_snapshot_names() {
        assert_eq!(snapshot_name(date(), "Standard_NC6", None, "keras"), "2024-07-01-GPU-Standard_NC6.keras");
        assert_eq!(
            snapshot_name(date(), "unknown_size", Some(5), "json"),
            "2024-07-01-GPU-unknown_size-epoch-5.json"
        );
        assert_eq!(upload_name(date(), "NC6", "model_epoch_1_05.keras"), "2024-07-01-GPU-NC6-model_epoch_1_05.keras");
    }

    #[tokio::test]
    async fn test_checkpoint_fires_once_at_target_epoch() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemoryObjectStore::new("data"));
        let spec = CheckpointSpec { target_epoch: 2, model_container: "models".to_string(), include_epoch_in_name: false };
        let mut sink = CheckpointSink::new(
            store.clone(),
            Arc::new(StaticVmLabel(String::new())),
            temp.path().to_path_buf(),
            spec,
        )
        .with_date(date());

        assert!(sink.maybe_checkpoint(&ConstModel, 1).await.unwrap().is_none());
        let uploaded = sink.maybe_checkpoint(&ConstModel, 2).await.unwrap().cloned().unwrap();
        assert_eq!(uploaded.name, "2024-07-01-GPU-unknown_size.json");
        assert!(sink.maybe_checkpoint(&ConstModel, 2).await.unwrap().is_none());
        assert!(sink.maybe_checkpoint(&ConstModel, 3).await.unwrap().is_none());

        assert_eq!(store.calls().put_bytes, 1);
        assert!(store.object("models", "2024-07-01-GPU-unknown_size.json").is_some());
        assert!(uploaded.local_path.exists());
    }

    #[tokio::test]
    async fn test_local_snapshots_every_epoch() {
        let temp = TempDir::new().unwrap();
        let mut cb = LocalSnapshotCallback::new(TrainingLayout::new(temp.path().to_path_buf()), "1");
        for epoch in 1..=3 {
            cb.on_epoch_end(&metrics(epoch, 0.5), &ConstModel).await.unwrap();
        }
        assert_eq!(cb.written().len(), 3);
        assert!(temp.path().join("saved_models_per_epoch/model_epoch_1_03.json").exists());
    }

    #[tokio::test]
    async fn test_early_stopping_after_patience() {
        let mut stop = EarlyStopping::new(2, 0.0);
        assert_eq!(stop.on_epoch_end(&metrics(1, 0.5), &ConstModel).await.unwrap(), CallbackAction::Continue);
        assert_eq!(stop.on_epoch_end(&metrics(2, 0.4), &ConstModel).await.unwrap(), CallbackAction::Continue);
        assert_eq!(stop.on_epoch_end(&metrics(3, 0.45), &ConstModel).await.unwrap(), CallbackAction::Continue);
        assert_eq!(stop.on_epoch_end(&metrics(4, 0.41), &ConstModel).await.unwrap(), CallbackAction::Stop);
    }
}
