//! Epoch loop and evaluation over batch providers.

use crate::batch::BatchProvider;
use crate::checkpoint::{CallbackAction, EpochCallback};
use crate::error::{TrainingError, TrainingResult};
use crate::job::RunId;
use crate::metrics::{EpochMetrics, Evaluation, History, MetricAccumulator};
use crate::model::TrainableModel;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::weights::ClassWeights;
use tracing::{info, warn};

pub struct FitPlan<'a> {
    pub run_id: &'a RunId,
    pub epochs: u32,
    pub weights: ClassWeights,
    pub progress: &'a dyn ProgressSink,
}

/// Trains for up to `plan.epochs` epochs (1-based).
///
/// Each epoch trains on every batch in order, scores the validation
/// provider, lets both providers reshuffle and then runs `callbacks` in
/// order. Training ends after the epoch in which any callback returns
/// [`CallbackAction::Stop`].
pub async fn fit(
    model: &mut dyn TrainableModel,
    train: &mut dyn BatchProvider,
    validation: &mut dyn BatchProvider,
    plan: &FitPlan<'_>,
    callbacks: &mut [&mut dyn EpochCallback],
) -> TrainingResult<History> {
    if train.is_empty() {
        return Err(TrainingError::Dataset(format!(
            "training split yields no full batch of {}",
            train.batch_size()
        )));
    }

    let run_id = plan.run_id;
    let total = train.len();
    plan.progress.on_event(ProgressEvent::Started {
        run_id: run_id.clone(),
        epochs: plan.epochs,
        batches_per_epoch: total,
    });

    let mut history = History::default();
    for epoch in 1..=plan.epochs {
        let mut acc = MetricAccumulator::new();
        for index in 0..total {
            let batch = train.get_batch(index).await?;
            let outcome = model.train_on_batch(&batch, &plan.weights)?;
            acc.update_with_loss(&batch.labels, &outcome.predictions, outcome.loss);
            plan.progress.on_event(ProgressEvent::Batch {
                run_id: run_id.clone(),
                epoch,
                batch: index + 1,
                total,
                loss: outcome.loss,
            });
        }

        let metrics = EpochMetrics { epoch, train: acc.finish(), validation: evaluate(&*model, &*validation).await? };
        history.epochs.push(metrics);
        plan.progress.on_event(ProgressEvent::Epoch { run_id: run_id.clone(), metrics });

        train.on_epoch_end();
        validation.on_epoch_end();

        let mut stop = false;
        for callback in callbacks.iter_mut() {
            if callback.on_epoch_end(&metrics, &*model).await? == CallbackAction::Stop {
                stop = true;
            }
        }
        if stop && epoch < plan.epochs {
            info!(epoch, epochs = plan.epochs, "Training stopped by callback");
            history.stopped_early = true;
            break;
        }
    }

    plan.progress.on_event(ProgressEvent::Finished { run_id: run_id.clone() });
    Ok(history)
}

/// Scores every full batch of `batches` with cross-entropy at a 0.5 threshold.
pub async fn evaluate(model: &dyn TrainableModel, batches: &dyn BatchProvider) -> TrainingResult<Evaluation> {
    if batches.is_empty() {
        warn!(batch_size = batches.batch_size(), "No full batch to evaluate");
    }
    let mut acc = MetricAccumulator::new();
    for index in 0..batches.len() {
        let batch = batches.get_batch(index).await?;
        let probabilities = model.predict_batch(&batch)?;
        if probabilities.len() != batch.len() {
            return Err(TrainingError::Model(format!(
                "{} returned {} predictions for {} items",
                model.id(),
                probabilities.len(),
                batch.len()
            )));
        }
        acc.update(&batch.labels, &probabilities);
    }
    Ok(acc.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::Batch;
    use crate::checkpoint::{CheckpointSink, EarlyStopping};
    use crate::job::CheckpointSpec;
    use crate::model::BatchOutcome;
    use crate::preprocess::ImageTensor;
    use crate::progress::NullProgressSink;
    use async_trait::async_trait;
    use ember_abstraction::{MemoryObjectStore, StaticVmLabel};
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct FixedBatches {
        batches: usize,
        size: usize,
        epoch_ends: usize,
    }

    #[async_trait]
    impl BatchProvider for FixedBatches {
        fn len(&self) -> usize {
            self.batches
        }
        fn batch_size(&self) -> usize {
            self.size
        }
        async fn get_batch(&self, index: usize) -> TrainingResult<Batch> {
            if index >= self.batches {
                return Err(TrainingError::BatchOutOfRange { index, length: self.batches });
            }
            let image = ImageTensor { width: 1, height: 1, data: vec![0.0; 3] };
            Ok(Batch {
                images: vec![image; self.size],
                labels: (0..self.size).map(|i| u8::from(i % 2 == 0)).collect(),
            })
        }
        fn on_epoch_end(&mut self) {
            self.epoch_ends += 1;
        }
    }

    /// Validation loss rises every epoch.
    #[derive(Default)]
    struct WorseningModel {
        steps: usize,
    }

    impl TrainableModel for WorseningModel {
        fn id(&self) -> &'static str {
            "worsening"
        }
        fn file_extension(&self) -> &'static str {
            "json"
        }
        fn train_on_batch(&mut self, batch: &Batch, _: &ClassWeights) -> TrainingResult<BatchOutcome> {
            self.steps += 1;
            Ok(BatchOutcome { loss: 0.7, predictions: vec![0.5; batch.len()] })
        }
        #[allow(clippy::cast_precision_loss)]
        fn predict_batch(&self, batch: &Batch) -> TrainingResult<Vec<f64>> {
            let drift = (self.steps as f64 * 0.01).min(0.4);
            Ok(batch.labels.iter().map(|&y| if y == 1 { 0.5 - drift } else { 0.5 + drift }).collect())
        }
        fn save(&self, path: &Path) -> TrainingResult<()> {
            std::fs::write(path, b"{}")?;
            Ok(())
        }
    }

    fn providers() -> (FixedBatches, FixedBatches) {
        (
            FixedBatches { batches: 3, size: 4, epoch_ends: 0 },
            FixedBatches { batches: 1, size: 4, epoch_ends: 0 },
        )
    }

    #[tokio::test]
    async fn test_fit_runs_all_epochs_and_reshuffles_providers() {
        let (mut train, mut validation) = providers();
        let mut model = WorseningModel::default();
        let run_id = RunId::new();
        let plan = FitPlan { run_id: &run_id, epochs: 4, weights: ClassWeights::uniform(), progress: &NullProgressSink };

        let history = fit(&mut model, &mut train, &mut validation, &plan, &mut []).await.unwrap();
        assert_eq!(history.completed_epochs(), 4);
        assert!(!history.stopped_early);
        assert_eq!(model.steps, 12);
        assert_eq!(train.epoch_ends, 4);
        assert_eq!(validation.epoch_ends, 4);
        assert_eq!(history.epochs[0].validation.samples, 4);
    }

    #[tokio::test]
    async fn test_checkpoint_never_fires_when_training_stops_early() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(MemoryObjectStore::new("data"));
        let mut sink = CheckpointSink::new(
            store.clone(),
            Arc::new(StaticVmLabel("NC6".to_string())),
            temp.path().to_path_buf(),
            CheckpointSpec { target_epoch: 5, model_container: "models".to_string(), include_epoch_in_name: false },
        );
        let mut stopper = EarlyStopping::new(1, 0.0);

        let (mut train, mut validation) = providers();
        let mut model = WorseningModel::default();
        let run_id = RunId::new();
        let plan = FitPlan { run_id: &run_id, epochs: 5, weights: ClassWeights::uniform(), progress: &NullProgressSink };

        let history = fit(&mut model, &mut train, &mut validation, &plan, &mut [&mut stopper, &mut sink])
            .await
            .unwrap();
        assert!(history.stopped_early);
        assert_eq!(history.completed_epochs(), 2);
        assert!(sink.uploaded().is_none());
        assert_eq!(store.calls().put_bytes, 0);
    }

    #[tokio::test]
    async fn test_empty_training_provider_is_rejected() {
        let mut train = FixedBatches { batches: 0, size: 32, epoch_ends: 0 };
        let mut validation = FixedBatches { batches: 1, size: 4, epoch_ends: 0 };
        let run_id = RunId::new();
        let plan = FitPlan { run_id: &run_id, epochs: 1, weights: ClassWeights::uniform(), progress: &NullProgressSink };
        let err = fit(&mut WorseningModel::default(), &mut train, &mut validation, &plan, &mut [])
            .await
            .unwrap_err();
        assert!(matches!(err, TrainingError::Dataset(_)));
    }
}
