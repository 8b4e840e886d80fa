use crate::batch::Batch;
use crate::error::TrainingResult;
use crate::weights::ClassWeights;
use std::path::Path;

/// Result of one optimization step.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    /// Class-weighted mean loss over the batch.
    pub loss: f64,
    /// Positive-class probabilities before the update, one per item.
    pub predictions: Vec<f64>,
}

/// A binary classifier the pipeline can drive.
///
/// Architecture, optimizer and serialization format are up to the
/// implementation; the pipeline only needs these operations.
pub trait TrainableModel: Send + Sync {
    fn id(&self) -> &'static str;

    /// Extension of files written by [`TrainableModel::save`], without a dot.
    fn file_extension(&self) -> &'static str;

    fn train_on_batch(&mut self, batch: &Batch, weights: &ClassWeights) -> TrainingResult<BatchOutcome>;

    fn predict_batch(&self, batch: &Batch) -> TrainingResult<Vec<f64>>;

    fn save(&self, path: &Path) -> TrainingResult<()>;
}
