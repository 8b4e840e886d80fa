//! A small logistic classifier over pooled channel means.
//!
//! Good enough to separate flame-coloured images from the rest and to drive
//! the whole pipeline end to end on a machine without a GPU stack.

use ember_training::metrics::binary_cross_entropy;
use ember_training::{
    Batch, BatchOutcome, ClassLabel, ClassWeights, ImageTensor, Normalization, TrainableModel, TrainingError,
    TrainingResult,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

const FEATURES: usize = 3;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct BaselineCheckpoint {
    model: String,
    weights: [f64; FEATURES],
    bias: f64,
    feature_scale: f64,
    learning_rate: f64,
}

#[derive(Debug, Clone)]
pub struct LogisticBaseline {
    weights: [f64; FEATURES],
    bias: f64,
    /// Brings channel means to roughly unit range for either normalization.
    feature_scale: f64,
    learning_rate: f64,
}

impl LogisticBaseline {
    pub const ID: &'static str = "logistic-baseline";

    #[must_use]
    pub fn new(learning_rate: f64, normalization: Normalization) -> Self {
        let feature_scale = match normalization {
            Normalization::UnitRange => 1.0,
            Normalization::CaffeBgr => 1.0 / 128.0,
        };
        Self { weights: [0.0; FEATURES], bias: 0.0, feature_scale, learning_rate }
    }

    pub fn load(path: &Path) -> TrainingResult<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| TrainingError::Model(format!("failed to read {}: {e}", path.display())))?;
        let ckpt: BaselineCheckpoint = serde_json::from_slice(&bytes)
            .map_err(|e| TrainingError::Model(format!("{} is not a baseline model: {e}", path.display())))?;
        if ckpt.model != Self::ID {
            return Err(TrainingError::Model(format!("{} holds a '{}' model", path.display(), ckpt.model)));
        }
        Ok(Self {
            weights: ckpt.weights,
            bias: ckpt.bias,
            feature_scale: ckpt.feature_scale,
            learning_rate: ckpt.learning_rate,
        })
    }

    fn features(&self, image: &ImageTensor) -> [f64; FEATURES] {
        image.channel_means().map(|m| f64::from(m) * self.feature_scale)
    }

    fn probability(&self, features: &[f64; FEATURES]) -> f64 {
        let z = self.bias + self.weights.iter().zip(features).map(|(w, x)| w * x).sum::<f64>();
        1.0 / (1.0 + (-z).exp())
    }

    fn check_batch(batch: &Batch) -> TrainingResult<()> {
        if batch.images.len() != batch.labels.len() {
            return Err(TrainingError::Model(format!(
                "batch has {} images but {} labels",
                batch.images.len(),
                batch.labels.len()
            )));
        }
        Ok(())
    }
}

impl TrainableModel for LogisticBaseline {
    fn id(&self) -> &'static str {
        Self::ID
    }

    fn file_extension(&self) -> &'static str {
        "json"
    }

    fn train_on_batch(&mut self, batch: &Batch, weights: &ClassWeights) -> TrainingResult<BatchOutcome> {
        Self::check_batch(batch)?;
        if batch.is_empty() {
            return Ok(BatchOutcome { loss: 0.0, predictions: Vec::new() });
        }

        let n = batch.len() as f64;
        let mut grad_w = [0.0; FEATURES];
        let mut grad_b = 0.0;
        let mut loss = 0.0;
        let mut predictions = Vec::with_capacity(batch.len());

        for (image, &label) in batch.images.iter().zip(&batch.labels) {
            let x = self.features(image);
            let p = self.probability(&x);
            let w = weights.for_label(ClassLabel::from_u8(label));
            let err = w * (p - f64::from(label));

            loss += w * binary_cross_entropy(label, p);
            for (g, xi) in grad_w.iter_mut().zip(x) {
                *g += err * xi;
            }
            grad_b += err;
            predictions.push(p);
        }

        for (w, g) in self.weights.iter_mut().zip(grad_w) {
            *w -= self.learning_rate * g / n;
        }
        self.bias -= self.learning_rate * grad_b / n;

        Ok(BatchOutcome { loss: loss / n, predictions })
    }

    fn predict_batch(&self, batch: &Batch) -> TrainingResult<Vec<f64>> {
        Self::check_batch(batch)?;
        Ok(batch.images.iter().map(|img| self.probability(&self.features(img))).collect())
    }

    fn save(&self, path: &Path) -> TrainingResult<()> {
        let ckpt = BaselineCheckpoint {
            model: Self::ID.to_string(),
            weights: self.weights,
            bias: self.bias,
            feature_scale: self.feature_scale,
            learning_rate: self.learning_rate,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(&ckpt)?)?;
        Ok(())
    }
}
