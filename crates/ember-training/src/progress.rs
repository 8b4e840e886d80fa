use crate::job::RunId;
use crate::metrics::EpochMetrics;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started { run_id: RunId, epochs: u32, batches_per_epoch: usize },
    Message { run_id: RunId, message: String },
    Batch { run_id: RunId, epoch: u32, batch: usize, total: usize, loss: f64 },
    Epoch { run_id: RunId, metrics: EpochMetrics },
    Finished { run_id: RunId },
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

/// Forwards progress to `tracing`. Per-batch events are logged at debug.
#[derive(Debug, Default)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { run_id, epochs, batches_per_epoch } => {
                info!(run_id = %run_id, epochs, batches_per_epoch, "Training started");
            }
            ProgressEvent::Message { run_id, message } => info!(run_id = %run_id, "{message}"),
            ProgressEvent::Batch { run_id, epoch, batch, total, loss } => {
                debug!(run_id = %run_id, epoch, batch, total, loss, "Batch done");
            }
            ProgressEvent::Epoch { run_id, metrics } => info!(
                run_id = %run_id,
                epoch = metrics.epoch,
                loss = metrics.train.loss,
                accuracy = metrics.train.accuracy,
                val_loss = metrics.validation.loss,
                val_accuracy = metrics.validation.accuracy,
                "Epoch finished"
            ),
            ProgressEvent::Finished { run_id } => info!(run_id = %run_id, "Training finished"),
        }
    }
}

/// Discards every event.
#[derive(Debug, Default)]
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn on_event(&self, _event: ProgressEvent) {}
}
