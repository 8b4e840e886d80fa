//! Terminal rendering of training progress.

use colored::Colorize;
use ember_training::{ProgressEvent, ProgressSink};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Mutex;

/// Draws one bar over all batches of the run and prints a line per epoch.
///
/// indicatif hides the bar when stderr is not a terminal.
#[derive(Default)]
pub struct BarProgressSink {
    bar: Mutex<Option<ProgressBar>>,
}

impl BarProgressSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_bar(&self, f: impl FnOnce(&ProgressBar)) {
        if let Ok(guard) = self.bar.lock() {
            if let Some(bar) = guard.as_ref() {
                f(bar);
            }
        }
    }
}

impl ProgressSink for BarProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { epochs, batches_per_epoch, .. } => {
                let bar = ProgressBar::new(u64::from(epochs) * batches_per_epoch as u64);
                if let Ok(style) =
                    ProgressStyle::default_bar().template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
                {
                    bar.set_style(style.progress_chars("=> "));
                }
                if let Ok(mut guard) = self.bar.lock() {
                    *guard = Some(bar);
                }
            }
            ProgressEvent::Message { message, .. } => {
                let line = format!("{} {}", "→".cyan(), message);
                let mut printed = false;
                self.with_bar(|bar| {
                    bar.println(&line);
                    printed = true;
                });
                if !printed {
                    eprintln!("{line}");
                }
            }
            ProgressEvent::Batch { epoch, loss, .. } => self.with_bar(|bar| {
                bar.inc(1);
                bar.set_message(format!("epoch {epoch} loss {loss:.4}"));
            }),
            ProgressEvent::Epoch { metrics, .. } => self.with_bar(|bar| {
                bar.println(format!(
                    "  {} {:>3}  loss {:.4}  acc {:.3}  val_loss {:.4}  val_acc {:.3}",
                    "epoch".dimmed(),
                    metrics.epoch,
                    metrics.train.loss,
                    metrics.train.accuracy,
                    metrics.validation.loss,
                    metrics.validation.accuracy,
                ));
            }),
            ProgressEvent::Finished { .. } => {
                if let Ok(mut guard) = self.bar.lock() {
                    if let Some(bar) = guard.take() {
                        bar.finish_and_clear();
                    }
                }
            }
        }
    }
}
