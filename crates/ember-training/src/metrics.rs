use serde::{Deserialize, Serialize};

/// Clamp applied to probabilities before taking logs.
const EPSILON: f64 = 1e-7;

/// Threshold above which a probability counts as a positive prediction.
pub const DECISION_THRESHOLD: f64 = 0.5;

/// Binary cross-entropy of one prediction.
#[must_use]
pub fn binary_cross_entropy(label: u8, probability: f64) -> f64 {
    let p = probability.clamp(EPSILON, 1.0 - EPSILON);
    if label == 1 { -p.ln() } else { -(1.0 - p).ln() }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Evaluation {
    pub loss: f64,
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub samples: usize,
}

/// Running loss and confusion counts.
#[derive(Debug, Clone, Default)]
pub struct MetricAccumulator {
    loss_sum: f64,
    samples: usize,
    true_pos: usize,
    false_pos: usize,
    true_neg: usize,
    false_neg: usize,
}

impl MetricAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a batch, scoring loss as unweighted cross-entropy.
    pub fn update(&mut self, labels: &[u8], probabilities: &[f64]) {
        let loss: f64 = labels
            .iter()
            .zip(probabilities)
            .map(|(&y, &p)| binary_cross_entropy(y, p))
            .sum();
        self.count(labels, probabilities);
        self.loss_sum += loss;
    }

    /// Adds a batch whose mean loss was already computed by the model.
    pub fn update_with_loss(&mut self, labels: &[u8], probabilities: &[f64], mean_loss: f64) {
        self.count(labels, probabilities);
        self.loss_sum += mean_loss * labels.len() as f64;
    }

    fn count(&mut self, labels: &[u8], probabilities: &[f64]) {
        for (&y, &p) in labels.iter().zip(probabilities) {
            let predicted = p >= DECISION_THRESHOLD;
            match (y == 1, predicted) {
                (true, true) => self.true_pos += 1,
                (false, true) => self.false_pos += 1,
                (false, false) => self.true_neg += 1,
                (true, false) => self.false_neg += 1,
            }
            self.samples += 1;
        }
    }

    #[must_use]
    pub fn finish(&self) -> Evaluation {
        let ratio = |num: usize, den: usize| if den == 0 { 0.0 } else { num as f64 / den as f64 };
        let loss = if self.samples == 0 { 0.0 } else { self.loss_sum / self.samples as f64 };
        Evaluation {
            loss,
            accuracy: ratio(self.true_pos + self.true_neg, self.samples),
            precision: ratio(self.true_pos, self.true_pos + self.false_pos),
            recall: ratio(self.true_pos, self.true_pos + self.false_neg),
            samples: self.samples,
        }
    }
}

/// Training and validation metrics of one epoch (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: u32,
    pub train: Evaluation,
    pub validation: Evaluation,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct History {
    pub epochs: Vec<EpochMetrics>,
    /// Set when a callback ended training before the last epoch.
    #[serde(default)]
    pub stopped_early: bool,
}

impl History {
    #[must_use]
    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }

    #[must_use]
    pub fn completed_epochs(&self) -> u32 {
        self.last().map_or(0, |m| m.epoch)
    }
}
