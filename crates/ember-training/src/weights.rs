use crate::dataset::ClassLabel;
use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};

/// Per-class loss weights. Class "a" is the positive class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClassWeights {
    pub weight_a: f64,
    pub weight_b: f64,
}

impl ClassWeights {
    /// Uniform weights, used when balancing is not wanted (e.g. evaluation).
    #[must_use]
    pub fn uniform() -> Self {
        Self { weight_a: 1.0, weight_b: 1.0 }
    }

    #[must_use]
    pub fn for_label(&self, label: ClassLabel) -> f64 {
        match label {
            ClassLabel::Positive => self.weight_a,
            ClassLabel::Negative => self.weight_b,
        }
    }
}

/// `weight_c = total / (2 * count_c)`, no smoothing.
pub fn compute_weights(count_a: usize, count_b: usize) -> TrainingResult<ClassWeights> {
    if count_a == 0 || count_b == 0 {
        let class = if count_a == 0 { "a" } else { "b" };
        return Err(TrainingError::EmptyClass {
            class: class.to_string(),
            location: format!("counts (a={count_a}, b={count_b})"),
        });
    }
    let total = (count_a + count_b) as f64;
    Ok(ClassWeights {
        weight_a: total / (2.0 * count_a as f64),
        weight_b: total / (2.0 * count_b as f64),
    })
}
