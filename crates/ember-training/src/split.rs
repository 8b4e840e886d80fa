//! Train/validation partitioning.

use crate::error::{TrainingError, TrainingResult};
use crate::inspect::list_files;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Two disjoint, ordered subsets of one input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split<T> {
    pub train: Vec<T>,
    pub validation: Vec<T>,
}

impl<T> Split<T> {
    #[must_use]
    pub fn total(&self) -> usize {
        self.train.len() + self.validation.len()
    }

    fn ensure_non_empty(self, ratio: f64) -> TrainingResult<Self> {
        let total = self.total();
        if self.train.is_empty() {
            return Err(TrainingError::EmptySplit { subset: "train", total, ratio });
        }
        if self.validation.is_empty() {
            return Err(TrainingError::EmptySplit { subset: "validation", total, ratio });
        }
        Ok(self)
    }
}

/// How the two classes are combined under a ratio split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitOrder {
    /// Each class is sliced on its own, then train and validation parts are joined.
    #[default]
    SliceThenConcat,
    /// Classes are joined (and optionally shuffled) before one slice.
    ConcatThenSlice,
}

fn check_fraction(name: &str, value: f64) -> TrainingResult<()> {
    if value.is_finite() && value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(TrainingError::InvalidSpec(format!("{name} must be in (0, 1), got {value}")))
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn floor_share(ratio: f64, len: usize) -> usize {
    ((ratio * len as f64).floor() as usize).min(len)
}

fn cut<T>(mut items: Vec<T>, train_ratio: f64) -> Split<T> {
    let at = floor_share(train_ratio, items.len());
    let validation = items.split_off(at);
    Split { train: items, validation }
}

/// `train = items[..floor(r * n)]`, `validation = items[floor(r * n)..]`. No shuffling.
pub fn ratio_slice<T>(items: Vec<T>, train_ratio: f64) -> TrainingResult<Split<T>> {
    check_fraction("train_ratio", train_ratio)?;
    cut(items, train_ratio).ensure_non_empty(train_ratio)
}

pub fn slice_then_concat<T>(class_a: Vec<T>, class_b: Vec<T>, train_ratio: f64) -> TrainingResult<Split<T>> {
    check_fraction("train_ratio", train_ratio)?;
    let a = cut(class_a, train_ratio);
    let b = cut(class_b, train_ratio);

    let mut train = a.train;
    train.extend(b.train);
    let mut validation = a.validation;
    validation.extend(b.validation);
    Split { train, validation }.ensure_non_empty(train_ratio)
}

pub fn concat_then_slice<T>(
    class_a: Vec<T>,
    class_b: Vec<T>,
    train_ratio: f64,
    shuffle_seed: Option<u64>,
) -> TrainingResult<Split<T>> {
    check_fraction("train_ratio", train_ratio)?;
    let mut items = class_a;
    items.extend(class_b);
    if let Some(seed) = shuffle_seed {
        items.shuffle(&mut StdRng::seed_from_u64(seed));
    }
    cut(items, train_ratio).ensure_non_empty(train_ratio)
}

/// Applies the configured combination order.
pub fn ratio_split<T>(
    class_a: Vec<T>,
    class_b: Vec<T>,
    train_ratio: f64,
    order: SplitOrder,
    shuffle_seed: Option<u64>,
) -> TrainingResult<Split<T>> {
    match order {
        SplitOrder::SliceThenConcat => slice_then_concat(class_a, class_b, train_ratio),
        SplitOrder::ConcatThenSlice => concat_then_slice(class_a, class_b, train_ratio, shuffle_seed),
    }
}

/// Seeded permutation, then the last `floor(fraction * n)` items become validation.
///
/// The result depends only on the input order and `seed`.
pub fn seeded_shuffle_split<T>(
    mut items: Vec<T>,
    validation_fraction: f64,
    seed: u64,
) -> TrainingResult<Split<T>> {
    check_fraction("validation_fraction", validation_fraction)?;
    items.shuffle(&mut StdRng::seed_from_u64(seed));
    let at = items.len() - floor_share(validation_fraction, items.len());
    let validation = items.split_off(at);
    Split { train: items, validation }.ensure_non_empty(1.0 - validation_fraction)
}

/// Treats both class directories as one dataset and splits it with `seed`.
///
/// Files are sorted before shuffling so the partition does not depend on
/// directory iteration order.
pub fn seeded_directory_split(
    class_a_dir: &Path,
    class_b_dir: &Path,
    validation_fraction: f64,
    seed: u64,
) -> TrainingResult<Split<PathBuf>> {
    let mut items = list_files(class_a_dir)?;
    items.extend(list_files(class_b_dir)?);
    items.sort();
    seeded_shuffle_split(items, validation_fraction, seed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use tempfile::TempDir;

    #[test]
    fn test_ratio_slice_ten_items() {
        let items: Vec<u32> = (0..10).collect();
        let split = ratio_slice(items.clone(), 0.8).unwrap();
        assert_eq!(split.train.len(), 8);
        assert_eq!(split.validation.len(), 2);

        let mut union = split.train.clone();
        union.extend(split.validation.clone());
        assert_eq!(union, items);
    }

    #[test]
    fn test_ratio_slice_rejects_empty_subsets_and_bad_ratios() {
        assert!(matches!(
            ratio_slice(vec![1, 2], 0.4),
            Err(TrainingError::EmptySplit { subset: "train", .. })
        ));
        assert!(matches!(
            seeded_shuffle_split(vec![1, 2, 3], 0.2, 481),
            Err(TrainingError::EmptySplit { subset: "validation", .. })
        ));
        assert!(matches!(ratio_slice(vec![1, 2, 3], 1.0), Err(TrainingError::InvalidSpec(_))));
        assert!(matches!(ratio_slice(vec![1, 2, 3], f64::NAN), Err(TrainingError::InvalidSpec(_))));
    }

    #[test]
    fn test_slice_then_concat_keeps_class_order() {
        let a: Vec<&str> = vec!["a0", "a1", "a2", "a3", "a4"];
        let b: Vec<&str> = vec!["b0", "b1", "b2", "b3", "b4"];
        let split = slice_then_concat(a, b, 0.8).unwrap();
        assert_eq!(split.train, vec!["a0", "a1", "a2", "a3", "b0", "b1", "b2", "b3"]);
        assert_eq!(split.validation, vec!["a4", "b4"]);
    }

    #[test]
    fn test_concat_then_slice_without_shuffle_takes_tail_of_class_b() {
        let split = concat_then_slice(vec![1, 2, 3], vec![4, 5], 0.6, None).unwrap();
        assert_eq!(split.train, vec![1, 2, 3]);
        assert_eq!(split.validation, vec![4, 5]);
    }

    #[test]
    fn test_seeded_shuffle_is_deterministic_and_disjoint() {
        let items: Vec<u32> = (0..50).collect();
        let first = seeded_shuffle_split(items.clone(), 0.2, 481).unwrap();
        let second = seeded_shuffle_split(items.clone(), 0.2, 481).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.validation.len(), 10);

        let train: HashSet<_> = first.train.iter().collect();
        let validation: HashSet<_> = first.validation.iter().collect();
        assert!(train.is_disjoint(&validation));
        assert_eq!(train.len() + validation.len(), items.len());

        let other = seeded_shuffle_split(items, 0.2, 7).unwrap();
        assert_ne!(first, other);
    }

    #[test]
    fn test_seeded_directory_split_covers_both_classes() {
        let temp = TempDir::new().unwrap();
        let (fire, nofire) = (temp.path().join("fire"), temp.path().join("nofire"));
        std::fs::create_dir_all(&fire).unwrap();
        std::fs::create_dir_all(&nofire).unwrap();
        for i in 0..6 {
            std::fs::write(fire.join(format!("{i}.jpg")), b"x").unwrap();
            std::fs::write(nofire.join(format!("{i}.jpg")), b"x").unwrap();
        }

        let split = seeded_directory_split(&fire, &nofire, 0.25, 481).unwrap();
        assert_eq!(split.total(), 12);
        assert_eq!(split.validation.len(), 3);
        assert_eq!(split, seeded_directory_split(&fire, &nofire, 0.25, 481).unwrap());
    }
}
