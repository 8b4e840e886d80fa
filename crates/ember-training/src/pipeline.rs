//! Composes synchronization, splitting, batching and the epoch loop into one run.

use crate::artifacts::{ArtifactKind, RunArtifact, RunManifest, make_artifact, uploaded_artifact};
use crate::batch::{BatchOptions, BatchProvider, LocalImageBatches, RemoteImageBatches};
use crate::catalog::RemoteCatalog;
use crate::checkpoint::{CheckpointSink, EarlyStopping, EpochCallback, LocalSnapshotCallback};
use crate::dataset::{DatasetLocation, ImageCountTable, LabelRule};
use crate::error::{TrainingError, TrainingResult};
use crate::fit::{FitPlan, evaluate, fit};
use crate::inspect::list_files;
use crate::job::{DataStrategy, PipelineSpec, RunId, SplitStrategy};
use crate::layout::TrainingLayout;
use crate::metrics::Evaluation;
use crate::model::TrainableModel;
use crate::preprocess::ImageSpec;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::split::{Split, ratio_split, seeded_directory_split, seeded_shuffle_split};
use crate::sync::ArchiveSynchronizer;
use crate::weights::{ClassWeights, compute_weights};
use chrono::Utc;
use ember_abstraction::{ObjectStore, VmLabelSource};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Everything a run talks to, passed explicitly.
#[derive(Clone)]
pub struct PipelineContext {
    /// Dataset container.
    pub store: Arc<dyn ObjectStore>,
    pub vm_labels: Arc<dyn VmLabelSource>,
    pub progress: Arc<dyn ProgressSink>,
    pub layout: TrainingLayout,
}

/// The train/validation items a run will iterate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreparedSplit {
    Local(Split<PathBuf>),
    Remote(Split<String>),
}

impl PreparedSplit {
    #[must_use]
    pub fn sizes(&self) -> (usize, usize) {
        match self {
            Self::Local(s) => (s.train.len(), s.validation.len()),
            Self::Remote(s) => (s.train.len(), s.validation.len()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PreparedData {
    pub counts: ImageCountTable,
    pub weights: ClassWeights,
    pub split: PreparedSplit,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub manifest: RunManifest,
    pub manifest_path: PathBuf,
}

pub struct TrainingPipeline {
    context: PipelineContext,
    spec: PipelineSpec,
}

impl TrainingPipeline {
    #[must_use]
    pub fn new(context: PipelineContext, spec: PipelineSpec) -> Self {
        Self { context, spec }
    }

    #[must_use]
    pub fn spec(&self) -> &PipelineSpec {
        &self.spec
    }

    /// Localizes or lists the dataset, computes weights and plans the split.
    pub async fn prepare(&self) -> TrainingResult<PreparedData> {
        self.spec.validate()?;
        let progress = |message: String| {
            self.context.progress.on_event(ProgressEvent::Message { run_id: self.spec.run_id.clone(), message });
        };

        let mut counts = ImageCountTable::new();
        let items = match &self.spec.data {
            DataStrategy::Archive { archive_key, cache_root, class_a_dir, class_b_dir } => {
                progress(format!("Checking local dataset in {}", cache_root.display()));
                counts = ArchiveSynchronizer::new(self.context.store.clone())
                    .ensure_local_dataset(cache_root, class_a_dir, class_b_dir, archive_key)
                    .await?;
                Items::Dirs(class_a_dir.clone(), class_b_dir.clone())
            }
            DataStrategy::RemoteMaterialize { class_a_prefix, class_b_prefix, target_root } => {
                let catalog = RemoteCatalog::new(self.context.store.clone());
                let (dir_a, dir_b) = materialize_dirs(target_root, &self.spec.labels);
                for (prefix, dir) in [(class_a_prefix, &dir_a), (class_b_prefix, &dir_b)] {
                    progress(format!("Downloading {prefix}"));
                    catalog.materialize_remote_items(prefix, dir, &mut counts).await?;
                }
                Items::Dirs(dir_a, dir_b)
            }
            DataStrategy::RemoteStream { class_a_prefix, class_b_prefix } => {
                progress(format!("Listing {class_a_prefix} and {class_b_prefix}"));
                let catalog = RemoteCatalog::new(self.context.store.clone());
                let a = catalog.scan(class_a_prefix, &mut counts).await?;
                let b = catalog.scan(class_b_prefix, &mut counts).await?;
                Items::Keys(a, b)
            }
        };

        let location = self.spec.data.location();
        let (count_a, count_b) = counts.pair(&location);
        ensure_class_present(&location, count_a, count_b)?;
        let weights = compute_weights(count_a, count_b)?;
        info!(counts = %counts, weight_a = weights.weight_a, weight_b = weights.weight_b, "Class weights computed");

        let split = self.plan_split(items)?;
        let (train, validation) = split.sizes();
        info!(train, validation, "Split planned");
        Ok(PreparedData { counts, weights, split })
    }

    fn plan_split(&self, items: Items) -> TrainingResult<PreparedSplit> {
        let seed = self.spec.hyperparams.seed;
        let split = match (items, self.spec.split) {
            (Items::Dirs(a, b), SplitStrategy::SeededShuffle { validation_fraction, seed }) => {
                PreparedSplit::Local(seeded_directory_split(&a, &b, validation_fraction, seed)?)
            }
            (Items::Dirs(a, b), SplitStrategy::RatioSlice { train_ratio, order }) => {
                PreparedSplit::Local(ratio_split(list_files(&a)?, list_files(&b)?, train_ratio, order, Some(seed))?)
            }
            (Items::Keys(a, b), SplitStrategy::SeededShuffle { validation_fraction, seed }) => {
                let mut keys = a;
                keys.extend(b);
                keys.sort();
                PreparedSplit::Remote(seeded_shuffle_split(keys, validation_fraction, seed)?)
            }
            (Items::Keys(a, b), SplitStrategy::RatioSlice { train_ratio, order }) => {
                PreparedSplit::Remote(ratio_split(a, b, train_ratio, order, Some(seed))?)
            }
        };
        Ok(split)
    }

    /// Options for the training (`train == true`) or validation provider.
    ///
    /// Only the training side shuffles and augments.
    fn batch_options(&self, train: bool) -> BatchOptions {
        BatchOptions {
            batch_size: self.spec.hyperparams.batch_size,
            shuffle: train,
            seed: Some(self.spec.hyperparams.seed),
            image: self.spec.image,
            labels: self.spec.labels.clone(),
            augmentation: self.spec.augmentation.filter(|_| train),
        }
    }

    /// Training and validation batch providers over a prepared split.
    pub fn providers(&self, split: PreparedSplit) -> TrainingResult<(Box<dyn BatchProvider>, Box<dyn BatchProvider>)> {
        let store = &self.context.store;
        Ok(match split {
            PreparedSplit::Local(split) => (
                Box::new(LocalImageBatches::new(split.train, self.batch_options(true))?),
                Box::new(LocalImageBatches::new(split.validation, self.batch_options(false))?),
            ),
            PreparedSplit::Remote(split) => (
                Box::new(RemoteImageBatches::new(store.clone(), split.train, self.batch_options(true))?),
                Box::new(RemoteImageBatches::new(store.clone(), split.validation, self.batch_options(false))?),
            ),
        })
    }

    /// Runs the whole pipeline and writes the run manifest.
    pub async fn run(&self, model: &mut dyn TrainableModel) -> TrainingResult<RunReport> {
        let prepared = self.prepare().await?;
        let run_id = &self.spec.run_id;
        let layout = &self.context.layout;
        layout.ensure_run_dirs(run_id)?;

        let (mut train, mut validation) = self.providers(prepared.split.clone())?;

        let mut snapshots = LocalSnapshotCallback::new(layout.clone(), run_label(run_id));
        let mut checkpoint = CheckpointSink::new(
            self.context.store.clone(),
            self.context.vm_labels.clone(),
            layout.snapshots_dir(),
            self.spec.checkpoint.clone(),
        );
        let mut stopper = self.spec.hyperparams.early_stopping_patience.map(|p| EarlyStopping::new(p, 0.0));

        let plan = FitPlan {
            run_id,
            epochs: self.spec.hyperparams.epochs,
            weights: prepared.weights,
            progress: self.context.progress.as_ref(),
        };
        let history = {
            let mut callbacks: Vec<&mut dyn EpochCallback> = Vec::with_capacity(3);
            callbacks.push(&mut snapshots);
            callbacks.push(&mut checkpoint);
            if let Some(stopper) = stopper.as_mut() {
                callbacks.push(stopper);
            }
            fit(model, train.as_mut(), validation.as_mut(), &plan, &mut callbacks).await?
        };

        let mut artifacts: Vec<RunArtifact> = snapshots
            .written()
            .iter()
            .map(|p| make_artifact(ArtifactKind::EpochSnapshot, p.clone()))
            .collect::<TrainingResult<_>>()?;
        if let Some(uploaded) = checkpoint.uploaded() {
            artifacts.push(uploaded_artifact(uploaded)?);
        }

        let (train_items, validation_items) = prepared.split.sizes();
        let manifest = RunManifest {
            run_id: run_id.clone(),
            created_at: self.spec.created_at,
            finished_at: Utc::now(),
            model: model.id().to_string(),
            vm_label: self.context.vm_labels.vm_label().await,
            counts: prepared.counts,
            weights: prepared.weights,
            train_items,
            validation_items,
            history,
            artifacts,
        };
        let manifest_path = layout.run_manifest_path(run_id);
        manifest.write(&manifest_path)?;
        info!(path = %manifest_path.display(), "Run manifest written");

        Ok(RunReport { manifest, manifest_path })
    }
}

/// Per-class items before splitting.
enum Items {
    Dirs(PathBuf, PathBuf),
    Keys(Vec<String>, Vec<String>),
}

fn ensure_class_present(location: &DatasetLocation, count_a: usize, count_b: usize) -> TrainingResult<()> {
    let (key_a, key_b) = location.keys();
    for (count, key, class) in [(count_a, key_a, "a"), (count_b, key_b, "b")] {
        if count == 0 {
            return Err(TrainingError::EmptyClass { class: class.to_string(), location: key });
        }
    }
    Ok(())
}

/// Local directories for materialized prefixes.
///
/// Named after the label markers rather than the prefixes, so the label of a
/// materialized file follows the class it was downloaded for whatever the
/// remote layout looks like (`fire/images/` and `nofire/images/` share a tail).
fn materialize_dirs(target_root: &Path, labels: &LabelRule) -> (PathBuf, PathBuf) {
    let (positive, negative) = labels.class_dir_names();
    (target_root.join(positive), target_root.join(negative))
}

/// Short label used in per-epoch snapshot names.
fn run_label(run_id: &RunId) -> String {
    run_id.0.chars().take(8).collect()
}

/// Scores a saved model on two local class directories.
///
/// Only whole batches are scored: `floor(samples / batch_size)` steps.
pub async fn evaluate_directories(
    model: &dyn TrainableModel,
    class_a_dir: &Path,
    class_b_dir: &Path,
    batch_size: usize,
    image: ImageSpec,
    labels: LabelRule,
) -> TrainingResult<Evaluation> {
    let mut items = list_files(class_a_dir)?;
    items.extend(list_files(class_b_dir)?);
    if items.is_empty() {
        return Err(TrainingError::Dataset(format!(
            "no test images in {} or {}",
            class_a_dir.display(),
            class_b_dir.display()
        )));
    }
    let samples = items.len();
    let options = BatchOptions { batch_size, shuffle: false, seed: None, image, labels, augmentation: None };
    let batches = LocalImageBatches::new(items, options)?;
    info!(samples, steps = batches.len(), "Evaluating");
    evaluate(model, &batches).await
}
