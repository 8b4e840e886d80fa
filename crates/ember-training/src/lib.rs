//! Ember Training
//!
//! The dataset side of fire / no-fire classifier training:
//! - Keeping a local dataset cache in sync with a remote archive
//! - Listing and streaming remote objects per class prefix
//! - Class weights, train/validation splits and fixed-size batches
//! - The epoch loop, checkpoint upload and run manifests

pub mod archive;
pub mod artifacts;
pub mod batch;
pub mod catalog;
pub mod checkpoint;
pub mod dataset;
pub mod error;
pub mod fit;
pub mod inspect;
pub mod job;
pub mod layout;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod preprocess;
pub mod progress;
pub mod split;
pub mod sync;
pub mod weights;

pub use artifacts::{
    ArtifactKind, RunArtifact, RunManifest, download_snapshot, make_artifact, upload_snapshot_file,
};
pub use batch::{Batch, BatchOptions, BatchProvider, LocalImageBatches, RemoteImageBatches};
pub use catalog::RemoteCatalog;
pub use checkpoint::{
    CallbackAction, CheckpointSink, EarlyStopping, EpochCallback, LocalSnapshotCallback, UploadedSnapshot,
    snapshot_name, upload_name,
};
pub use dataset::{ClassLabel, DatasetLocation, ImageCountTable, LabelRule};
pub use error::{TrainingError, TrainingResult};
pub use fit::{FitPlan, evaluate, fit};
pub use inspect::{count_files, list_files};
pub use job::{CheckpointSpec, DataStrategy, HyperParams, PipelineSpec, RunId, SplitStrategy};
pub use layout::TrainingLayout;
pub use metrics::{EpochMetrics, Evaluation, History, MetricAccumulator};
pub use model::{BatchOutcome, TrainableModel};
pub use pipeline::{PipelineContext, PreparedData, PreparedSplit, RunReport, TrainingPipeline, evaluate_directories};
pub use preprocess::{Augmentation, ImageSpec, ImageTensor, Normalization, decode_augmented, decode_image};
pub use progress::{NullProgressSink, ProgressEvent, ProgressSink, TracingProgressSink};
pub use split::{Split, SplitOrder};
pub use sync::ArchiveSynchronizer;
pub use weights::{ClassWeights, compute_weights};
