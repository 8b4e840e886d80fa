use ember_abstraction::StorageError;
use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("invalid pipeline spec: {0}")]
    InvalidSpec(String),

    #[error("class {class} has no items at {location}")]
    EmptyClass { class: String, location: String },

    #[error("{subset} split is empty ({total} items, ratio {ratio})")]
    EmptySplit { subset: &'static str, total: usize, ratio: f64 },

    #[error("batch index {index} out of range (length {length})")]
    BatchOutOfRange { index: usize, length: usize },

    #[error("failed to decode {item}: {reason}")]
    Decode { item: String, reason: String },

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("archive error: {0}")]
    Archive(String),

    #[error("artifact error: {0}")]
    Artifact(String),

    #[error("model error: {0}")]
    Model(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
