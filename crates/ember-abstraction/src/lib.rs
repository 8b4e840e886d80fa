//! Collaborator abstraction layer for Ember.
//!
//! This crate defines the traits the data pipeline talks to without knowing
//! which backend sits behind them:
//! - [`ObjectStore`]: key-addressed blob storage (list, fetch, stream, upload)
//! - [`SecretProvider`]: startup-time secret resolution
//! - [`VmLabelSource`]: best-effort instance size lookup

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use thiserror::Error;

#[cfg(any(test, feature = "test-util"))]
pub mod memory;

#[cfg(any(test, feature = "test-util"))]
pub use memory::{CallCounts, MemoryObjectStore};

/// Sentinel returned by [`VmLabelSource`] implementations when the lookup fails.
pub const UNKNOWN_VM_LABEL: &str = "unknown_size";

/// Represents an error raised by an object store backend.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageError {
    /// The requested object or container does not exist.
    #[error("object not found: {0}")]
    NotFound(String),

    /// An upload without overwrite hit an existing object.
    #[error("object already exists: {0}")]
    AlreadyExists(String),

    /// Network or protocol failure talking to the backend.
    #[error("transport error: {0}")]
    Transport(String),

    /// The backend was configured with unusable settings (bad connection string, etc.).
    #[error("invalid storage configuration: {0}")]
    InvalidConfig(String),

    /// Local filesystem failure inside a filesystem-backed store.
    #[error("storage io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Self::NotFound(err.to_string())
        } else {
            Self::Io(err.to_string())
        }
    }
}

/// Represents an error raised while resolving a secret.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecretError {
    /// No secret with this name exists.
    #[error("secret not found: {0}")]
    NotFound(String),

    /// The secret exists but its value is empty.
    #[error("secret is empty: {0}")]
    Empty(String),

    /// The vault or token endpoint could not be reached.
    #[error("secret transport error: {0}")]
    Transport(String),
}

/// A chunked byte stream, used for objects too large to buffer in memory.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// Key-addressed blob storage.
///
/// Reads (`list`, `get_bytes`, `get_stream`) address the store's own container.
/// Writes name their target container explicitly so model artifacts can land
/// in a different container than the dataset.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Lists object keys starting with `prefix`, in backend listing order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Fetches an object's full content.
    async fn get_bytes(&self, key: &str) -> Result<Bytes, StorageError>;

    /// Fetches an object as a stream of chunks.
    async fn get_stream(&self, key: &str) -> Result<ByteStream, StorageError>;

    /// Writes `bytes` to `container/name`.
    ///
    /// With `overwrite == false` an existing object yields [`StorageError::AlreadyExists`].
    async fn put_bytes(
        &self,
        container: &str,
        name: &str,
        bytes: Bytes,
        overwrite: bool,
    ) -> Result<(), StorageError>;
}

/// Resolves named secrets (connection strings, keys) at startup.
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Resolves `name` to a non-empty secret value.
    async fn resolve(&self, name: &str) -> Result<String, SecretError>;
}

/// Best-effort lookup of the label describing the machine the run executes on.
#[async_trait]
pub trait VmLabelSource: Send + Sync {
    /// Returns the VM label, or [`UNKNOWN_VM_LABEL`] if it cannot be determined.
    async fn vm_label(&self) -> String;
}

/// A fixed VM label, typically taken from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticVmLabel(pub String);

#[async_trait]
impl VmLabelSource for StaticVmLabel {
    async fn vm_label(&self) -> String {
        if self.0.trim().is_empty() {
            UNKNOWN_VM_LABEL.to_string()
        } else {
            self.0.clone()
        }
    }
}

/// Returns the last `/`-separated segment of an object key.
#[must_use]
pub fn key_basename(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}
