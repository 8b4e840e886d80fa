//! In-memory object store.
//!
//! Keeps every container in a `BTreeMap` and counts each call, which makes it
//! suitable for exercising the pipeline without a network.

use crate::{ByteStream, ObjectStore, StorageError};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Snapshot of how many times each operation was invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub list: usize,
    pub get_bytes: usize,
    pub get_stream: usize,
    pub put_bytes: usize,
}

impl CallCounts {
    #[must_use]
    pub fn total(&self) -> usize {
        self.list + self.get_bytes + self.get_stream + self.put_bytes
    }
}

#[derive(Debug, Default)]
struct Counters {
    list: AtomicUsize,
    get_bytes: AtomicUsize,
    get_stream: AtomicUsize,
    put_bytes: AtomicUsize,
}

#[derive(Debug)]
pub struct MemoryObjectStore {
    default_container: String,
    containers: Mutex<BTreeMap<String, BTreeMap<String, Bytes>>>,
    chunk_size: usize,
    counters: Counters,
}

impl MemoryObjectStore {
    /// Creates an empty store whose reads address `default_container`.
    #[must_use]
    pub fn new(default_container: impl Into<String>) -> Self {
        Self {
            default_container: default_container.into(),
            containers: Mutex::new(BTreeMap::new()),
            chunk_size: DEFAULT_CHUNK_SIZE,
            counters: Counters::default(),
        }
    }

    /// Sets the chunk size used by `get_stream`.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Seeds an object into the default container without counting a call.
    pub fn insert(&self, key: impl Into<String>, bytes: impl Into<Bytes>) {
        let container = self.default_container.clone();
        self.insert_into(&container, key, bytes);
    }

    /// Seeds an object into `container` without counting a call.
    pub fn insert_into(&self, container: &str, key: impl Into<String>, bytes: impl Into<Bytes>) {
        let mut guard = self.containers.lock().unwrap_or_else(PoisonError::into_inner);
        guard.entry(container.to_string()).or_default().insert(key.into(), bytes.into());
    }

    /// Reads an object from any container without counting a call.
    #[must_use]
    pub fn object(&self, container: &str, key: &str) -> Option<Bytes> {
        let guard = self.containers.lock().unwrap_or_else(PoisonError::into_inner);
        guard.get(container).and_then(|c| c.get(key)).cloned()
    }

    #[must_use]
    pub fn calls(&self) -> CallCounts {
        CallCounts {
            list: self.counters.list.load(Ordering::SeqCst),
            get_bytes: self.counters.get_bytes.load(Ordering::SeqCst),
            get_stream: self.counters.get_stream.load(Ordering::SeqCst),
            put_bytes: self.counters.put_bytes.load(Ordering::SeqCst),
        }
    }

    fn read(&self, key: &str) -> Result<Bytes, StorageError> {
        let guard = self.containers.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .get(&self.default_container)
            .and_then(|c| c.get(key))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("{}/{}", self.default_container, key)))
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.counters.list.fetch_add(1, Ordering::SeqCst);
        let guard = self.containers.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(guard
            .get(&self.default_container)
            .map(|c| c.keys().filter(|k| k.starts_with(prefix)).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_bytes(&self, key: &str) -> Result<Bytes, StorageError> {
        self.counters.get_bytes.fetch_add(1, Ordering::SeqCst);
        self.read(key)
    }

    async fn get_stream(&self, key: &str) -> Result<ByteStream, StorageError> {
        self.counters.get_stream.fetch_add(1, Ordering::SeqCst);
        let bytes = self.read(key)?;
        let chunks: Vec<Result<Bytes, StorageError>> = bytes
            .chunks(self.chunk_size)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn put_bytes(
        &self,
        container: &str,
        name: &str,
        bytes: Bytes,
        overwrite: bool,
    ) -> Result<(), StorageError> {
        self.counters.put_bytes.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.containers.lock().unwrap_or_else(PoisonError::into_inner);
        let objects = guard.entry(container.to_string()).or_default();
        if !overwrite && objects.contains_key(name) {
            return Err(StorageError::AlreadyExists(format!("{container}/{name}")));
        }
        objects.insert(name.to_string(), bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_list_filters_by_prefix_and_counts_calls() {
        let store = MemoryObjectStore::new("data");
        store.insert("fire/a.jpg", vec![1u8]);
        store.insert("fire/b.jpg", vec![2u8]);
        store.insert("nofire/c.jpg", vec![3u8]);

        let keys = store.list("fire/").await.unwrap();
        assert_eq!(keys, vec!["fire/a.jpg".to_string(), "fire/b.jpg".to_string()]);
        assert_eq!(store.calls().list, 1);
        assert_eq!(store.calls().total(), 1);
    }

    #[tokio::test]
    async fn test_stream_yields_chunks_in_order() {
        let store = MemoryObjectStore::new("data").with_chunk_size(3);
        store.insert("archive.zip", (0u8..10).collect::<Vec<_>>());

        let mut stream = store.get_stream("archive.zip").await.unwrap();
        let mut sizes = Vec::new();
        let mut all = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.unwrap();
            sizes.push(chunk.len());
            all.extend_from_slice(&chunk);
        }
        assert_eq!(sizes, vec![3, 3, 3, 1]);
        assert_eq!(all, (0u8..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let store = MemoryObjectStore::new("data");
        let err = store.get_bytes("missing").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_put_respects_overwrite_flag() {
        let store = MemoryObjectStore::new("data");
        store.put_bytes("models", "m.json", Bytes::from_static(b"v1"), false).await.unwrap();

        let err = store
            .put_bytes("models", "m.json", Bytes::from_static(b"v2"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));

        store.put_bytes("models", "m.json", Bytes::from_static(b"v2"), true).await.unwrap();
        assert_eq!(store.object("models", "m.json").unwrap(), Bytes::from_static(b"v2"));
    }
}
