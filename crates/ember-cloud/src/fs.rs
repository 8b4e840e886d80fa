//! Filesystem-backed object store.
//!
//! Each container is a directory under `root`; object keys are relative paths
//! with `/` separators. Useful for offline runs and for mirroring a container.

use async_trait::async_trait;
use bytes::Bytes;
use ember_abstraction::{ByteStream, ObjectStore, StorageError};
use futures::TryStreamExt;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncReadExt;
use walkdir::WalkDir;

const CHUNK_SIZE: usize = 256 * 1024;

#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
    container: String,
}

impl FsObjectStore {
    #[must_use]
    pub fn new(root: PathBuf, container: impl Into<String>) -> Self {
        Self { root, container: container.into() }
    }

    #[must_use]
    pub fn container_dir(&self, container: &str) -> PathBuf {
        self.root.join(container)
    }

    fn object_path(&self, container: &str, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key);
        if key.is_empty()
            || relative.components().any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidConfig(format!("invalid object key: {key:?}")));
        }
        Ok(self.container_dir(container).join(relative))
    }
}

fn relative_key(base: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(base).ok()?;
    let parts: Vec<&str> = rel.components().filter_map(|c| c.as_os_str().to_str()).collect();
    Some(parts.join("/"))
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let base = self.container_dir(&self.container);
        if !base.exists() {
            return Err(StorageError::NotFound(format!("container {}", self.container)));
        }

        let mut keys = Vec::new();
        for entry in WalkDir::new(&base).follow_links(false) {
            let entry = entry.map_err(|e| StorageError::Io(e.to_string()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(key) = relative_key(&base, entry.path()) {
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn get_bytes(&self, key: &str) -> Result<Bytes, StorageError> {
        let path = self.object_path(&self.container, key)?;
        Ok(Bytes::from(tokio::fs::read(&path).await?))
    }

    async fn get_stream(&self, key: &str) -> Result<ByteStream, StorageError> {
        let path = self.object_path(&self.container, key)?;
        let file = tokio::fs::File::open(&path).await?;
        let stream = futures::stream::try_unfold(file, |mut file| async move {
            let mut buf = vec![0u8; CHUNK_SIZE];
            let n = file.read(&mut buf).await?;
            if n == 0 {
                return Ok::<_, std::io::Error>(None);
            }
            buf.truncate(n);
            Ok(Some((Bytes::from(buf), file)))
        });
        Ok(Box::pin(stream.map_err(StorageError::from)))
    }

    async fn put_bytes(
        &self,
        container: &str,
        name: &str,
        bytes: Bytes,
        overwrite: bool,
    ) -> Result<(), StorageError> {
        let path = self.object_path(container, name)?;
        if !overwrite && path.exists() {
            return Err(StorageError::AlreadyExists(format!("{container}/{name}")));
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &bytes).await?;
        Ok(())
    }
}
