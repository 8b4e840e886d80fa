//! Remote dataset listing without localizing objects.

use crate::dataset::ImageCountTable;
use crate::error::TrainingResult;
use ember_abstraction::{ObjectStore, key_basename};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct RemoteCatalog {
    store: Arc<dyn ObjectStore>,
}

impl RemoteCatalog {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Keys under `prefix` in the store's listing order.
    ///
    /// "Directory" placeholders (keys ending in `/`) are left out.
    pub async fn list_remote_items(&self, prefix: &str) -> TrainingResult<Vec<String>> {
        let keys: Vec<String> = self
            .store
            .list(prefix)
            .await?
            .into_iter()
            .filter(|k| !key_basename(k).is_empty())
            .collect();
        debug!(prefix, count = keys.len(), "Listed remote items");
        Ok(keys)
    }

    /// Lists `prefix` and records the count, keyed by the prefix.
    pub async fn scan(&self, prefix: &str, counts: &mut ImageCountTable) -> TrainingResult<Vec<String>> {
        let keys = self.list_remote_items(prefix).await?;
        counts.record(prefix, keys.len());
        Ok(keys)
    }

    /// Downloads every object under `prefix` to `target_dir/<basename>`.
    ///
    /// Objects are fetched one after another. A later key whose basename was
    /// already written replaces that file, so the recorded count and the
    /// returned paths cover distinct files on disk only.
    pub async fn materialize_remote_items(
        &self,
        prefix: &str,
        target_dir: &Path,
        counts: &mut ImageCountTable,
    ) -> TrainingResult<Vec<PathBuf>> {
        tokio::fs::create_dir_all(target_dir).await?;
        let keys = self.list_remote_items(prefix).await?;

        let mut paths = Vec::with_capacity(keys.len());
        let mut written = HashSet::with_capacity(keys.len());
        for key in &keys {
            let bytes = self.store.get_bytes(key).await?;
            let path = target_dir.join(key_basename(key));
            tokio::fs::write(&path, &bytes).await?;
            if written.insert(path.clone()) {
                paths.push(path);
            } else {
                warn!(key = %key, path = %path.display(), "Basename collision, earlier file replaced");
            }
        }

        counts.record(prefix, paths.len());
        info!(
            prefix,
            keys = keys.len(),
            count = paths.len(),
            dir = %target_dir.display(),
            "Materialized remote items"
        );
        Ok(paths)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_abstraction::MemoryObjectStore;
    use tempfile::TempDir;

    fn store() -> Arc<MemoryObjectStore> {
        let store = MemoryObjectStore::new("data");
        store.insert("training/fire/", Vec::<u8>::new());
        store.insert("training/fire/a.jpg", b"a".to_vec());
        store.insert("training/fire/b.jpg", b"b".to_vec());
        store.insert("training/nofire/c.jpg", b"c".to_vec());
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_list_skips_directory_placeholders() {
        let catalog = RemoteCatalog::new(store());
        let keys = catalog.list_remote_items("training/fire/").await.unwrap();
        assert_eq!(keys, vec!["training/fire/a.jpg", "training/fire/b.jpg"]);
    }

    #[tokio::test]
    async fn test_scan_records_count_without_fetching() {
        let store = store();
        let catalog = RemoteCatalog::new(store.clone());
        let mut counts = ImageCountTable::new();
        catalog.scan("training/nofire/", &mut counts).await.unwrap();
        assert_eq!(counts.get("training/nofire/"), 1);
        assert_eq!(store.calls().get_bytes, 0);
    }

    #[tokio::test]
    async fn test_materialize_writes_basenames_and_records_count() {
        let temp = TempDir::new().unwrap();
        let catalog = RemoteCatalog::new(store());
        let mut counts = ImageCountTable::new();

        let paths = catalog
            .materialize_remote_items("training/fire/", &temp.path().join("fire"), &mut counts)
            .await
            .unwrap();
        assert_eq!(paths.len(), 2);
        assert_eq!(std::fs::read(temp.path().join("fire/a.jpg")).unwrap(), b"a");
        assert_eq!(counts.get("training/fire/"), 2);
    }

    #[tokio::test]
    async fn test_materialize_counts_distinct_files_on_basename_collision() {
        let temp = TempDir::new().unwrap();
        let store = MemoryObjectStore::new("data");
        store.insert("training/fire/x/1.png", b"first".to_vec());
        store.insert("training/fire/y/1.png", b"second".to_vec());
        store.insert("training/fire/y/2.png", b"other".to_vec());
        let catalog = RemoteCatalog::new(Arc::new(store));
        let mut counts = ImageCountTable::new();

        let dir = temp.path().join("fire");
        let paths = catalog.materialize_remote_items("training/fire/", &dir, &mut counts).await.unwrap();
        assert_eq!(paths, vec![dir.join("1.png"), dir.join("2.png")]);
        assert_eq!(counts.get("training/fire/"), 2);
        assert_eq!(crate::inspect::count_files(&dir).unwrap(), 2);
        assert_eq!(std::fs::read(dir.join("1.png")).unwrap(), b"second");
    }
}
