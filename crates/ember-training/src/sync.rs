//! Reconciles the local dataset cache against a remote archive.

use crate::archive::extract_archive;
use crate::dataset::ImageCountTable;
use crate::error::{TrainingError, TrainingResult};
use crate::inspect::count_files;
use ember_abstraction::{ObjectStore, key_basename};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

pub struct ArchiveSynchronizer {
    store: Arc<dyn ObjectStore>,
}

impl ArchiveSynchronizer {
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    /// Makes sure both class directories hold at least one file.
    ///
    /// When either directory is empty the whole archive is downloaded to
    /// `cache_root/<basename>` and extracted over `cache_root`, even if the
    /// other class was already populated. Returns the counts observed last.
    pub async fn ensure_local_dataset(
        &self,
        cache_root: &Path,
        class_a_dir: &Path,
        class_b_dir: &Path,
        archive_key: &str,
    ) -> TrainingResult<ImageCountTable> {
        for dir in [cache_root, class_a_dir, class_b_dir] {
            tokio::fs::create_dir_all(dir).await?;
        }

        let counts = scan(class_a_dir, class_b_dir)?;
        let (a, b) = (
            counts.get(&class_a_dir.display().to_string()),
            counts.get(&class_b_dir.display().to_string()),
        );
        if a > 0 && b > 0 {
            info!(class_a = a, class_b = b, "Dataset already present locally");
            return Ok(counts);
        }

        warn!(class_a = a, class_b = b, key = archive_key, "Local dataset incomplete; downloading archive");
        let archive_path = self.download_archive(cache_root, archive_key).await?;

        let root = cache_root.to_path_buf();
        let written = tokio::task::spawn_blocking(move || extract_archive(&archive_path, &root))
            .await
            .map_err(anyhow::Error::from)??;
        debug!(files = written, "Archive extracted");

        let counts = scan(class_a_dir, class_b_dir)?;
        for dir in [class_a_dir, class_b_dir] {
            if counts.get(&dir.display().to_string()) == 0 {
                return Err(TrainingError::EmptyClass {
                    class: dir_label(dir),
                    location: dir.display().to_string(),
                });
            }
        }
        info!(counts = %counts, "Dataset synchronized");
        Ok(counts)
    }

    async fn download_archive(&self, cache_root: &Path, archive_key: &str) -> TrainingResult<PathBuf> {
        let name = key_basename(archive_key);
        if name.is_empty() {
            return Err(TrainingError::InvalidSpec(format!("archive key has no file name: {archive_key}")));
        }
        let target = cache_root.join(name);

        let mut stream = self.store.get_stream(archive_key).await?;
        let mut file = tokio::fs::File::create(&target).await?;
        let mut total = 0usize;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            total += chunk.len();
        }
        file.flush().await?;

        info!(key = archive_key, bytes = total, path = %target.display(), "Downloaded dataset archive");
        Ok(target)
    }
}

fn scan(class_a_dir: &Path, class_b_dir: &Path) -> TrainingResult<ImageCountTable> {
    let mut counts = ImageCountTable::new();
    for dir in [class_a_dir, class_b_dir] {
        counts.record(dir.display().to_string(), count_files(dir)?);
    }
    Ok(counts)
}

fn dir_label(dir: &Path) -> String {
    dir.file_name()
        .map_or_else(|| dir.display().to_string(), |n| n.to_string_lossy().into_owned())
}
