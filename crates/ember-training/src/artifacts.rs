use crate::checkpoint::{UploadedSnapshot, today, upload_name};
use crate::dataset::ImageCountTable;
use crate::error::{TrainingError, TrainingResult};
use crate::job::RunId;
use crate::metrics::History;
use crate::weights::ClassWeights;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use ember_abstraction::{ObjectStore, VmLabelSource};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    EpochSnapshot,
    UploadedCheckpoint,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunArtifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    pub sha256: String,
    /// `container/name` for artifacts that were uploaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
}

/// Written to `runs/<run_id>/run_manifest.json` after every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: RunId,
    pub created_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub model: String,
    pub vm_label: String,
    pub counts: ImageCountTable,
    pub weights: ClassWeights,
    pub train_items: usize,
    pub validation_items: usize,
    pub history: History,
    pub artifacts: Vec<RunArtifact>,
}

impl RunManifest {
    pub fn write(&self, path: &Path) -> TrainingResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn read(path: &Path) -> TrainingResult<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    #[must_use]
    pub fn uploaded(&self) -> Option<&RunArtifact> {
        self.artifacts.iter().find(|a| a.kind == ArtifactKind::UploadedCheckpoint)
    }
}

pub fn sha256_file(path: &Path) -> TrainingResult<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

pub fn make_artifact(kind: ArtifactKind, path: PathBuf) -> TrainingResult<RunArtifact> {
    if !path.exists() {
        return Err(TrainingError::Artifact(format!(
            "artifact path does not exist: {}",
            path.display()
        )));
    }

    let hash = sha256_file(&path)?;
    Ok(RunArtifact { kind, path, sha256: hash, remote: None })
}

pub fn uploaded_artifact(snapshot: &UploadedSnapshot) -> TrainingResult<RunArtifact> {
    let mut artifact = make_artifact(ArtifactKind::UploadedCheckpoint, snapshot.local_path.clone())?;
    artifact.remote = Some(format!("{}/{}", snapshot.container, snapshot.name));
    Ok(artifact)
}

/// Uploads an existing snapshot file as `{date}-GPU-{vm_label}-{file name}`.
///
/// Returns the blob name. Existing blobs are overwritten.
pub async fn upload_snapshot_file(
    store: &dyn ObjectStore,
    vm_labels: &dyn VmLabelSource,
    container: &str,
    path: &Path,
) -> TrainingResult<String> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| TrainingError::Artifact(format!("not a file path: {}", path.display())))?;
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(TrainingError::Artifact(format!("model file not found: {}", path.display())));
        }
        Err(e) => return Err(e.into()),
    };

    let vm_label = vm_labels.vm_label().await;
    let name = upload_name(today(), &vm_label, &file_name);
    let size = bytes.len();
    store.put_bytes(container, &name, Bytes::from(bytes), true).await?;
    info!(container, name = %name, bytes = size, "Uploaded model file");
    Ok(name)
}

/// Fetches `name` from the store into `models_dir/<basename>`.
pub async fn download_snapshot(store: &dyn ObjectStore, name: &str, models_dir: &Path) -> TrainingResult<PathBuf> {
    let file_name = ember_abstraction::key_basename(name);
    if file_name.is_empty() {
        return Err(TrainingError::InvalidSpec(format!("model name has no file part: {name}")));
    }
    let bytes = store.get_bytes(name).await?;
    tokio::fs::create_dir_all(models_dir).await?;
    let target = models_dir.join(file_name);
    tokio::fs::write(&target, &bytes).await?;
    info!(name, path = %target.display(), bytes = bytes.len(), "Downloaded model");
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_abstraction::{MemoryObjectStore, StaticVmLabel};
    use tempfile::TempDir;

    #[test]
    fn test_make_artifact_hashes_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("m.json");
        std::fs::write(&path, b"abc").unwrap();
        let artifact = make_artifact(ArtifactKind::EpochSnapshot, path).unwrap();
        assert_eq!(artifact.sha256, "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
        assert!(make_artifact(ArtifactKind::Other, temp.path().join("missing")).is_err());
    }

    #[tokio::test]
    async fn test_upload_snapshot_file_names_blob() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("model_epoch_1_05.json");
        std::fs::write(&path, b"{}").unwrap();
        let store = MemoryObjectStore::new("data");

        let name = upload_snapshot_file(&store, &StaticVmLabel("NC6".to_string()), "models", &path)
            .await
            .unwrap();
        assert!(name.ends_with("-GPU-NC6-model_epoch_1_05.json"));
        assert!(store.object("models", &name).is_some());
    }

    #[tokio::test]
    async fn test_upload_missing_file_is_artifact_error() {
        let temp = TempDir::new().unwrap();
        let store = MemoryObjectStore::new("data");
        let err = upload_snapshot_file(&store, &StaticVmLabel(String::new()), "models", &temp.path().join("nope.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, TrainingError::Artifact(_)));
        assert_eq!(store.calls().put_bytes, 0);
    }

    #[tokio::test]
    async fn test_download_snapshot_writes_into_models_dir() {
        let temp = TempDir::new().unwrap();
        let store = MemoryObjectStore::new("models");
        store.insert("2024-07-01-GPU-NC6.json", b"{\"w\":[]}".to_vec());

        let path = download_snapshot(&store, "2024-07-01-GPU-NC6.json", &temp.path().join("models"))
            .await
            .unwrap();
        assert_eq!(path, temp.path().join("models/2024-07-01-GPU-NC6.json"));
        assert_eq!(std::fs::read(path).unwrap(), b"{\"w\":[]}");
    }
}
