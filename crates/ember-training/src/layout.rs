use crate::error::TrainingResult;
use crate::job::RunId;
use std::path::{Path, PathBuf};

/// Filesystem layout for everything a run writes outside the dataset cache.
///
/// ```text
/// <root>/saved_models_per_epoch/model_epoch_<run>_<epoch:02>.<ext>
/// <root>/saved_models_per_epoch/<date>-GPU-<vm>[-epoch-<n>].<ext>
/// <root>/runs/<run_id>/run_manifest.json
/// <root>/models/<downloaded model>
/// ```
#[derive(Debug, Clone)]
pub struct TrainingLayout {
    root: PathBuf,
}

impl TrainingLayout {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn snapshots_dir(&self) -> PathBuf {
        self.root.join("saved_models_per_epoch")
    }

    /// Per-epoch local snapshot path, e.g. `model_epoch_1_05.json`.
    #[must_use]
    pub fn epoch_snapshot_path(&self, run_label: &str, epoch: u32, extension: &str) -> PathBuf {
        self.snapshots_dir().join(format!("model_epoch_{run_label}_{epoch:02}.{extension}"))
    }

    #[must_use]
    pub fn run_dir(&self, run_id: &RunId) -> PathBuf {
        self.root.join("runs").join(run_id.0.as_str())
    }

    #[must_use]
    pub fn run_manifest_path(&self, run_id: &RunId) -> PathBuf {
        self.run_dir(run_id).join("run_manifest.json")
    }

    #[must_use]
    pub fn models_dir(&self) -> PathBuf {
        self.root.join("models")
    }

    pub fn ensure_run_dirs(&self, run_id: &RunId) -> TrainingResult<()> {
        std::fs::create_dir_all(self.run_dir(run_id))?;
        std::fs::create_dir_all(self.snapshots_dir())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_layout_paths() {
        let temp = TempDir::new().unwrap();
        let layout = TrainingLayout::new(temp.path().to_path_buf());
        let id = RunId("run-1".to_string());

        assert!(layout.run_dir(&id).to_string_lossy().contains("run-1"));
        assert_eq!(
            layout.epoch_snapshot_path("1", 7, "json").file_name().unwrap(),
            "model_epoch_1_07.json"
        );

        layout.ensure_run_dirs(&id).unwrap();
        assert!(layout.snapshots_dir().is_dir());
        assert!(layout.run_dir(&id).is_dir());
    }
}
