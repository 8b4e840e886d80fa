//! Local cache inspection.

use crate::error::TrainingResult;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Regular files directly inside `dir`, sorted by path.
///
/// A missing directory has no files. Contents are not validated.
pub fn list_files(dir: &Path) -> TrainingResult<Vec<PathBuf>> {
    match std::fs::metadata(dir) {
        Ok(md) if md.is_dir() => {}
        Ok(_) => return Ok(Vec::new()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(true) {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// Number of regular files directly inside `dir`; zero if it does not exist.
pub fn count_files(dir: &Path) -> TrainingResult<usize> {
    Ok(list_files(dir)?.len())
}
