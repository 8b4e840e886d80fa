//! Dataset archive extraction (`.zip`, `.tar.gz`/`.tgz`, `.tar`).

use crate::error::{TrainingError, TrainingResult};
use flate2::read::GzDecoder;
use std::fs::File;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
    Tar,
}

impl ArchiveFormat {
    pub fn from_path(path: &Path) -> TrainingResult<Self> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        if name.ends_with(".zip") {
            Ok(Self::Zip)
        } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Ok(Self::TarGz)
        } else if name.ends_with(".tar") {
            Ok(Self::Tar)
        } else {
            Err(TrainingError::Archive(format!(
                "unsupported archive type: {}",
                path.display()
            )))
        }
    }
}

/// Extracts `archive` over `dest`, returning the number of files written.
///
/// Entries whose paths would escape `dest` are rejected.
pub fn extract_archive(archive: &Path, dest: &Path) -> TrainingResult<usize> {
    let format = ArchiveFormat::from_path(archive)?;
    std::fs::create_dir_all(dest)?;
    let file = File::open(archive)?;
    let written = match format {
        ArchiveFormat::Zip => extract_zip(file, dest)?,
        ArchiveFormat::TarGz => extract_tar(tar::Archive::new(GzDecoder::new(file)), dest)?,
        ArchiveFormat::Tar => extract_tar(tar::Archive::new(file), dest)?,
    };
    debug!(archive = %archive.display(), dest = %dest.display(), files = written, "Extracted archive");
    Ok(written)
}

fn extract_zip(file: File, dest: &Path) -> TrainingResult<usize> {
    let mut zip = zip::ZipArchive::new(file)
        .map_err(|e| TrainingError::Archive(format!("malformed zip archive: {e}")))?;

    let mut written = 0;
    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| TrainingError::Archive(format!("zip entry {i}: {e}")))?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(TrainingError::Archive(format!("unsafe path in zip: {}", entry.name())));
        };
        let out = dest.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut target = File::create(&out)?;
        std::io::copy(&mut entry, &mut target)?;
        written += 1;
    }
    Ok(written)
}

fn extract_tar<R: std::io::Read>(mut archive: tar::Archive<R>, dest: &Path) -> TrainingResult<usize> {
    let mut written = 0;
    let entries = archive
        .entries()
        .map_err(|e| TrainingError::Archive(format!("malformed tar archive: {e}")))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| TrainingError::Archive(format!("tar entry: {e}")))?;
        let is_file = entry.header().entry_type().is_file();
        let path = entry.path().map(|p| p.display().to_string()).unwrap_or_default();
        let unpacked = entry
            .unpack_in(dest)
            .map_err(|e| TrainingError::Archive(format!("tar entry {path}: {e}")))?;
        if !unpacked {
            return Err(TrainingError::Archive(format!("unsafe path in tar: {path}")));
        }
        if is_file {
            written += 1;
        }
    }
    Ok(written)
}
