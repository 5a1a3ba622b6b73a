use std::fs::{self, File};
use std::path::{Path, PathBuf};

use tracing::debug;
use zip::ZipArchive;

use crate::error::InstallationError;

/// Unzips `archive` into `destination` and returns the archive's single
/// top-level directory.
pub fn unzip_distribution(archive: &Path, destination: &Path) -> Result<PathBuf, InstallationError> {
    let file = File::open(archive).map_err(InstallationError::io(archive))?;
    let mut zip = ZipArchive::new(file).map_err(|source| InstallationError::Archive {
        archive: archive.to_path_buf(),
        source,
    })?;
    debug!("Unzipping {} entries of {:?} into {:?}", zip.len(), archive, destination);
    zip.extract(destination)
        .map_err(|source| InstallationError::Archive {
            archive: archive.to_path_buf(),
            source,
        })?;

    let entries = fs::read_dir(destination)
        .map_err(InstallationError::io(destination))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<Vec<_>, _>>()
        .map_err(InstallationError::io(destination))?;

    match entries.as_slice() {
        [single] if single.is_dir() => Ok(single.clone()),
        _ => Err(InstallationError::ArchiveLayout {
            archive: archive.to_path_buf(),
            found: entries.len(),
        }),
    }
}
