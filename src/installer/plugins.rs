use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::artifacts::ArtifactLocator;
use crate::distribution::{BundledPlugins, PluginLocation};
use crate::error::InstallationError;
use crate::server::layout;

/// Deletes the plugins shipped in the distribution that `policy` does not keep.
pub fn remove_bundled_plugins(
    distribution_dir: &Path,
    policy: &BundledPlugins,
) -> Result<(), InstallationError> {
    let prefixes: &[String] = match policy {
        BundledPlugins::KeepAll => return Ok(()),
        BundledPlugins::KeepNone => &[],
        BundledPlugins::KeepPrefixed(prefixes) => prefixes,
    };

    for dir in [layout::BUNDLED_PLUGINS_DIR, layout::LEGACY_BUNDLED_PLUGINS_DIR] {
        let dir = distribution_dir.join(dir);
        if !dir.is_dir() {
            continue;
        }
        for entry in fs::read_dir(&dir).map_err(InstallationError::io(&dir))? {
            let path = entry.map_err(InstallationError::io(&dir))?.path();
            if !path.is_file() {
                continue;
            }
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            if prefixes.iter().any(|prefix| name.starts_with(prefix.as_str())) {
                debug!("Keeping bundled plugin {}", name);
                continue;
            }
            fs::remove_file(&path).map_err(InstallationError::io(&path))?;
            debug!("Removed bundled plugin {}", name);
        }
    }
    Ok(())
}

/// Resolves each location and copies it into `target_dir`.
///
/// The first location that does not resolve to a file aborts the copy.
pub fn copy_plugins(
    locator: &dyn ArtifactLocator,
    locations: &[PluginLocation],
    target_dir: &Path,
) -> Result<(), InstallationError> {
    if locations.is_empty() {
        return Ok(());
    }
    fs::create_dir_all(target_dir).map_err(InstallationError::io(target_dir))?;
    for location in locations {
        let file = resolve_plugin(locator, location)?;
        let target = copy_into(&file, target_dir).map_err(InstallationError::io(&file))?;
        info!("Installed plugin {} to {:?}", location, target);
    }
    Ok(())
}

fn resolve_plugin(
    locator: &dyn ArtifactLocator,
    location: &PluginLocation,
) -> Result<PathBuf, InstallationError> {
    let file = match location {
        PluginLocation::File(path) => Some(path.clone()),
        PluginLocation::Artifact(coordinates) => locator.locate(coordinates),
    };
    file.filter(|path| path.is_file())
        .ok_or_else(|| InstallationError::PluginNotFound(location.to_string()))
}

/// Copies `file` into `dir`, keeping its file name.
pub(crate) fn copy_into(file: &Path, dir: &Path) -> std::io::Result<PathBuf> {
    let name = file.file_name().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name")
    })?;
    let target = dir.join(name);
    fs::copy(file, &target)?;
    Ok(target)
}
