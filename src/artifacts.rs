use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::version::Version;

/// Maven-style identity of a downloadable artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactCoordinates {
    pub group_id: String,
    pub artifact_id: String,
    pub version: String,
    pub packaging: String,
}

impl ArtifactCoordinates {
    pub fn new(
        group_id: impl Into<String>,
        artifact_id: impl Into<String>,
        version: impl Into<String>,
        packaging: impl Into<String>,
    ) -> Self {
        Self {
            group_id: group_id.into(),
            artifact_id: artifact_id.into(),
            version: version.into(),
            packaging: packaging.into(),
        }
    }

    /// Parses `group:artifact:version[:packaging]`, packaging defaulting to `jar`.
    pub fn parse(text: &str) -> Option<Self> {
        let parts: Vec<&str> = text.split(':').collect();
        match parts.as_slice() {
            [group, artifact, version] => Some(Self::new(*group, *artifact, *version, "jar")),
            [group, artifact, version, packaging] => {
                Some(Self::new(*group, *artifact, *version, *packaging))
            }
            _ => None,
        }
    }

    pub fn file_name(&self) -> String {
        format!("{}-{}.{}", self.artifact_id, self.version, self.packaging)
    }
}

impl fmt::Display for ArtifactCoordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.group_id, self.artifact_id, self.version, self.packaging
        )
    }
}

/// Symbolic version families resolved by [`VersionAliasResolver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasKind {
    LatestRelease,
    Dev,
    Dogfood,
}

impl AliasKind {
    pub fn prefix(self) -> &'static str {
        match self {
            AliasKind::LatestRelease => "LATEST_RELEASE",
            AliasKind::Dev => "DEV",
            AliasKind::Dogfood => "DOGFOOD",
        }
    }
}

/// Finds the local file of an artifact, downloading it if needed.
///
/// Returning `None` is the normal "not found" outcome; callers decide
/// whether that is fatal.
pub trait ArtifactLocator: Send + Sync {
    fn locate(&self, coordinates: &ArtifactCoordinates) -> Option<PathBuf>;
}

/// Resolves a version alias to a concrete version string.
pub trait VersionAliasResolver: Send + Sync {
    /// Returns the version `alias` designates for `group_id:artifact_id`.
    ///
    /// # Arguments
    /// * `series` - Bracket content of the alias (`9.9` for
    ///   `LATEST_RELEASE[9.9]`). Candidates must start with it. An alias
    ///   without brackets passes `None` rather than the coordinates
    ///   baseline: the baseline only selects the artifact, filtering on it
    ///   would pin a bare `LATEST_RELEASE` to the 8.1 series.
    ///
    /// # Returns
    /// * `Option<String>` - The concrete version, `None` when nothing matches
    fn resolve_version(
        &self,
        group_id: &str,
        artifact_id: &str,
        alias: AliasKind,
        series: Option<&Version>,
    ) -> Option<String>;
}

/// Artifact locator and alias resolver backed by a local Maven repository.
#[derive(Debug, Clone)]
pub struct LocalRepository {
    root: PathBuf,
}

impl LocalRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn artifact_dir(&self, group_id: &str, artifact_id: &str) -> PathBuf {
        let mut dir = self.root.clone();
        dir.extend(group_id.split('.'));
        dir.push(artifact_id);
        dir
    }

    fn versions(&self, group_id: &str, artifact_id: &str) -> Vec<Version> {
        let dir = self.artifact_dir(group_id, artifact_id);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!("No versions under {:?}: {}", dir, e);
                return Vec::new();
            }
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| entry.file_name().to_str().and_then(|n| Version::parse(n).ok()))
            .collect()
    }
}

impl ArtifactLocator for LocalRepository {
    fn locate(&self, coordinates: &ArtifactCoordinates) -> Option<PathBuf> {
        let file = self
            .artifact_dir(&coordinates.group_id, &coordinates.artifact_id)
            .join(&coordinates.version)
            .join(coordinates.file_name());
        if file.is_file() {
            debug!("Located {} at {:?}", coordinates, file);
            Some(file)
        } else {
            warn!("Artifact {} not found in {:?}", coordinates, self.root);
            None
        }
    }
}

impl VersionAliasResolver for LocalRepository {
    fn resolve_version(
        &self,
        group_id: &str,
        artifact_id: &str,
        alias: AliasKind,
        series: Option<&Version>,
    ) -> Option<String> {
        self.versions(group_id, artifact_id)
            .into_iter()
            .filter(|version| series.map_or(true, |series| version.starts_with(series)))
            .filter(|version| alias != AliasKind::LatestRelease || version.is_release())
            .max()
            .map(|version| version.to_string())
    }
}
