use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::artifacts::{AliasKind, ArtifactCoordinates, ArtifactLocator, VersionAliasResolver};
use crate::distribution::DistributionSpec;
use crate::edition::{Edition, COORDINATES_BASELINE};
use crate::error::ResolutionError;
use crate::version::Version;

const DISTRIBUTION_PACKAGING: &str = "zip";

/// Outcome of version resolution: either the caller's own archive or the
/// coordinates of the archive to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedArtifact {
    LocalArchive(PathBuf),
    Coordinates(ArtifactCoordinates),
}

/// A resolved distribution archive, ready to be installed.
#[derive(Debug, Clone)]
pub struct Packaging {
    pub edition: Edition,
    pub version: Version,
    pub archive: PathBuf,
}

/// Alias and bracketed series extracted from a version string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasRequest {
    pub kind: AliasKind,
    /// Version used to pick the artifact coordinates.
    pub bound: Version,
    /// Bracket content, when present and non-empty.
    pub series: Option<Version>,
}

/// The series bound used when an alias carries no bracket.
pub fn baseline_series() -> Version {
    let (major, minor) = COORDINATES_BASELINE;
    Version::create(major, minor)
}

/// Splits an alias such as `LATEST_RELEASE[9.9]` into its parts.
///
/// Returns `Ok(None)` for literal versions.
pub fn parse_alias(text: &str) -> Result<Option<AliasRequest>, ResolutionError> {
    if text.contains("COMPATIBLE") || text.starts_with("LTS") {
        return Err(ResolutionError::UnsupportedAlias(text.to_string()));
    }
    let (kind, rest) = if let Some(rest) = text.strip_prefix(AliasKind::LatestRelease.prefix()) {
        (AliasKind::LatestRelease, rest)
    } else if let Some(rest) = text.strip_prefix(AliasKind::Dev.prefix()) {
        (AliasKind::Dev, rest)
    } else if let Some(rest) = text.strip_prefix(AliasKind::Dogfood.prefix()) {
        (AliasKind::Dogfood, rest)
    } else {
        return Ok(None);
    };

    let malformed = || ResolutionError::MalformedAlias(text.to_string());
    let series = if rest.is_empty() {
        None
    } else if kind == AliasKind::Dogfood {
        return Err(malformed());
    } else {
        let inner = rest
            .strip_prefix('[')
            .and_then(|r| r.strip_suffix(']'))
            .ok_or_else(malformed)?;
        if inner.is_empty() {
            None
        } else {
            let series = Version::parse(inner).map_err(|_| malformed())?;
            let components = inner.split('.').count();
            if !series.is_release() || components > 3 {
                return Err(malformed());
            }
            Some(series)
        }
    };

    Ok(Some(AliasRequest {
        kind,
        bound: series.clone().unwrap_or_else(baseline_series),
        series,
    }))
}

/// Maps a distribution request to the archive to install.
pub struct VersionResolver {
    aliases: Arc<dyn VersionAliasResolver>,
}

impl VersionResolver {
    pub fn new(aliases: Arc<dyn VersionAliasResolver>) -> Self {
        Self { aliases }
    }

    /// Resolves the request without fetching anything.
    ///
    /// An explicit archive short-circuits everything; literal versions are
    /// taken as-is; aliases are delegated to the alias resolver.
    pub fn resolve(&self, spec: &DistributionSpec) -> Result<ResolvedArtifact, ResolutionError> {
        if let Some(archive) = &spec.archive {
            debug!("Using explicit archive {:?}", archive);
            return Ok(ResolvedArtifact::LocalArchive(archive.clone()));
        }
        let text = spec.version.as_deref().ok_or(ResolutionError::MissingVersion)?;

        let coordinates = match parse_alias(text)? {
            Some(alias) => self.resolve_alias(spec.edition, text, &alias)?,
            None => {
                let (group_id, artifact_id) = spec.edition.coordinates(&Version::parse(text)?);
                ArtifactCoordinates::new(group_id, artifact_id, text, DISTRIBUTION_PACKAGING)
            }
        };
        Ok(ResolvedArtifact::Coordinates(coordinates))
    }

    /// Looks the alias up and fetches the result from the same artifact.
    ///
    /// The coordinates follow the series bound, not the resolved version: a
    /// `DEV[8]` request stays on the artifact it was resolved against even
    /// when the answer is past the coordinates baseline.
    fn resolve_alias(
        &self,
        edition: Edition,
        text: &str,
        alias: &AliasRequest,
    ) -> Result<ArtifactCoordinates, ResolutionError> {
        let (group_id, artifact_id) = edition.coordinates(&alias.bound);
        let resolved = self
            .aliases
            .resolve_version(group_id, artifact_id, alias.kind, alias.series.as_ref())
            .ok_or_else(|| ResolutionError::Unresolvable {
                group_id: group_id.to_string(),
                artifact_id: artifact_id.to_string(),
                alias: text.to_string(),
            })?;
        info!("Resolved {} {} to {}", edition, text, resolved);
        Ok(ArtifactCoordinates::new(
            group_id,
            artifact_id,
            resolved,
            DISTRIBUTION_PACKAGING,
        ))
    }
}

/// Resolves a request and fetches its archive.
pub struct PackagingResolver {
    versions: VersionResolver,
    locator: Arc<dyn ArtifactLocator>,
}

impl PackagingResolver {
    pub fn new(aliases: Arc<dyn VersionAliasResolver>, locator: Arc<dyn ArtifactLocator>) -> Self {
        Self {
            versions: VersionResolver::new(aliases),
            locator,
        }
    }

    pub fn resolve(&self, spec: &DistributionSpec) -> Result<Packaging, ResolutionError> {
        let packaging = match self.versions.resolve(spec)? {
            ResolvedArtifact::LocalArchive(archive) => {
                if !archive.is_file() {
                    return Err(ResolutionError::ArchiveNotFound(archive));
                }
                Packaging {
                    edition: spec.edition,
                    version: version_from_archive_name(&archive)?,
                    archive,
                }
            }
            ResolvedArtifact::Coordinates(coordinates) => {
                let archive = self
                    .locator
                    .locate(&coordinates)
                    .ok_or_else(|| ResolutionError::ArtifactNotFound(coordinates.clone()))?;
                Packaging {
                    edition: spec.edition,
                    version: Version::parse(&coordinates.version)?,
                    archive,
                }
            }
        };
        info!(
            "Resolved {} {} to {:?}",
            packaging.edition, packaging.version, packaging.archive
        );
        Ok(packaging)
    }
}

/// Reads `9.9.0.65466` out of `sonarqube-9.9.0.65466.zip`.
fn version_from_archive_name(archive: &Path) -> Result<Version, ResolutionError> {
    let unknown = || ResolutionError::UnknownArchiveVersion(archive.to_path_buf());
    let stem = archive
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(unknown)?;
    let start = stem
        .char_indices()
        .find(|&(i, c)| {
            c == '-'
                && stem[i + 1..]
                    .chars()
                    .next()
                    .is_some_and(|next| next.is_ascii_digit())
        })
        .map(|(i, _)| i + 1)
        .ok_or_else(unknown)?;
    Version::parse(&stem[start..]).map_err(|_| unknown())
}
