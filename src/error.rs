use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

use crate::artifacts::ArtifactCoordinates;
use crate::process_controller::LifecycleState;
use crate::version::Version;

pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error returned by the provisioning pipeline.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Installation(#[from] InstallationError),
    #[error(transparent)]
    Startup(#[from] StartupError),
}

/// Failures turning a distribution request into a concrete archive.
#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("missing version: a version or an explicit archive must be configured")]
    MissingVersion,
    #[error("unsupported version alias '{0}'")]
    UnsupportedAlias(String),
    #[error("malformed version alias '{0}'")]
    MalformedAlias(String),
    #[error("invalid version '{0}'")]
    InvalidVersion(String),
    #[error("no version of {group_id}:{artifact_id} matches alias '{alias}'")]
    Unresolvable {
        group_id: String,
        artifact_id: String,
        alias: String,
    },
    #[error("artifact not found: {0}")]
    ArtifactNotFound(ArtifactCoordinates),
    #[error("archive not found: {}", .0.display())]
    ArchiveNotFound(PathBuf),
    #[error("cannot read a version from archive name {}", .0.display())]
    UnknownArchiveVersion(PathBuf),
}

/// Failures unpacking or configuring an installation.
#[derive(Debug, Error)]
pub enum InstallationError {
    #[error("I/O failure on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot unzip {}: {source}", archive.display())]
    Archive {
        archive: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("archive {} must contain exactly one top-level directory, found {found} entries", archive.display())]
    ArchiveLayout { archive: PathBuf, found: usize },
    #[error("plugin not found: {0}")]
    PluginNotFound(String),
    #[error("cannot copy database driver {}: {source}", path.display())]
    DriverCopy {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("property {key} must not point to {value}")]
    ForbiddenProperty { key: String, value: String },
    #[error("property {key} is required on a search node of a cluster")]
    MissingClusterHost { key: String },
    #[error("invalid property {key}={value}")]
    InvalidProperty { key: String, value: String },
    #[error("cannot resolve host '{0}'")]
    UnresolvableHost(String),
    #[error("cannot find a free port on {host}: {source}")]
    PortProbe {
        host: String,
        #[source]
        source: std::io::Error,
    },
}

/// Failures bringing a server up.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("server can not be started from state {0:?}")]
    IllegalState(LifecycleState),
    #[error("version {version} is not supported, minimum is {minimum}")]
    UnsupportedVersion { version: Version, minimum: Version },
    #[error("no application archive matching {pattern} in {}", dir.display())]
    MissingApplicationArchive { dir: PathBuf, pattern: String },
    #[error("{count} application archives matching {pattern} in {}", dir.display())]
    AmbiguousApplicationArchive {
        dir: PathBuf,
        pattern: String,
        count: usize,
    },
    #[error("cannot launch {}: {source}", program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("server process exited before becoming ready ({})", describe_status(.status))]
    ExitedBeforeReady { status: Option<ExitStatus> },
    #[error("server did not become ready within {timeout:?} ({})", describe_status(.status))]
    Timeout {
        timeout: Duration,
        status: Option<ExitStatus>,
    },
}

fn describe_status(status: &Option<ExitStatus>) -> String {
    match status {
        Some(status) => status.to_string(),
        None => "exit status unknown".to_string(),
    }
}

impl InstallationError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io { path, source }
    }
}
