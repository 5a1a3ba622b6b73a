//! Provisions and supervises a server instance for integration tests.
//!
//! A [`DistributionSpec`] is resolved to a concrete archive, unpacked into a
//! private directory with a generated configuration, then launched and
//! watched by a [`ProcessController`] until it reports readiness. Stopping
//! goes through the server's own shared memory stop channel first and falls
//! back to killing the process group.

pub mod artifacts;
pub mod control;
pub mod distribution;
pub mod edition;
pub mod environment;
pub mod error;
pub mod installer;
pub mod log_watcher;
pub mod orchestrator;
pub mod port_prober;
pub mod process_controller;
pub mod resolver;
pub mod server;
pub mod shutdown_hook;
pub mod version;

pub use artifacts::{AliasKind, ArtifactCoordinates, ArtifactLocator, LocalRepository, VersionAliasResolver};
pub use control::StopChannel;
pub use distribution::{BundledPlugins, DatabaseSpec, DistributionSpec, PluginLocation};
pub use edition::Edition;
pub use error::{Error, InstallationError, ResolutionError, Result, StartupError};
pub use installer::{InstallationPool, Installer};
pub use log_watcher::{DefaultStartupLogWatcher, StartupLogWatcher};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use port_prober::{OsPortProber, PortProber};
pub use process_controller::{ControllerConfig, LaunchCommand, LifecycleState, ProcessController};
pub use resolver::{Packaging, PackagingResolver, ResolvedArtifact, VersionResolver};
pub use server::ServerHandle;
pub use shutdown_hook::{ShutdownHook, SignalInterception};
pub use version::Version;
