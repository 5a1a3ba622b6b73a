use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::artifacts::{ArtifactLocator, LocalRepository, VersionAliasResolver};
use crate::distribution::DistributionSpec;
use crate::error::Result;
use crate::installer::Installer;
use crate::log_watcher::{DefaultStartupLogWatcher, StartupLogWatcher};
use crate::port_prober::{OsPortProber, PortProber};
use crate::process_controller::{ControllerConfig, LifecycleState, ProcessController};
use crate::resolver::PackagingResolver;
use crate::server::ServerHandle;

/// Settings shared by every server of one orchestrator run.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Directory receiving one sub-directory per installation
    pub workspace: PathBuf,
    /// Root of the local artifact repository
    pub repository: PathBuf,
    pub startup_timeout: Duration,
    pub stop_timeout: Duration,
    pub poll_interval: Duration,
    pub java_home: Option<PathBuf>,
    pub java_executable: Option<PathBuf>,
    /// Web port imposed by the container the run executes in
    pub container_port: Option<u16>,
}

impl OrchestratorConfig {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        let defaults = ControllerConfig::default();
        Self {
            workspace: workspace.into(),
            repository: default_repository(),
            startup_timeout: defaults.startup_timeout,
            stop_timeout: defaults.stop_timeout,
            poll_interval: defaults.poll_interval,
            java_home: None,
            java_executable: None,
            container_port: None,
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            startup_timeout: self.startup_timeout,
            stop_timeout: self.stop_timeout,
            poll_interval: self.poll_interval,
            java_executable: self.java_executable.clone(),
            java_home: self.java_home.clone(),
            ..ControllerConfig::default()
        }
    }
}

/// `$HOME/.m2/repository`, relative to the working directory without `HOME`.
pub fn default_repository() -> PathBuf {
    let base = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default();
    base.join(".m2").join("repository")
}

/// Resolves, installs and supervises servers, one controller per installation.
pub struct Orchestrator {
    config: OrchestratorConfig,
    packaging: PackagingResolver,
    installer: Installer,
    controllers: HashMap<PathBuf, ProcessController>,
}

impl Orchestrator {
    /// Creates an orchestrator over explicit collaborators.
    ///
    /// # Arguments
    /// * `config` - Workspace, runtime and timeouts
    /// * `locator` - Finds distribution archives and plugin files
    /// * `aliases` - Turns `LATEST_RELEASE` and `DEV` into versions
    /// * `prober` - Finds free ports for the generated configuration
    pub fn new(
        config: OrchestratorConfig,
        locator: Arc<dyn ArtifactLocator>,
        aliases: Arc<dyn VersionAliasResolver>,
        prober: Arc<dyn PortProber>,
    ) -> Self {
        Self {
            packaging: PackagingResolver::new(aliases, locator.clone()),
            installer: Installer::new(
                config.workspace.clone(),
                locator,
                prober,
                config.container_port,
            ),
            config,
            controllers: HashMap::new(),
        }
    }

    /// Orchestrator backed by the configured repository and OS port probing.
    pub fn from_config(config: OrchestratorConfig) -> Self {
        let repository = LocalRepository::new(&config.repository);
        Self::with_local_repository(config, repository)
    }

    /// Orchestrator backed by a local repository and OS port probing.
    pub fn with_local_repository(config: OrchestratorConfig, repository: LocalRepository) -> Self {
        let repository = Arc::new(repository);
        Self::new(config, repository.clone(), repository, Arc::new(OsPortProber))
    }

    /// Configuration the orchestrator was built with.
    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Resolves the request and installs it in a fresh directory.
    pub fn resolve_and_install(&self, spec: &DistributionSpec) -> Result<ServerHandle> {
        let packaging = self.packaging.resolve(spec)?;
        Ok(self.installer.install(&packaging, spec)?)
    }

    /// Starts the server, waiting for its version's default readiness line.
    pub async fn start(&mut self, handle: &ServerHandle) -> Result<()> {
        let watcher = Arc::new(DefaultStartupLogWatcher::new(&handle.version));
        self.start_with_watcher(handle, watcher).await
    }

    /// Starts the server with a custom readiness check.
    ///
    /// The first call for an installation creates its controller; later
    /// calls reuse it and fail unless it is still `NotStarted`.
    pub async fn start_with_watcher(
        &mut self,
        handle: &ServerHandle,
        watcher: Arc<dyn StartupLogWatcher>,
    ) -> Result<()> {
        let config = self.config.controller_config();
        let controller = self
            .controllers
            .entry(handle.home.clone())
            .or_insert_with(|| ProcessController::with_watcher(handle.clone(), config, watcher));
        Ok(controller.start().await?)
    }

    /// Stops the server if it runs. Never fails.
    pub async fn stop(&mut self, handle: &ServerHandle) {
        if let Some(controller) = self.controllers.get_mut(&handle.home) {
            controller.stop().await;
        }
    }

    /// Stops every server this orchestrator started, one after the other.
    pub async fn stop_all(&mut self) {
        for (home, controller) in self.controllers.iter_mut() {
            info!("Stopping server installed in {:?}", home);
            controller.stop().await;
        }
    }

    /// True while the installation's server process runs.
    ///
    /// # Returns
    /// * `bool` - False for an installation that was never started
    pub fn is_alive(&mut self, handle: &ServerHandle) -> bool {
        self.controllers
            .get_mut(&handle.home)
            .is_some_and(|controller| controller.is_alive())
    }

    /// Lifecycle state, or `None` for an installation never started here.
    pub fn state(&self, handle: &ServerHandle) -> Option<LifecycleState> {
        self.controllers.get(&handle.home).map(|controller| controller.state())
    }
}
