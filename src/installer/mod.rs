//! Unpacks a resolved distribution into a private directory and configures it.

mod archive;
mod plugins;
pub mod properties;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::artifacts::ArtifactLocator;
use crate::distribution::{DatabaseSpec, DistributionSpec};
use crate::error::InstallationError;
use crate::port_prober::PortProber;
use crate::resolver::Packaging;
use crate::server::{layout, ServerHandle};

pub use archive::unzip_distribution;
pub use plugins::{copy_plugins, remove_bundled_plugins};
pub use properties::{NetworkSettings, PropertiesSynthesizer, ServerProperties};

/// Hands out installation directory names that never repeat within a run.
#[derive(Debug)]
pub struct InstallationPool {
    counter: AtomicU64,
}

static INSTALLATIONS: InstallationPool = InstallationPool::new();

impl InstallationPool {
    /// Creates a pool whose first identifier is 1.
    pub const fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    /// The pool shared by every installer of this process.
    pub fn global() -> &'static InstallationPool {
        &INSTALLATIONS
    }

    /// Reserves the next identifier.
    ///
    /// # Returns
    /// * `u64` - Never returned twice by the same pool, across threads
    pub fn next_id(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Turns a [`Packaging`] into a configured installation on disk.
pub struct Installer {
    workspace: PathBuf,
    locator: Arc<dyn ArtifactLocator>,
    prober: Arc<dyn PortProber>,
    container_port: Option<u16>,
    pool: &'static InstallationPool,
}

impl Installer {
    /// Creates an installer that places installations under `workspace`.
    ///
    /// # Arguments
    /// * `workspace` - Parent directory of every installation of this run
    /// * `locator` - Resolves plugin artifacts
    /// * `prober` - Finds free ports
    /// * `container_port` - Web port forced by the surrounding container, if any
    pub fn new(
        workspace: impl Into<PathBuf>,
        locator: Arc<dyn ArtifactLocator>,
        prober: Arc<dyn PortProber>,
        container_port: Option<u16>,
    ) -> Self {
        Self {
            workspace: workspace.into(),
            locator,
            prober,
            container_port,
            pool: InstallationPool::global(),
        }
    }

    /// Unpacks, prepares plugins and drivers, writes the configuration.
    ///
    /// A failure leaves whatever was already written in place; discarding the
    /// directory is up to the caller.
    ///
    /// # Returns
    /// * `Result<ServerHandle, InstallationError>` - The installed server
    pub fn install(
        &self,
        packaging: &Packaging,
        spec: &DistributionSpec,
    ) -> Result<ServerHandle, InstallationError> {
        let home = self.allocate_home(packaging)?;
        info!("Installing {} {} in {:?}", packaging.edition, packaging.version, home);

        let distribution_dir = unzip_distribution(&packaging.archive, &home)?;

        remove_bundled_plugins(&distribution_dir, &spec.keep_bundled_plugins)?;
        copy_plugins(
            self.locator.as_ref(),
            &spec.bundled_plugins,
            &distribution_dir.join(layout::BUNDLED_PLUGINS_DIR),
        )?;
        copy_plugins(
            self.locator.as_ref(),
            &spec.external_plugins,
            &distribution_dir.join(layout::DOWNLOADS_DIR),
        )?;

        if let Some(database) = &spec.database {
            install_driver(&distribution_dir, database)?;
        }

        let mut properties = ServerProperties::from(spec.server_properties.clone());
        let network = if spec.empty_configuration {
            debug!("Empty configuration requested, keeping the distribution's own");
            NetworkSettings::from_properties(&properties)?
        } else {
            let synthesizer = PropertiesSynthesizer {
                prober: self.prober.as_ref(),
                container_port: self.container_port,
            };
            let network = synthesizer.synthesize(spec, &mut properties)?;
            properties.write_to(&distribution_dir.join(layout::CONF_FILE))?;
            network
        };

        let handle = ServerHandle {
            home,
            distribution_dir,
            edition: packaging.edition,
            version: packaging.version.clone(),
            base_url: network.base_url(),
            search_port: network.search_port,
            cluster_node_name: properties
                .get(properties::CLUSTER_NODE_NAME)
                .map(str::to_string),
        };
        info!("Installed server at {}", handle.base_url);
        Ok(handle)
    }

    fn allocate_home(&self, packaging: &Packaging) -> Result<PathBuf, InstallationError> {
        let name = format!(
            "{}-{}-{}",
            packaging.edition,
            packaging.version,
            self.pool.next_id()
        );
        let home = self.workspace.join(name);
        if home.exists() {
            debug!("Deleting stale installation {:?}", home);
            fs::remove_dir_all(&home).map_err(InstallationError::io(&home))?;
        }
        fs::create_dir_all(&home).map_err(InstallationError::io(&home))?;
        Ok(home)
    }
}

fn install_driver(distribution_dir: &Path, database: &DatabaseSpec) -> Result<(), InstallationError> {
    let Some(driver) = &database.driver_file else {
        return Ok(());
    };
    let dir = distribution_dir
        .join(layout::JDBC_DRIVER_DIR)
        .join(&database.dialect);
    fs::create_dir_all(&dir)
        .and_then(|_| plugins::copy_into(driver, &dir))
        .map_err(|source| InstallationError::DriverCopy {
            path: driver.clone(),
            source,
        })?;
    info!("Installed {} driver {:?}", database.dialect, driver);
    Ok(())
}
