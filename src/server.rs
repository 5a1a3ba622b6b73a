use std::path::{Path, PathBuf};

use crate::edition::Edition;
use crate::version::Version;

/// Paths inside an unpacked distribution, relative to its top-level directory.
pub mod layout {
    pub const LIB_DIR: &str = "lib";
    pub const CONF_FILE: &str = "conf/sonar.properties";
    pub const TEMP_DIR: &str = "temp";
    pub const BUNDLED_PLUGINS_DIR: &str = "lib/extensions";
    pub const LEGACY_BUNDLED_PLUGINS_DIR: &str = "extensions/plugins";
    pub const DOWNLOADS_DIR: &str = "extensions/downloads";
    pub const JDBC_DRIVER_DIR: &str = "extensions/jdbc-driver";
}

/// Identity and network coordinates of one installed server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHandle {
    /// Installation directory, unique within the run.
    pub home: PathBuf,
    /// The single top-level directory unpacked from the archive.
    pub distribution_dir: PathBuf,
    pub edition: Edition,
    pub version: Version,
    /// Scheme, host, port and context path, without trailing slash.
    pub base_url: String,
    pub search_port: u16,
    pub cluster_node_name: Option<String>,
}

impl ServerHandle {
    pub fn lib_dir(&self) -> PathBuf {
        self.distribution_dir.join(layout::LIB_DIR)
    }

    pub fn conf_file(&self) -> PathBuf {
        self.distribution_dir.join(layout::CONF_FILE)
    }

    pub fn temp_dir(&self) -> PathBuf {
        self.distribution_dir.join(layout::TEMP_DIR)
    }

    pub fn home(&self) -> &Path {
        &self.home
    }
}
