use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::artifacts::ArtifactCoordinates;
use crate::edition::Edition;

/// Where a plugin file comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PluginLocation {
    File(PathBuf),
    Artifact(ArtifactCoordinates),
}

impl fmt::Display for PluginLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PluginLocation::File(path) => write!(f, "{}", path.display()),
            PluginLocation::Artifact(coordinates) => write!(f, "{}", coordinates),
        }
    }
}

/// What happens to the plugins shipped inside the archive.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BundledPlugins {
    KeepAll,
    #[default]
    KeepNone,
    /// Keep the files whose name starts with one of these prefixes.
    KeepPrefixed(Vec<String>),
}

/// Database the server connects to. Without one the embedded database is used.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DatabaseSpec {
    /// Dialect name, used as the driver sub-directory (`postgresql`, `oracle`...).
    pub dialect: String,
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub properties: BTreeMap<String, String>,
    pub driver_file: Option<PathBuf>,
}

/// Immutable description of the server to install.
#[derive(Debug, Clone, Default)]
pub struct DistributionSpec {
    pub edition: Edition,
    /// Literal version or alias. Ignored when `archive` is set.
    pub version: Option<String>,
    /// Local archive that bypasses resolution.
    pub archive: Option<PathBuf>,
    pub bundled_plugins: Vec<PluginLocation>,
    pub external_plugins: Vec<PluginLocation>,
    pub keep_bundled_plugins: BundledPlugins,
    pub server_properties: BTreeMap<String, String>,
    pub database: Option<DatabaseSpec>,
    /// Leave the archive's configuration file untouched.
    pub empty_configuration: bool,
    /// Keep the product default of forcing authentication.
    pub default_force_authentication: bool,
    /// Keep the product default of redirecting default admin credentials.
    pub default_admin_credentials_redirect: bool,
}

impl DistributionSpec {
    pub fn with_version(edition: Edition, version: impl Into<String>) -> Self {
        Self {
            edition,
            version: Some(version.into()),
            ..Default::default()
        }
    }

    pub fn with_archive(edition: Edition, archive: impl Into<PathBuf>) -> Self {
        Self {
            edition,
            archive: Some(archive.into()),
            ..Default::default()
        }
    }

    pub fn add_bundled_plugin(mut self, location: PluginLocation) -> Self {
        self.bundled_plugins.push(location);
        self
    }

    pub fn add_external_plugin(mut self, location: PluginLocation) -> Self {
        self.external_plugins.push(location);
        self
    }

    pub fn keep_bundled_plugins(mut self, policy: BundledPlugins) -> Self {
        self.keep_bundled_plugins = policy;
        self
    }

    pub fn set_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.server_properties.insert(key.into(), value.into());
        self
    }

    pub fn database(mut self, database: DatabaseSpec) -> Self {
        self.database = Some(database);
        self
    }
}
