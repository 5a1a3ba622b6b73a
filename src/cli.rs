use clap::{Args, Parser, Subcommand};
use eyre::eyre;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use sqharness::{BundledPlugins, DistributionSpec, Edition, OrchestratorConfig, PluginLocation};

type Result<T> = color_eyre::eyre::Result<T>;

/// Installs and runs a server for integration tests
#[derive(Parser)]
#[command(name = "sqharness")]
#[command(about = "Installs and runs a server for integration tests")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Directory receiving the installations
    #[arg(long, global = true, default_value = "target/sqharness")]
    pub workspace: PathBuf,

    /// Local artifact repository (default: $HOME/.m2/repository)
    #[arg(long, global = true, env = "SQHARNESS_REPOSITORY")]
    pub repository: Option<PathBuf>,

    /// Runtime installation used to launch the server
    #[arg(long, global = true, env = "JAVA_HOME")]
    pub java_home: Option<PathBuf>,

    /// Runtime executable, overrides --java-home
    #[arg(long, global = true)]
    pub java: Option<PathBuf>,

    /// Web port imposed by the surrounding container
    #[arg(long, global = true, env = "SQHARNESS_CONTAINER_PORT")]
    pub container_port: Option<u16>,

    /// Startup timeout (seconds)
    #[arg(long, global = true, default_value = "600")]
    pub startup_timeout_secs: u64,

    /// Stop timeout (seconds)
    #[arg(long, global = true, default_value = "300")]
    pub stop_timeout_secs: u64,

    /// Readiness polling interval (ms)
    #[arg(long, global = true, default_value = "100")]
    pub poll_interval_ms: u64,
}

#[derive(Subcommand)]
pub enum Command {
    /// Resolve and install a server without starting it
    Install(DistributionArgs),
    /// Install, start, and stop the server on Ctrl-C
    Run(DistributionArgs),
}

#[derive(Args, Clone)]
pub struct DistributionArgs {
    /// Product edition
    #[arg(long, value_enum, default_value_t = Edition::Community)]
    pub edition: Edition,

    /// Version or alias (LATEST_RELEASE[X.Y], DEV[X], DOGFOOD)
    #[arg(long, required_unless_present = "zip")]
    pub version: Option<String>,

    /// Local distribution archive, bypasses version resolution
    #[arg(long, conflicts_with = "version")]
    pub zip: Option<PathBuf>,

    /// Plugin installed next to the bundled ones (file or group:artifact:version)
    #[arg(long = "bundled-plugin")]
    pub bundled_plugins: Vec<String>,

    /// Plugin installed as a downloaded one (file or group:artifact:version)
    #[arg(long = "plugin")]
    pub plugins: Vec<String>,

    /// Keep every plugin shipped in the distribution
    #[arg(long)]
    pub keep_bundled_plugins: bool,

    /// Keep the shipped plugins whose file name starts with this prefix
    #[arg(long = "keep-bundled-prefix", conflicts_with = "keep_bundled_plugins")]
    pub keep_bundled_prefixes: Vec<String>,

    /// Server property, repeatable
    #[arg(short = 'D', long = "property", value_parser = parse_property)]
    pub properties: Vec<(String, String)>,

    /// Do not generate a configuration file
    #[arg(long)]
    pub empty_configuration: bool,

    /// Keep the product's default of forcing authentication
    #[arg(long)]
    pub default_force_authentication: bool,

    /// Keep the product's default admin credentials redirect
    #[arg(long)]
    pub default_admin_credentials_redirect: bool,
}

/// Configuration for the orchestrator run
#[derive(Debug, Clone)]
pub struct Config {
    pub orchestrator: OrchestratorConfig,
}

impl Config {
    /// Parse global command line arguments into configuration
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let mut orchestrator = OrchestratorConfig::new(&cli.workspace);
        if let Some(repository) = &cli.repository {
            orchestrator.repository = repository.clone();
        } else if std::env::var_os("HOME").is_none() {
            return Err(eyre!("HOME is not set, pass --repository"));
        }
        orchestrator.startup_timeout = Duration::from_secs(cli.startup_timeout_secs);
        orchestrator.stop_timeout = Duration::from_secs(cli.stop_timeout_secs);
        orchestrator.poll_interval = Duration::from_millis(cli.poll_interval_ms);
        orchestrator.java_home = cli.java_home.clone();
        orchestrator.java_executable = cli.java.clone();
        orchestrator.container_port = cli.container_port;

        Ok(Config { orchestrator })
    }
}

impl DistributionArgs {
    /// Builds the distribution request described by the arguments
    pub fn to_spec(&self) -> Result<DistributionSpec> {
        let keep_bundled_plugins = if self.keep_bundled_plugins {
            BundledPlugins::KeepAll
        } else if self.keep_bundled_prefixes.is_empty() {
            BundledPlugins::KeepNone
        } else {
            BundledPlugins::KeepPrefixed(self.keep_bundled_prefixes.clone())
        };

        Ok(DistributionSpec {
            edition: self.edition,
            version: self.version.clone(),
            archive: self.zip.clone(),
            bundled_plugins: parse_locations(&self.bundled_plugins)?,
            external_plugins: parse_locations(&self.plugins)?,
            keep_bundled_plugins,
            server_properties: self.properties.iter().cloned().collect::<BTreeMap<_, _>>(),
            database: None,
            empty_configuration: self.empty_configuration,
            default_force_authentication: self.default_force_authentication,
            default_admin_credentials_redirect: self.default_admin_credentials_redirect,
        })
    }
}

fn parse_locations(values: &[String]) -> Result<Vec<PluginLocation>> {
    values.iter().map(|value| parse_location(value)).collect()
}

/// Paths win over coordinates: anything that exists on disk is a file.
fn parse_location(value: &str) -> Result<PluginLocation> {
    let path = PathBuf::from(value);
    if path.exists() {
        return Ok(PluginLocation::File(path));
    }
    sqharness::ArtifactCoordinates::parse(value)
        .map(PluginLocation::Artifact)
        .ok_or_else(|| eyre!("plugin '{}' is neither a file nor group:artifact:version", value))
}

fn parse_property(value: &str) -> std::result::Result<(String, String), String> {
    value
        .split_once('=')
        .map(|(key, value)| (key.trim().to_string(), value.to_string()))
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| format!("expected key=value, got '{}'", value))
}
