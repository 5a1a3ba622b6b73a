use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use std::path::Path;

use tracing::{debug, info};

use crate::distribution::DistributionSpec;
use crate::error::InstallationError;
use crate::port_prober::PortProber;

pub const JDBC_URL: &str = "sonar.jdbc.url";
pub const JDBC_USERNAME: &str = "sonar.jdbc.username";
pub const JDBC_PASSWORD: &str = "sonar.jdbc.password";
pub const LOG_CONSOLE: &str = "sonar.log.console";
pub const TELEMETRY_URL: &str = "sonar.telemetry.url";
pub const AI_SUGGESTIONS_URL: &str = "sonar.ai.suggestions.url";
pub const WEB_HOST: &str = "sonar.web.host";
pub const WEB_PORT: &str = "sonar.web.port";
pub const WEB_CONTEXT: &str = "sonar.web.context";
pub const WEB_JAVA_OPTS: &str = "sonar.web.javaAdditionalOpts";
pub const CE_JAVA_OPTS: &str = "sonar.ce.javaAdditionalOpts";
pub const SEARCH_HOST: &str = "sonar.search.host";
pub const SEARCH_PORT: &str = "sonar.search.port";
pub const SEARCH_HTTP_PORT: &str = "sonar.search.httpPort";
pub const SEARCH_TRANSPORT_PORT: &str = "sonar.search.transportPort";
pub const CLUSTER_ENABLED: &str = "sonar.cluster.enabled";
pub const CLUSTER_NODE_TYPE: &str = "sonar.cluster.node.type";
pub const CLUSTER_NODE_NAME: &str = "sonar.cluster.node.name";
pub const CLUSTER_SEARCH_HOST: &str = "sonar.cluster.node.search.host";
pub const CLUSTER_SEARCH_PORT: &str = "sonar.cluster.node.search.port";
pub const CLUSTER_ES_HOST: &str = "sonar.cluster.node.es.host";
pub const CLUSTER_ES_PORT: &str = "sonar.cluster.node.es.port";
pub const FORCE_AUTHENTICATION: &str = "sonar.forceAuthentication";
pub const FORCE_ADMIN_REDIRECT: &str = "sonar.forceRedirectOnDefaultAdminCredentials";

pub const DEFAULT_WEB_PORT: u16 = 9000;
pub const DEFAULT_SEARCH_PORT: u16 = 9001;

const TELEMETRY_PRODUCTION_URL: &str = "https://telemetry.sonarsource.com/sonarqube";
const AI_SUGGESTIONS_PRODUCTION_URL: &str = "https://api.sonarqube.io";
const FORBIDDEN_STAGING_HOSTS: [&str; 2] = ["telemetry-staging.sonarsource.com", "staging.sonarqube.io"];

const LOOPBACK_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Server configuration, written as a `.properties` file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerProperties(BTreeMap<String, String>);

impl ServerProperties {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Sets `key` unless the caller already configured it.
    pub fn set_if_absent(&mut self, key: &str, value: impl Into<String>) {
        self.0.entry(key.to_string()).or_insert_with(|| value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    /// Renders the properties in `java.util.Properties` text format.
    pub fn render(&self) -> String {
        let mut out = format!(
            "# Generated by sqharness on {}\n",
            chrono::Local::now().to_rfc2822()
        );
        for (key, value) in &self.0 {
            let _ = writeln!(out, "{}={}", escape(key, true), escape(value, false));
        }
        out
    }

    pub fn write_to(&self, path: &Path) -> Result<(), InstallationError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(InstallationError::io(parent))?;
        }
        fs::write(path, self.render()).map_err(InstallationError::io(path))
    }
}

impl From<BTreeMap<String, String>> for ServerProperties {
    fn from(map: BTreeMap<String, String>) -> Self {
        Self(map)
    }
}

fn escape(text: &str, is_key: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for (i, c) in text.chars().enumerate() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            ' ' if is_key || i == 0 => out.push_str("\\ "),
            '=' | ':' | '#' | '!' if is_key => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

/// Network coordinates decided while configuring a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSettings {
    pub web_host: String,
    pub web_address: IpAddr,
    pub web_port: u16,
    pub context: String,
    pub search_port: u16,
}

impl NetworkSettings {
    /// Reads the settings without allocating anything, falling back to the
    /// server's built-in defaults.
    pub fn from_properties(properties: &ServerProperties) -> Result<Self, InstallationError> {
        let web_host = properties.get(WEB_HOST).unwrap_or("127.0.0.1").to_string();
        let web_address = resolve_host(&web_host)?;
        let web_port = match properties.get(WEB_PORT) {
            Some(_) => parse_port(properties, WEB_PORT)?,
            None => DEFAULT_WEB_PORT,
        };
        let search_key = if is_search_node(properties) {
            CLUSTER_SEARCH_PORT
        } else {
            SEARCH_PORT
        };
        let search_port = match properties.get(search_key) {
            Some(_) => parse_port(properties, search_key)?,
            None => DEFAULT_SEARCH_PORT,
        };
        Ok(Self {
            web_host,
            web_address,
            web_port,
            context: normalize_context(properties.get(WEB_CONTEXT).unwrap_or_default()),
            search_port,
        })
    }

    /// `http://host:port/context`, with the wildcard address replaced by
    /// `localhost` and IPv6 literals bracketed.
    pub fn base_url(&self) -> String {
        let host = if self.web_address.is_unspecified() {
            "localhost".to_string()
        } else {
            let bare = self.web_host.trim_start_matches('[').trim_end_matches(']');
            match bare.parse::<IpAddr>() {
                Ok(IpAddr::V6(_)) => format!("[{}]", bare),
                _ => bare.to_string(),
            }
        };
        format!("http://{}:{}{}", host, self.web_port, self.context)
    }
}

/// Fills in everything a test server needs that the caller left out.
pub struct PropertiesSynthesizer<'a> {
    pub prober: &'a dyn PortProber,
    pub container_port: Option<u16>,
}

impl PropertiesSynthesizer<'_> {
    /// Completes `properties` in place. Values the caller set always win.
    pub fn synthesize(
        &self,
        spec: &DistributionSpec,
        properties: &mut ServerProperties,
    ) -> Result<NetworkSettings, InstallationError> {
        check_endpoints(properties)?;
        // fail before any port gets allocated
        check_cluster_hosts(properties)?;

        if let Some(database) = &spec.database {
            properties.set_if_absent(JDBC_URL, database.url.as_str());
            if let Some(username) = &database.username {
                properties.set_if_absent(JDBC_USERNAME, username.as_str());
            }
            if let Some(password) = &database.password {
                properties.set_if_absent(JDBC_PASSWORD, password.as_str());
            }
            for (key, value) in &database.properties {
                properties.set_if_absent(key, value.as_str());
            }
        }
        properties.set_if_absent(LOG_CONSOLE, "true");
        properties.set_if_absent(TELEMETRY_URL, TELEMETRY_PRODUCTION_URL);
        properties.set_if_absent(AI_SUGGESTIONS_URL, AI_SUGGESTIONS_PRODUCTION_URL);

        properties.set_if_absent(WEB_HOST, LOOPBACK_ADDRESS.to_string());
        let web_address = resolve_host(properties.get(WEB_HOST).unwrap_or_default())?;
        if properties.get(WEB_PORT).is_none() {
            let port = match self.container_port {
                Some(port) => port,
                None => self.probe(web_address)?,
            };
            properties.set(WEB_PORT, port.to_string());
        }

        if is_search_node(properties) {
            self.allocate_port(properties, CLUSTER_SEARCH_HOST, CLUSTER_SEARCH_PORT)?;
            self.allocate_port(properties, CLUSTER_ES_HOST, CLUSTER_ES_PORT)?;
        } else {
            properties.set_if_absent(SEARCH_HOST, LOOPBACK_ADDRESS.to_string());
            for key in [SEARCH_PORT, SEARCH_HTTP_PORT, SEARCH_TRANSPORT_PORT] {
                self.allocate_port(properties, SEARCH_HOST, key)?;
            }
        }

        for key in [WEB_JAVA_OPTS, CE_JAVA_OPTS] {
            complete_java_options(properties, key);
        }

        if !spec.default_force_authentication {
            properties.set_if_absent(FORCE_AUTHENTICATION, "false");
        }
        if !spec.default_admin_credentials_redirect {
            properties.set_if_absent(FORCE_ADMIN_REDIRECT, "false");
        }

        let settings = NetworkSettings::from_properties(properties)?;
        info!(
            "Configured web server on {}:{} and search on port {}",
            settings.web_host, settings.web_port, settings.search_port
        );
        Ok(settings)
    }

    fn allocate_port(
        &self,
        properties: &mut ServerProperties,
        host_key: &str,
        port_key: &str,
    ) -> Result<(), InstallationError> {
        if properties.get(port_key).is_some() {
            return Ok(());
        }
        let host = properties.get(host_key).unwrap_or("127.0.0.1");
        let port = self.probe(resolve_host(host)?)?;
        debug!("Allocated {}={}", port_key, port);
        properties.set(port_key, port.to_string());
        Ok(())
    }

    fn probe(&self, address: IpAddr) -> Result<u16, InstallationError> {
        self.prober
            .next_available_port(address)
            .map_err(|source| InstallationError::PortProbe {
                host: address.to_string(),
                source,
            })
    }
}

fn check_endpoints(properties: &ServerProperties) -> Result<(), InstallationError> {
    for key in [TELEMETRY_URL, AI_SUGGESTIONS_URL] {
        if let Some(value) = properties.get(key) {
            if FORBIDDEN_STAGING_HOSTS.iter().any(|host| value.contains(host)) {
                return Err(InstallationError::ForbiddenProperty {
                    key: key.to_string(),
                    value: value.to_string(),
                });
            }
        }
    }
    Ok(())
}

fn check_cluster_hosts(properties: &ServerProperties) -> Result<(), InstallationError> {
    if !is_search_node(properties) {
        return Ok(());
    }
    for key in [CLUSTER_SEARCH_HOST, CLUSTER_ES_HOST] {
        if properties.get(key).map_or(true, str::is_empty) {
            return Err(InstallationError::MissingClusterHost {
                key: key.to_string(),
            });
        }
    }
    Ok(())
}

fn is_search_node(properties: &ServerProperties) -> bool {
    properties.get(CLUSTER_ENABLED) == Some("true")
        && properties.get(CLUSTER_NODE_TYPE) == Some("search")
}

fn platform_java_options() -> &'static [&'static str] {
    if cfg!(target_os = "linux") {
        &["-Djava.security.egd=file:/dev/./urandom"]
    } else if cfg!(target_os = "macos") {
        &["-Djava.net.preferIPv4Stack=true"]
    } else {
        &[]
    }
}

fn complete_java_options(properties: &mut ServerProperties, key: &str) {
    let mut options: Vec<String> = properties
        .get(key)
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect();
    let before = options.len();
    for option in platform_java_options() {
        if !options.iter().any(|existing| existing == option) {
            options.push(option.to_string());
        }
    }
    if options.len() != before {
        properties.set(key, options.join(" "));
    }
}

fn parse_port(properties: &ServerProperties, key: &str) -> Result<u16, InstallationError> {
    let value = properties.get(key).unwrap_or_default();
    value
        .trim()
        .parse::<u16>()
        .map_err(|_| InstallationError::InvalidProperty {
            key: key.to_string(),
            value: value.to_string(),
        })
}

/// Resolves a host property to an address, accepting bracketed IPv6 literals.
pub fn resolve_host(host: &str) -> Result<IpAddr, InstallationError> {
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(address) = bare.parse::<IpAddr>() {
        return Ok(address);
    }
    (bare, 0)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addresses| addresses.next())
        .map(|address| address.ip())
        .ok_or_else(|| InstallationError::UnresolvableHost(host.to_string()))
}

fn normalize_context(context: &str) -> String {
    let trimmed = context.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}
