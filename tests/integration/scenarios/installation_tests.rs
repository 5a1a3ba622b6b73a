use crate::infrastructure::distribution_harness::BUNDLED_PLUGINS;
use crate::infrastructure::{file_names, read_properties, CountingProber, DistributionHarness, StubBehavior};
use anyhow::Result;
use sqharness::{
    AliasKind, BundledPlugins, DistributionSpec, Edition, Error, InstallationError, PluginLocation,
    ResolutionError, Version, VersionAliasResolver,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

const VERSION: &str = "9.9.0.65466";

/// Keys whose values come from port allocation
const PORT_KEYS: [&str; 6] = [
    "sonar.web.port",
    "sonar.search.port",
    "sonar.search.httpPort",
    "sonar.search.transportPort",
    "sonar.cluster.node.search.port",
    "sonar.cluster.node.es.port",
];

/// Alias resolver that only counts how often it was consulted
#[derive(Default)]
struct CountingAliases {
    calls: AtomicUsize,
}

impl VersionAliasResolver for CountingAliases {
    fn resolve_version(
        &self,
        _group_id: &str,
        _artifact_id: &str,
        _alias: AliasKind,
        _series: Option<&Version>,
    ) -> Option<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        None
    }
}

/// Test that every installation lands in its own directory
#[tokio::test]
async fn test_installations_get_distinct_homes() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let harness = DistributionHarness::new(VERSION, StubBehavior::Ready)?;
    let orchestrator = harness.orchestrator();
    let spec = DistributionSpec::with_archive(Edition::Community, harness.archive());

    let first = orchestrator.resolve_and_install(&spec)?;
    let second = orchestrator.resolve_and_install(&spec)?;
    debug!("Installed in {:?} and {:?}", first.home, second.home);

    assert_ne!(first.home, second.home);
    for handle in [&first, &second] {
        assert!(handle.home.starts_with(harness.workspace()));
        let name = handle.home.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(&format!("community-{}-", VERSION)), "unexpected home {}", name);
        assert_eq!(handle.distribution_dir, handle.home.join(format!("sonarqube-{}", VERSION)));
        assert!(handle.lib_dir().join(format!("sonar-application-{}.jar", VERSION)).is_file());
        assert_eq!(handle.version, Version::parse(VERSION)?);
    }

    // Same request, same configuration: only the allocated ports may differ
    let first_conf = read_properties(&first.distribution_dir.join("conf/sonar.properties"));
    let second_conf = read_properties(&second.distribution_dir.join("conf/sonar.properties"));
    let mut first_keys: Vec<&String> = first_conf.keys().collect();
    let mut second_keys: Vec<&String> = second_conf.keys().collect();
    first_keys.sort();
    second_keys.sort();
    assert_eq!(first_keys, second_keys);
    assert!(first_conf.contains_key(PORT_KEYS[0]), "web port should be written");
    for (key, value) in &first_conf {
        if !PORT_KEYS.contains(&key.as_str()) {
            assert_eq!(Some(value), second_conf.get(key), "installations disagree on {}", key);
        }
    }

    Ok(())
}

/// Test that shipped plugins are filtered and requested plugins copied
#[tokio::test]
async fn test_bundled_plugins_removed_and_plugins_copied() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let harness = DistributionHarness::new(VERSION, StubBehavior::Ready)?;
    let bundled = harness.plugin_file("sonar-custom-plugin-1.0.jar")?;
    let external = harness.plugin_file("sonar-external-plugin-2.0.jar")?;
    let spec = DistributionSpec::with_archive(Edition::Community, harness.archive())
        .keep_bundled_plugins(BundledPlugins::KeepPrefixed(vec!["sonar-java".to_string()]))
        .add_bundled_plugin(PluginLocation::File(bundled))
        .add_external_plugin(PluginLocation::File(external));

    let handle = harness.orchestrator().resolve_and_install(&spec)?;

    assert_eq!(
        file_names(&handle.distribution_dir.join("lib/extensions")),
        vec!["sonar-custom-plugin-1.0.jar".to_string(), BUNDLED_PLUGINS[0].to_string()]
    );
    assert_eq!(
        file_names(&handle.distribution_dir.join("extensions/downloads")),
        vec!["sonar-external-plugin-2.0.jar".to_string()]
    );

    Ok(())
}

/// Test that a plugin nobody can find aborts the installation
#[tokio::test]
async fn test_missing_plugin_fails_installation() -> Result<()> {
    let harness = DistributionHarness::new(VERSION, StubBehavior::Ready)?;
    let spec = DistributionSpec::with_archive(Edition::Community, harness.archive())
        .add_external_plugin(PluginLocation::File(harness.temp_path().join("absent.jar")));

    let result = harness.orchestrator().resolve_and_install(&spec);
    assert!(
        matches!(result, Err(Error::Installation(InstallationError::PluginNotFound(_)))),
        "expected PluginNotFound, got {:?}",
        result
    );

    Ok(())
}

/// Test the configuration generated for a standalone server
#[tokio::test]
async fn test_generated_configuration() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let harness = DistributionHarness::new(VERSION, StubBehavior::Ready)?;
    let prober = Arc::new(CountingProber::starting_at(31000));
    let orchestrator =
        harness.orchestrator_with(harness.config(), Arc::new(CountingAliases::default()), prober.clone());
    let spec = DistributionSpec::with_archive(Edition::Community, harness.archive())
        .set_property("sonar.ce.workerCount", "2");

    let handle = orchestrator.resolve_and_install(&spec)?;
    let properties = read_properties(&handle.conf_file());

    assert_eq!(prober.probes(), 4, "web port plus three search ports");
    assert_eq!(handle.base_url, "http://127.0.0.1:31000");
    assert_eq!(handle.search_port, 31001);
    assert_eq!(properties["sonar.web.host"], "127.0.0.1");
    assert_eq!(properties["sonar.web.port"], "31000");
    assert_eq!(properties["sonar.search.port"], "31001");
    assert_eq!(properties["sonar.search.httpPort"], "31002");
    assert_eq!(properties["sonar.search.transportPort"], "31003");
    assert_eq!(properties["sonar.log.console"], "true");
    assert_eq!(properties["sonar.forceAuthentication"], "false");
    assert_eq!(properties["sonar.forceRedirectOnDefaultAdminCredentials"], "false");
    assert_eq!(properties["sonar.ce.workerCount"], "2");
    assert!(!properties["sonar.telemetry.url"].contains("staging"));

    Ok(())
}

/// Test that the wildcard address is published as localhost
#[tokio::test]
async fn test_wildcard_host_uses_localhost() -> Result<()> {
    let harness = DistributionHarness::new(VERSION, StubBehavior::Ready)?;
    let spec = DistributionSpec::with_archive(Edition::Community, harness.archive())
        .set_property("sonar.web.host", "0.0.0.0")
        .set_property("sonar.web.port", "9500")
        .set_property("sonar.web.context", "sonar/");

    let handle = harness.orchestrator().resolve_and_install(&spec)?;
    assert_eq!(handle.base_url, "http://localhost:9500/sonar");

    Ok(())
}

/// Test that a port imposed by the container replaces the web port probe
#[tokio::test]
async fn test_container_port_used_for_web() -> Result<()> {
    let harness = DistributionHarness::new(VERSION, StubBehavior::Ready)?;
    let prober = Arc::new(CountingProber::starting_at(32000));
    let mut config = harness.config();
    config.container_port = Some(8080);
    let orchestrator = harness.orchestrator_with(config, Arc::new(CountingAliases::default()), prober.clone());

    let handle = orchestrator
        .resolve_and_install(&DistributionSpec::with_archive(Edition::Community, harness.archive()))?;

    assert_eq!(handle.base_url, "http://127.0.0.1:8080");
    assert_eq!(prober.probes(), 3);

    Ok(())
}

/// Test that a search node without hosts fails before any port is probed
#[tokio::test]
async fn test_cluster_search_node_requires_hosts() -> Result<()> {
    let harness = DistributionHarness::new(VERSION, StubBehavior::Ready)?;
    let prober = Arc::new(CountingProber::starting_at(33000));
    let orchestrator =
        harness.orchestrator_with(harness.config(), Arc::new(CountingAliases::default()), prober.clone());
    let spec = DistributionSpec::with_archive(Edition::Datacenter, harness.archive())
        .set_property("sonar.cluster.enabled", "true")
        .set_property("sonar.cluster.node.type", "search");

    let result = orchestrator.resolve_and_install(&spec);
    assert!(
        matches!(result, Err(Error::Installation(InstallationError::MissingClusterHost { .. }))),
        "expected MissingClusterHost, got {:?}",
        result
    );
    assert_eq!(prober.probes(), 0);

    Ok(())
}

/// Test that a search node only allocates its cluster ports
#[tokio::test]
async fn test_cluster_search_node_ports() -> Result<()> {
    let harness = DistributionHarness::new(VERSION, StubBehavior::Ready)?;
    let prober = Arc::new(CountingProber::starting_at(34000));
    let orchestrator =
        harness.orchestrator_with(harness.config(), Arc::new(CountingAliases::default()), prober.clone());
    let spec = DistributionSpec::with_archive(Edition::Datacenter, harness.archive())
        .set_property("sonar.cluster.enabled", "true")
        .set_property("sonar.cluster.node.type", "search")
        .set_property("sonar.cluster.node.name", "search-1")
        .set_property("sonar.cluster.node.search.host", "127.0.0.1")
        .set_property("sonar.cluster.node.es.host", "127.0.0.1");

    let handle = orchestrator.resolve_and_install(&spec)?;
    let properties = read_properties(&handle.conf_file());

    assert_eq!(prober.probes(), 3, "web port plus two cluster ports");
    assert_eq!(properties["sonar.cluster.node.search.port"], "34001");
    assert_eq!(properties["sonar.cluster.node.es.port"], "34002");
    assert!(!properties.contains_key("sonar.search.port"));
    assert_eq!(handle.search_port, 34001);
    assert_eq!(handle.cluster_node_name.as_deref(), Some("search-1"));

    Ok(())
}

/// Test that an explicit archive never consults the alias resolver
#[tokio::test]
async fn test_explicit_archive_skips_alias_resolution() -> Result<()> {
    let harness = DistributionHarness::new(VERSION, StubBehavior::Ready)?;
    let aliases = Arc::new(CountingAliases::default());
    let orchestrator = harness.orchestrator_with(
        harness.config(),
        aliases.clone(),
        Arc::new(CountingProber::starting_at(35000)),
    );
    let mut spec = DistributionSpec::with_archive(Edition::Developer, harness.archive());
    spec.version = Some("LATEST_RELEASE".to_string());

    let handle = orchestrator.resolve_and_install(&spec)?;
    assert_eq!(aliases.calls.load(Ordering::SeqCst), 0);
    assert_eq!(handle.edition, Edition::Developer);
    assert_eq!(handle.version.to_string(), VERSION);

    Ok(())
}

/// Test that an alias resolves against the versions of the local repository
#[tokio::test]
async fn test_alias_resolved_from_local_repository() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let harness = DistributionHarness::new(VERSION, StubBehavior::Ready)?;
    for version in ["9.9.0.65466", "9.9.1.69595", "9.9.2.77730-RC1", "10.0.0.68432"] {
        harness.publish("org.sonarsource.sonarqube", "sonar-application", version)?;
    }
    let orchestrator = harness.orchestrator();

    let handle = orchestrator
        .resolve_and_install(&DistributionSpec::with_version(Edition::Community, "LATEST_RELEASE[9.9]"))?;
    assert_eq!(handle.version.to_string(), "9.9.1.69595");
    assert!(handle.lib_dir().join("sonar-application-9.9.1.69595.jar").is_file());

    let handle = orchestrator
        .resolve_and_install(&DistributionSpec::with_version(Edition::Community, "LATEST_RELEASE"))?;
    assert_eq!(handle.version.to_string(), "10.0.0.68432");

    Ok(())
}

/// Test that unresolvable requests fail without installing anything
#[tokio::test]
async fn test_resolution_failures() -> Result<()> {
    let harness = DistributionHarness::new(VERSION, StubBehavior::Ready)?;
    let orchestrator = harness.orchestrator();

    let result = orchestrator.resolve_and_install(&DistributionSpec::with_archive(
        Edition::Community,
        harness.temp_path().join("sonarqube-1.0.zip"),
    ));
    assert!(matches!(result, Err(Error::Resolution(ResolutionError::ArchiveNotFound(_)))));

    let result = orchestrator.resolve_and_install(&DistributionSpec::with_version(Edition::Community, "9.9"));
    assert!(matches!(result, Err(Error::Resolution(ResolutionError::ArtifactNotFound(_)))));

    let result = orchestrator
        .resolve_and_install(&DistributionSpec::with_version(Edition::Community, "LTS"));
    assert!(matches!(result, Err(Error::Resolution(ResolutionError::UnsupportedAlias(_)))));

    let result = orchestrator.resolve_and_install(&DistributionSpec::default());
    assert!(matches!(result, Err(Error::Resolution(ResolutionError::MissingVersion))));

    assert!(file_names(&harness.workspace()).is_empty());

    Ok(())
}

/// Test that an empty configuration leaves the archive's file untouched
#[tokio::test]
async fn test_empty_configuration_keeps_defaults() -> Result<()> {
    let harness = DistributionHarness::new(VERSION, StubBehavior::Ready)?;
    let mut spec = DistributionSpec::with_archive(Edition::Community, harness.archive());
    spec.empty_configuration = true;

    let handle = harness.orchestrator().resolve_and_install(&spec)?;

    assert_eq!(std::fs::read_to_string(handle.conf_file())?, "# distribution defaults\n");
    assert_eq!(handle.base_url, "http://127.0.0.1:9000");
    assert_eq!(handle.search_port, 9001);

    Ok(())
}
