use crate::infrastructure::{assert_duration_between, assert_stop_requested, DistributionHarness, StubBehavior};
use anyhow::Result;
use sqharness::{
    DistributionSpec, Edition, Error, LifecycleState, ProcessController, StartupError, StartupLogWatcher,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::info;

const VERSION: &str = "9.9.0.65466";

fn community(harness: &DistributionHarness) -> DistributionSpec {
    DistributionSpec::with_archive(Edition::Community, harness.archive())
}

/// Test a full install, start and cooperative stop
#[tokio::test]
async fn test_start_and_stop_community() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let harness = DistributionHarness::new(VERSION, StubBehavior::Ready)?;
    let mut orchestrator = harness.orchestrator();
    let handle = orchestrator.resolve_and_install(&community(&harness))?;

    orchestrator.start(&handle).await?;
    assert_eq!(orchestrator.state(&handle), Some(LifecycleState::Started));
    assert!(orchestrator.is_alive(&handle));

    // The stub records its arguments in its working directory
    let args = std::fs::read_to_string(handle.distribution_dir.join("launch.args"))?;
    let args: Vec<&str> = args.lines().collect();
    assert_eq!(&args[..4], ["-Xms8m", "-Xmx32m", "-Djava.awt.headless=true", "-jar"]);
    assert!(args[4].ends_with(&format!("lib/sonar-application-{}.jar", VERSION)));

    let stop_start = Instant::now();
    orchestrator.stop(&handle).await;
    info!("Cooperative stop took {:?}", stop_start.elapsed());

    assert_eq!(orchestrator.state(&handle), Some(LifecycleState::Stopped));
    assert!(!orchestrator.is_alive(&handle));
    assert_stop_requested(&handle.distribution_dir);
    assert!(
        stop_start.elapsed() < Duration::from_secs(5),
        "cooperative stop should not wait for the stop timeout"
    );

    // A second stop has nothing left to do and must not ask again
    let marker = handle.distribution_dir.join("temp/orchestrator.stop");
    std::fs::remove_file(&marker)?;
    orchestrator.stop(&handle).await;
    assert_eq!(orchestrator.state(&handle), Some(LifecycleState::Stopped));
    assert!(!marker.exists(), "second stop wrote the stop marker again");

    Ok(())
}

/// Test that a started server cannot be started again
#[tokio::test]
async fn test_start_twice_is_illegal() -> Result<()> {
    let harness = DistributionHarness::new(VERSION, StubBehavior::Ready)?;
    let mut orchestrator = harness.orchestrator();
    let handle = orchestrator.resolve_and_install(&community(&harness))?;

    orchestrator.start(&handle).await?;
    let result = orchestrator.start(&handle).await;
    assert!(
        matches!(result, Err(Error::Startup(StartupError::IllegalState(LifecycleState::Started)))),
        "expected IllegalState, got {:?}",
        result
    );

    orchestrator.stop_all().await;
    assert_eq!(orchestrator.state(&handle), Some(LifecycleState::Stopped));

    Ok(())
}

/// Test that a server that never reports readiness is stopped and marked failed
#[tokio::test]
async fn test_startup_timeout() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let harness = DistributionHarness::new(VERSION, StubBehavior::Silent)?;
    let mut config = harness.config();
    config.startup_timeout = Duration::from_secs(1);
    let mut orchestrator = sqharness::Orchestrator::from_config(config);
    let handle = orchestrator.resolve_and_install(&community(&harness))?;

    let start = Instant::now();
    let result = orchestrator.start(&handle).await;

    assert!(
        matches!(result, Err(Error::Startup(StartupError::Timeout { .. }))),
        "expected Timeout, got {:?}",
        result
    );
    assert_duration_between(start.elapsed(), Duration::from_secs(1), Duration::from_secs(8), "startup");
    assert_eq!(orchestrator.state(&handle), Some(LifecycleState::Failed));
    assert!(!orchestrator.is_alive(&handle));
    assert_stop_requested(&handle.distribution_dir);

    Ok(())
}

/// Test that a server dying during startup is reported with its status
#[tokio::test]
async fn test_exit_before_ready() -> Result<()> {
    let harness = DistributionHarness::new(VERSION, StubBehavior::Crash)?;
    let mut orchestrator = harness.orchestrator();
    let handle = orchestrator.resolve_and_install(&community(&harness))?;

    let result = orchestrator.start(&handle).await;
    match result {
        Err(Error::Startup(StartupError::ExitedBeforeReady { status })) => {
            assert_eq!(status.and_then(|s| s.code()), Some(3));
        }
        other => panic!("expected ExitedBeforeReady, got {:?}", other),
    }
    assert_eq!(orchestrator.state(&handle), Some(LifecycleState::Failed));

    // Stopping a failed server is a no-op
    orchestrator.stop(&handle).await;
    assert_eq!(orchestrator.state(&handle), Some(LifecycleState::Failed));

    Ok(())
}

/// Test that a server ignoring the stop request is killed after the stop timeout
#[tokio::test]
async fn test_forced_kill_after_stop_timeout() -> Result<()> {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let harness = DistributionHarness::new(VERSION, StubBehavior::Stubborn)?;
    let mut config = harness.config();
    config.stop_timeout = Duration::from_secs(1);
    let mut orchestrator = sqharness::Orchestrator::from_config(config);
    let handle = orchestrator.resolve_and_install(&community(&harness))?;

    orchestrator.start(&handle).await?;
    assert!(orchestrator.is_alive(&handle));

    let stop_start = Instant::now();
    orchestrator.stop(&handle).await;

    assert_duration_between(stop_start.elapsed(), Duration::from_secs(1), Duration::from_secs(8), "forced stop");
    assert_eq!(orchestrator.state(&handle), Some(LifecycleState::Stopped));
    assert!(!orchestrator.is_alive(&handle));
    assert_stop_requested(&handle.distribution_dir);

    Ok(())
}

/// Test readiness decided by a caller-provided watcher
#[tokio::test]
async fn test_custom_startup_watcher() -> Result<()> {
    let harness = DistributionHarness::new(VERSION, StubBehavior::Ready)?;
    let mut orchestrator = harness.orchestrator();
    let handle = orchestrator.resolve_and_install(&community(&harness))?;

    let watcher: Arc<dyn StartupLogWatcher> = Arc::new(|line: &str| line.contains("Process[es] is up"));
    orchestrator.start_with_watcher(&handle, watcher).await?;
    assert_eq!(orchestrator.state(&handle), Some(LifecycleState::Started));

    orchestrator.stop(&handle).await;
    assert_eq!(orchestrator.state(&handle), Some(LifecycleState::Stopped));

    Ok(())
}

/// Test that abandoning the readiness wait leaves the server running
#[tokio::test]
async fn test_cancelled_startup_wait() -> Result<()> {
    let harness = DistributionHarness::new(VERSION, StubBehavior::Silent)?;
    let handle = harness
        .orchestrator()
        .resolve_and_install(&community(&harness))?;
    let mut controller = ProcessController::new(handle, harness.config().controller_config());

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    controller.start_cancellable(&cancel).await?;
    assert_eq!(controller.state(), LifecycleState::Starting);
    assert!(controller.is_alive());

    controller.stop().await;
    assert_eq!(controller.state(), LifecycleState::Stopped);
    assert!(!controller.is_alive());
    assert_eq!(controller.exit_status().and_then(|s| s.code()), Some(0));

    Ok(())
}
