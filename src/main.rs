type Result<T> = color_eyre::eyre::Result<T>;

mod cli;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::{Cli, Command, Config};
use sqharness::{Orchestrator, ServerHandle, SignalInterception};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_cli(&cli)?;
    info!("Using artifact repository {:?}", config.orchestrator.repository);

    let mut orchestrator = Orchestrator::from_config(config.orchestrator);

    match &cli.command {
        Command::Install(args) => {
            let handle = orchestrator.resolve_and_install(&args.to_spec()?)?;
            log_handle(&handle);
        }
        Command::Run(args) => {
            let handle = orchestrator.resolve_and_install(&args.to_spec()?)?;
            log_handle(&handle);
            run_until_interrupted(&mut orchestrator, &handle).await?;
        }
    }

    info!("sqharness exiting");
    Ok(())
}

fn log_handle(handle: &ServerHandle) {
    info!(
        "Installed {} {} in {:?}, url {}, search port {}",
        handle.edition, handle.version, handle.home, handle.base_url, handle.search_port
    );
}

/// Starts the server and keeps it up until Ctrl-C or until it dies.
///
/// Termination signals are intercepted for the whole run, so the server is
/// stopped here and the process exits normally instead of through the
/// shutdown hook.
async fn run_until_interrupted(orchestrator: &mut Orchestrator, handle: &ServerHandle) -> Result<()> {
    let mut signals = SignalInterception::install()?;

    let started = tokio::select! {
        result = orchestrator.start(handle) => Some(result),
        signal = signals.recv() => {
            info!("Received {:?} during startup, stopping server", signal);
            None
        }
    };
    match started {
        Some(result) => result?,
        None => {
            orchestrator.stop(handle).await;
            return Ok(());
        }
    }
    info!("Server ready at {}, press Ctrl-C to stop", handle.base_url);

    let mut liveness = tokio::time::interval(std::time::Duration::from_secs(1));
    loop {
        tokio::select! {
            signal = signals.recv() => {
                info!("Received {:?}, stopping server", signal);
                break;
            }
            _ = liveness.tick() => {
                if !orchestrator.is_alive(handle) {
                    error!("Server process died");
                    break;
                }
            }
        }
    }

    // further signals stay intercepted until the stop completes
    orchestrator.stop(handle).await;
    drop(signals);
    Ok(())
}
