//! Stops started servers when the orchestrator itself is asked to terminate.
//!
//! A single listener thread, started with the first hook, owns the SIGINT
//! and SIGTERM handlers for the whole process. On a signal it either hands
//! the signal to a [`SignalInterception`], or stops every registered server
//! and exits with the conventional `128 + signal` status.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::sys::wait::{waitid, Id, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use once_cell::sync::{Lazy, OnceCell};
use tokio::select;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::control::StopChannel;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Server to stop when the orchestrator terminates
#[derive(Debug, Clone)]
struct Registration {
    pid: Pid,
    channel: StopChannel,
    stop_timeout: Duration,
}

#[derive(Default)]
struct Registry {
    hooks: Mutex<HashMap<u64, Registration>>,
    interceptor: Mutex<Option<(u64, mpsc::UnboundedSender<Signal>)>>,
}

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::default);
static LISTENER: OnceCell<()> = OnceCell::new();
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Termination hook of one started server.
///
/// Dropping or deregistering the hook removes the server from the listener;
/// the listener itself stays installed and keeps exiting the process on
/// SIGINT or SIGTERM.
#[derive(Debug)]
pub struct ShutdownHook {
    id: u64,
}

impl ShutdownHook {
    /// Registers the hook, starting the signal listener on first use.
    ///
    /// # Arguments
    /// * `pid` - Leader of the server's process group
    /// * `channel` - Stop channel of the server's installation
    /// * `stop_timeout` - Time granted to a cooperative stop before the kill
    ///
    /// # Returns
    /// * `io::Result<Self>` - Fails only if the listener cannot be started
    pub fn register(pid: Pid, channel: StopChannel, stop_timeout: Duration) -> io::Result<Self> {
        ensure_listener()?;
        let id = NEXT_ID.fetch_add(1, Ordering::SeqCst);
        lock(&REGISTRY.hooks).insert(
            id,
            Registration {
                pid,
                channel,
                stop_timeout,
            },
        );
        debug!("Shutdown hook {} registered for process {}", id, pid);
        Ok(Self { id })
    }

    /// Removes the hook so that it never runs.
    pub fn deregister(self) {}
}

impl Drop for ShutdownHook {
    fn drop(&mut self) {
        if lock(&REGISTRY.hooks).remove(&self.id).is_some() {
            debug!("Shutdown hook {} deregistered", self.id);
        }
    }
}

/// Routes termination signals to the caller instead of stopping the
/// registered servers and exiting.
///
/// Only the most recently installed interception receives signals. Once it
/// is dropped the listener goes back to stopping servers and exiting.
pub struct SignalInterception {
    id: u64,
    signals: mpsc::UnboundedReceiver<Signal>,
}

impl SignalInterception {
    pub fn install() -> io::Result<Self> {
        ensure_listener()?;
        let id = NEXT_ID.fetch_add(1, Ordering::SeqCst);
        let (sender, signals) = mpsc::unbounded_channel();
        *lock(&REGISTRY.interceptor) = Some((id, sender));
        Ok(Self { id, signals })
    }

    /// Waits for the next SIGINT or SIGTERM.
    pub async fn recv(&mut self) -> Option<Signal> {
        self.signals.recv().await
    }
}

impl Drop for SignalInterception {
    fn drop(&mut self) {
        let mut interceptor = lock(&REGISTRY.interceptor);
        if interceptor.as_ref().is_some_and(|(id, _)| *id == self.id) {
            *interceptor = None;
        }
    }
}

/// Starts the listener thread once per process.
///
/// It runs its own runtime so that it outlives the runtime of whichever
/// caller registered the first hook.
fn ensure_listener() -> io::Result<()> {
    LISTENER.get_or_try_init(|| {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let (mut interrupt, mut terminate) = runtime.block_on(async {
            Ok::<_, io::Error>((
                signal(SignalKind::interrupt())?,
                signal(SignalKind::terminate())?,
            ))
        })?;

        std::thread::Builder::new()
            .name("sqharness-signals".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    loop {
                        let signal = select! {
                            _ = interrupt.recv() => Signal::SIGINT,
                            _ = terminate.recv() => Signal::SIGTERM,
                        };
                        if let Some(code) = handle_signal(signal).await {
                            info!("Exiting on {:?}", signal);
                            std::process::exit(code);
                        }
                    }
                })
            })?;
        debug!("Signal listener started");
        Ok::<(), io::Error>(())
    })?;
    Ok(())
}

/// Returns the exit code, or `None` when the signal went to an interception.
async fn handle_signal(signal: Signal) -> Option<i32> {
    if let Some((_, sender)) = lock(&REGISTRY.interceptor).as_ref() {
        if sender.send(signal).is_ok() {
            debug!("{:?} handed to the interception", signal);
            return None;
        }
    }
    run_hooks(signal).await;
    Some(128 + signal as i32)
}

/// Stops every registered server concurrently and clears the registry.
async fn run_hooks(signal: Signal) {
    let registrations: Vec<Registration> = lock(&REGISTRY.hooks).drain().map(|(_, r)| r).collect();
    if registrations.is_empty() {
        return;
    }
    warn!("Received {:?}, stopping {} server(s)", signal, registrations.len());

    let stops: Vec<_> = registrations
        .into_iter()
        .map(|r| tokio::spawn(async move { stop_process(r.pid, &r.channel, r.stop_timeout).await }))
        .collect();
    for stop in stops {
        if let Err(e) = stop.await {
            error!("Shutdown hook failed: {}", e);
        }
    }
}

/// Cooperative stop, bounded wait, then SIGKILL to the process group.
async fn stop_process(pid: Pid, channel: &StopChannel, stop_timeout: Duration) {
    if let Err(e) = channel.request_stop() {
        warn!("Failed to ask server process {} to stop: {}", pid, e);
    }
    let deadline = Instant::now() + stop_timeout;
    while Instant::now() < deadline {
        if has_exited(pid) {
            info!("Server process {} stopped", pid);
            return;
        }
        sleep(EXIT_POLL_INTERVAL).await;
    }
    warn!("Server process {} still running after {:?}, killing it", pid, stop_timeout);
    if let Err(e) = killpg(pid, Signal::SIGKILL) {
        error!("Failed to kill process group {}: {}", pid, e);
    }
}

/// Checks a child without reaping it, so its owner still sees the status.
fn has_exited(pid: Pid) -> bool {
    let flags = WaitPidFlag::WEXITED | WaitPidFlag::WNOHANG | WaitPidFlag::WNOWAIT;
    match waitid(Id::Pid(pid), flags) {
        Ok(WaitStatus::StillAlive) => false,
        Ok(_) => true,
        // ECHILD: already reaped by its owner
        Err(_) => true,
    }
}
