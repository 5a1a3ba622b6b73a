use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::select;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::control::StopChannel;
use crate::environment::Environment;
use crate::error::StartupError;
use crate::log_watcher::{DefaultStartupLogWatcher, StartupLogWatcher};
use crate::server::ServerHandle;
use crate::shutdown_hook::ShutdownHook;
use crate::version::Version;

const APPLICATION_ARCHIVE_PREFIX: &str = "sonar-application-";
const APPLICATION_ARCHIVE_SUFFIX: &str = ".jar";
const BASELINE_JVM_OPTIONS: [&str; 3] = ["-Xms8m", "-Xmx32m", "-Djava.awt.headless=true"];
/// How long the output reader may lag behind the process exit.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Configuration for process supervision behavior
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Maximum time for the server to report readiness
    pub startup_timeout: Duration,
    /// Maximum time for a cooperative stop before killing the server
    pub stop_timeout: Duration,
    /// Interval between readiness checks
    pub poll_interval: Duration,
    /// Runtime executable, takes precedence over `java_home`
    pub java_executable: Option<PathBuf>,
    /// Runtime installation whose `bin/java` launches the server
    pub java_home: Option<PathBuf>,
    /// Oldest server version that can be launched
    pub minimum_version: Version,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_secs(600),
            stop_timeout: Duration::from_secs(300),
            poll_interval: Duration::from_millis(100),
            java_executable: None,
            java_home: None,
            minimum_version: Version::create(7, 9),
        }
    }
}

/// Lifecycle of a supervised server process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Nothing launched yet
    NotStarted,
    /// Launched, waiting for the readiness line
    Starting,
    /// Ready to serve requests
    Started,
    /// Stop requested, waiting for exit
    Stopping,
    /// Exited after a stop
    Stopped,
    /// Exited or timed out before becoming ready
    Failed,
}

/// Program, arguments and working directory used to launch a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
}

/// Supervises the process of one installed server.
///
/// Launches it, watches its output until the readiness line shows up and
/// stops it by first asking through the server's shared memory stop channel,
/// then killing its process group if it does not exit in time.
pub struct ProcessController {
    handle: ServerHandle,
    config: ControllerConfig,
    watcher: Arc<dyn StartupLogWatcher>,
    stop_channel: StopChannel,
    state: LifecycleState,
    child: Option<Child>,
    pid: Option<Pid>,
    ready: Arc<AtomicBool>,
    output_task: Option<JoinHandle<()>>,
    shutdown_hook: Option<ShutdownHook>,
    exit_status: Option<ExitStatus>,
}

impl ProcessController {
    /// Creates a controller that waits for the version's default readiness line.
    pub fn new(handle: ServerHandle, config: ControllerConfig) -> Self {
        let watcher = Arc::new(DefaultStartupLogWatcher::new(&handle.version));
        Self::with_watcher(handle, config, watcher)
    }

    /// Creates a controller with a custom readiness check.
    ///
    /// # Arguments
    /// * `handle` - Installed server to supervise
    /// * `config` - Runtime location and timeouts
    /// * `watcher` - Decides which output line means the server is ready
    ///
    /// # Returns
    /// * `Self` - A controller in [`LifecycleState::NotStarted`]
    pub fn with_watcher(
        handle: ServerHandle,
        config: ControllerConfig,
        watcher: Arc<dyn StartupLogWatcher>,
    ) -> Self {
        Self {
            stop_channel: StopChannel::new(handle.temp_dir()),
            handle,
            config,
            watcher,
            state: LifecycleState::NotStarted,
            child: None,
            pid: None,
            ready: Arc::new(AtomicBool::new(false)),
            output_task: None,
            shutdown_hook: None,
            exit_status: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn handle(&self) -> &ServerHandle {
        &self.handle
    }

    /// Stop channel in the installation's temp directory.
    ///
    /// The shutdown hook writes to the same channel, so both paths stop the
    /// server the same way.
    pub fn stop_channel(&self) -> &StopChannel {
        &self.stop_channel
    }

    /// Exit status of the server process, once it has been observed.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// True while the server process is running.
    ///
    /// # Returns
    /// * `bool` - False before start, after stop, or once the process exited
    pub fn is_alive(&mut self) -> bool {
        match self.child.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }

    /// Builds the command line of the server's main process.
    ///
    /// The runtime is the explicit executable if configured, else
    /// `<java_home>/bin/java`, else `java` from `PATH`.
    pub fn launch_command(&self) -> Result<LaunchCommand, StartupError> {
        let program = if let Some(executable) = &self.config.java_executable {
            executable.clone()
        } else if let Some(home) = &self.config.java_home {
            home.join("bin").join("java")
        } else {
            PathBuf::from("java")
        };
        let archive = find_application_archive(&self.handle.lib_dir())?;

        let mut args: Vec<String> = BASELINE_JVM_OPTIONS.iter().map(|s| s.to_string()).collect();
        args.push("-jar".to_string());
        args.push(archive.to_string_lossy().into_owned());

        Ok(LaunchCommand {
            program,
            args,
            working_dir: self.handle.distribution_dir.clone(),
        })
    }

    /// Launches the server and waits until it is ready.
    ///
    /// # Returns
    /// * `Result<(), StartupError>` - `Ok` once the watcher matched a line;
    ///   an error if the state, version or runtime does not allow a start, or
    ///   if the process exits or the startup timeout elapses first
    pub async fn start(&mut self) -> Result<(), StartupError> {
        self.start_cancellable(&CancellationToken::new()).await
    }

    /// Like [`start`](Self::start), but cancelling `cancel` abandons the
    /// wait: the call returns `Ok`, the process keeps running and the
    /// controller stays `Starting` until [`stop`](Self::stop).
    pub async fn start_cancellable(&mut self, cancel: &CancellationToken) -> Result<(), StartupError> {
        if self.state != LifecycleState::NotStarted {
            return Err(StartupError::IllegalState(self.state));
        }
        if self.handle.version < self.config.minimum_version {
            return Err(StartupError::UnsupportedVersion {
                version: self.handle.version.clone(),
                minimum: self.config.minimum_version.clone(),
            });
        }
        let command = self.launch_command()?;

        self.state = LifecycleState::Starting;
        if let Err(e) = self.spawn(command) {
            self.state = LifecycleState::Failed;
            return Err(e);
        }

        let deadline = Instant::now() + self.config.startup_timeout;
        loop {
            if self.ready.load(Ordering::SeqCst) {
                self.state = LifecycleState::Started;
                self.register_shutdown_hook();
                info!("Server is up at {}", self.handle.base_url);
                return Ok(());
            }
            if let Some(status) = self.poll_exit() {
                error!("Server process exited before becoming ready: {:?}", status);
                self.shutdown_process().await;
                self.state = LifecycleState::Failed;
                return Err(StartupError::ExitedBeforeReady {
                    status: self.exit_status,
                });
            }
            if Instant::now() >= deadline {
                break;
            }
            select! {
                _ = sleep(self.config.poll_interval) => {}
                _ = cancel.cancelled() => {
                    warn!("Startup wait abandoned, server process left running");
                    return Ok(());
                }
            }
        }

        error!(
            "Server did not become ready within {:?}, stopping it",
            self.config.startup_timeout
        );
        self.shutdown_process().await;
        self.state = LifecycleState::Failed;
        Err(StartupError::Timeout {
            timeout: self.config.startup_timeout,
            status: self.exit_status,
        })
    }

    /// Stops the server. Never fails: a server that does not honour the
    /// stop request within the stop timeout is killed.
    ///
    /// Calling it on a controller that owns no running process does nothing.
    pub async fn stop(&mut self) {
        if !matches!(
            self.state,
            LifecycleState::Starting | LifecycleState::Started | LifecycleState::Stopping
        ) {
            debug!("Nothing to stop in state {:?}", self.state);
            return;
        }
        self.shutdown_process().await;
        self.state = LifecycleState::Stopped;
    }

    fn spawn(&mut self, launch: LaunchCommand) -> Result<(), StartupError> {
        info!("Launching {:?} {:?} in {:?}", launch.program, launch.args, launch.working_dir);

        let mut command = Command::new(&launch.program);
        command.args(&launch.args);
        command.current_dir(&launch.working_dir);
        command.env_clear();
        command.envs(Environment::inherit_sanitized().iter());
        // own process group so that a kill reaches the server's sub-processes
        command.process_group(0);
        command.kill_on_drop(true);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|source| StartupError::Spawn {
            program: launch.program.clone(),
            source,
        })?;
        let pid = child.id().and_then(|id| i32::try_from(id).ok()).map(Pid::from_raw);

        let prefix = self
            .handle
            .cluster_node_name
            .as_ref()
            .map(|name| format!("[{}] ", name))
            .unwrap_or_default();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        self.output_task = Some(tokio::spawn(forward_output(
            stdout,
            stderr,
            prefix,
            self.watcher.clone(),
            self.ready.clone(),
        )));

        debug!("Server process spawned with PID {:?}", pid);
        self.pid = pid;
        self.child = Some(child);
        Ok(())
    }

    fn poll_exit(&mut self) -> Option<ExitStatus> {
        let child = self.child.as_mut()?;
        match child.try_wait() {
            Ok(Some(status)) => {
                self.exit_status = Some(status);
                Some(status)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Cannot check server process: {}", e);
                None
            }
        }
    }

    fn register_shutdown_hook(&mut self) {
        let Some(pid) = self.pid else {
            return;
        };
        match ShutdownHook::register(pid, self.stop_channel.clone(), self.config.stop_timeout) {
            Ok(hook) => self.shutdown_hook = Some(hook),
            Err(e) => warn!("Cannot register shutdown hook for process {}: {}", pid, e),
        }
    }

    /// Cooperative stop, bounded wait, forced kill. Leaves no process handle behind.
    async fn shutdown_process(&mut self) {
        if let Some(hook) = self.shutdown_hook.take() {
            hook.deregister();
        }
        let Some(mut child) = self.child.take() else {
            return;
        };

        match child.try_wait() {
            Ok(Some(status)) => {
                debug!("Server process already exited with {:?}", status);
                self.exit_status = Some(status);
            }
            _ => {
                if self.state == LifecycleState::Started {
                    self.state = LifecycleState::Stopping;
                }
                info!("Asking server at {} to stop", self.handle.base_url);
                if let Err(e) = self.stop_channel.request_stop() {
                    warn!("Failed to request a cooperative stop: {}", e);
                }
                match timeout(self.config.stop_timeout, child.wait()).await {
                    Ok(Ok(status)) => {
                        info!("Server process exited with {:?}", status);
                        self.exit_status = Some(status);
                    }
                    Ok(Err(e)) => {
                        warn!("Error waiting for server process: {}", e);
                        self.exit_status = self.force_kill(&mut child).await;
                    }
                    Err(_) => {
                        warn!(
                            "Server still running after {:?}, killing it",
                            self.config.stop_timeout
                        );
                        self.exit_status = self.force_kill(&mut child).await;
                    }
                }
            }
        }

        if let Some(task) = self.output_task.take() {
            let abort = task.abort_handle();
            if timeout(OUTPUT_DRAIN_TIMEOUT, task).await.is_err() {
                abort.abort();
            }
        }
        self.pid = None;
    }

    async fn force_kill(&self, child: &mut Child) -> Option<ExitStatus> {
        if let Some(pid) = self.pid {
            if let Err(e) = killpg(pid, Signal::SIGKILL) {
                warn!("Failed to kill process group {}: {}", pid, e);
            }
        }
        if let Err(e) = child.start_kill() {
            debug!("Direct kill failed: {}", e);
        }
        match child.wait().await {
            Ok(status) => {
                info!("Server process killed, exit status: {:?}", status);
                Some(status)
            }
            Err(e) => {
                error!("Error waiting for killed server process: {}", e);
                None
            }
        }
    }
}

impl Drop for ProcessController {
    fn drop(&mut self) {
        // Emergency cleanup when the controller goes away with a live server
        if let (Some(pid), Some(child)) = (self.pid, self.child.as_mut()) {
            if matches!(child.try_wait(), Ok(None)) {
                warn!("Controller dropped with running server (PID {}), killing it", pid);
                if let Err(e) = killpg(pid, Signal::SIGKILL) {
                    if e != nix::errno::Errno::ESRCH {
                        error!("Failed to kill process group {}: {}", pid, e);
                    }
                }
            }
        }
    }
}

/// Finds the single `sonar-application-*.jar` of the distribution.
fn find_application_archive(lib_dir: &Path) -> Result<PathBuf, StartupError> {
    let pattern = format!("{}*{}", APPLICATION_ARCHIVE_PREFIX, APPLICATION_ARCHIVE_SUFFIX);
    let mut matches: Vec<PathBuf> = match std::fs::read_dir(lib_dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path.file_name().and_then(|n| n.to_str()).is_some_and(|name| {
                        name.starts_with(APPLICATION_ARCHIVE_PREFIX)
                            && name.ends_with(APPLICATION_ARCHIVE_SUFFIX)
                    })
            })
            .collect(),
        Err(e) => {
            debug!("Cannot list {:?}: {}", lib_dir, e);
            Vec::new()
        }
    };
    match matches.len() {
        0 => Err(StartupError::MissingApplicationArchive {
            dir: lib_dir.to_path_buf(),
            pattern,
        }),
        1 => Ok(matches.remove(0)),
        count => Err(StartupError::AmbiguousApplicationArchive {
            dir: lib_dir.to_path_buf(),
            pattern,
            count,
        }),
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

/// Echoes server output and flags readiness when the watcher matches a line.
///
/// Runs until both pipes are closed, so the server never blocks on a full pipe.
async fn forward_output(
    stdout: Option<impl AsyncRead + Unpin>,
    stderr: Option<impl AsyncRead + Unpin>,
    prefix: String,
    watcher: Arc<dyn StartupLogWatcher>,
    ready: Arc<AtomicBool>,
) {
    let mut stdout = stdout.map(|s| BufReader::new(s).lines());
    let mut stderr = stderr.map(|s| BufReader::new(s).lines());

    loop {
        let (stream, line) = select! {
            line = async { stdout.as_mut()?.next_line().await.transpose() }, if stdout.is_some() => (Stream::Stdout, line),
            line = async { stderr.as_mut()?.next_line().await.transpose() }, if stderr.is_some() => (Stream::Stderr, line),
            else => break,
        };
        match line {
            Some(Ok(line)) => {
                info!(target: "sqharness::server", "{}{}", prefix, line);
                if !ready.load(Ordering::SeqCst) && watcher.is_started(&line) {
                    debug!("Readiness line seen: {}", line);
                    ready.store(true, Ordering::SeqCst);
                }
            }
            end => {
                if let Some(Err(e)) = end {
                    warn!("Error reading server {:?}: {}", stream, e);
                }
                match stream {
                    Stream::Stdout => stdout = None,
                    Stream::Stderr => stderr = None,
                }
            }
        }
    }
}
