//! Daemon lifecycle: the `agentmeshd` trace service process.
//!
//! The PID file in the data directory is the only lifecycle state. A missing
//! file or one naming a dead process means stopped; stale files are removed
//! lazily by [`status`] and [`start_background`].

pub mod pid_file;
pub mod server;

pub use pid_file::{PID_FILE_NAME, PidFile, ProcessStatus, verify_process};
pub use server::{DEFAULT_HOST, DEFAULT_PORT, router, serve, shutdown_signal};

use serde::Serialize;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

use crate::storage::EventStore;
use crate::{Error, Result};

/// Log file for a background daemon's stdout and stderr.
pub const LOG_FILE_NAME: &str = "agentmeshd.log";

const STARTUP_POLL_ATTEMPTS: u32 = 20;
const STARTUP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Where and how the trace service runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonOptions {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
}

impl DaemonOptions {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            data_dir: data_dir.into(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Base URL clients use to reach this daemon.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn log_path(&self) -> PathBuf {
        self.data_dir.join(LOG_FILE_NAME)
    }
}

/// Result of a background start request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StartOutcome {
    /// A live daemon already owns the PID file; nothing was spawned.
    AlreadyRunning { pid: u32 },
    /// A new daemon was spawned.
    Started { pid: u32, log_path: PathBuf },
}

/// Observed daemon state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DaemonStatus {
    Running { pid: u32 },
    Stopped,
}

impl DaemonStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, DaemonStatus::Running { .. })
    }
}

impl fmt::Display for DaemonStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaemonStatus::Running { pid } => write!(f, "running (pid {})", pid),
            DaemonStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// Run the trace service in this process until SIGINT or SIGTERM.
///
/// Writes the PID file first and removes it on every exit path, including
/// store, bind and serve failures.
pub fn start_foreground(opts: &DaemonOptions) -> Result<()> {
    run_with_pid_file(opts, run_service)
}

/// Own the PID file for the duration of `service`.
///
/// On exit the file is removed only while it still names this process; a
/// daemon started after `stop` may already have replaced it.
fn run_with_pid_file<F>(opts: &DaemonOptions, service: F) -> Result<()>
where
    F: FnOnce(&DaemonOptions) -> Result<()>,
{
    let pid_file = PidFile::new(&opts.data_dir);
    let own_pid = std::process::id();

    if let Some(pid) = pid_file.running_pid() {
        if pid != own_pid {
            return Err(Error::Other(format!(
                "agentmeshd already running (pid {})",
                pid
            )));
        }
    }

    pid_file
        .write(own_pid)
        .map_err(|source| Error::Storage {
            resource: pid_file.path().to_path_buf(),
            source,
        })?;
    info!(pid = own_pid, data_dir = %opts.data_dir.display(), "agentmeshd starting");

    let result = service(opts);

    match pid_file.delete_if_owned(own_pid) {
        Ok(true) => {}
        Ok(false) => info!(
            path = %pid_file.path().display(),
            "PID file belongs to another daemon; left in place"
        ),
        Err(e) => warn!(
            path = %pid_file.path().display(),
            error = %e,
            "failed to remove PID file"
        ),
    }
    match &result {
        Ok(()) => info!("agentmeshd stopped"),
        Err(e) => warn!(error = %e, "agentmeshd exited with error"),
    }

    result
}

fn run_service(opts: &DaemonOptions) -> Result<()> {
    let store = Arc::new(EventStore::open(&opts.data_dir)?);

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(Error::from)
        .and_then(|runtime| {
            runtime.block_on(async {
                let listener =
                    tokio::net::TcpListener::bind((opts.host.as_str(), opts.port)).await?;
                serve(listener, Arc::clone(&store), shutdown_signal()).await?;
                Ok::<(), Error>(())
            })
        });

    if let Err(e) = store.close() {
        warn!(error = %e, "failed to close event store");
    }

    result
}

/// Start a detached daemon from the current executable.
pub fn start_background(opts: &DaemonOptions) -> Result<StartOutcome> {
    let exe = std::env::current_exe()?;
    spawn_background(opts, &exe)
}

/// Spawn `exe start --host H --port P --data-dir D` detached and wait for it
/// to write its PID file.
///
/// If a live daemon already owns the PID file nothing is spawned. If the PID
/// file never appears within the polling window the child's own PID is
/// reported.
pub fn spawn_background(opts: &DaemonOptions, exe: &Path) -> Result<StartOutcome> {
    let pid_file = PidFile::new(&opts.data_dir);
    if let Some(pid) = pid_file.running_pid() {
        info!(pid, "agentmeshd already running");
        return Ok(StartOutcome::AlreadyRunning { pid });
    }

    fs::create_dir_all(&opts.data_dir)?;
    let log_path = opts.log_path();
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|source| Error::Storage {
            resource: log_path.clone(),
            source,
        })?;

    let mut command = Command::new(exe);
    command
        .arg("start")
        .arg("--host")
        .arg(&opts.host)
        .arg("--port")
        .arg(opts.port.to_string())
        .arg("--data-dir")
        .arg(&opts.data_dir)
        .stdin(Stdio::null())
        .stdout(log.try_clone()?)
        .stderr(log);

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let mut child = command.spawn()?;
    let child_pid = child.id();
    info!(pid = child_pid, log = %log_path.display(), "spawned background agentmeshd");

    for _ in 0..STARTUP_POLL_ATTEMPTS {
        if let Some(exit) = child.try_wait()? {
            warn!(pid = child_pid, %exit, "agentmeshd exited during startup");
            return Err(Error::StartupFailed { log_path });
        }
        if let Ok(Some(pid)) = pid_file.read() {
            return Ok(StartOutcome::Started { pid, log_path });
        }
        thread::sleep(STARTUP_POLL_INTERVAL);
    }

    warn!(pid = child_pid, "PID file did not appear; reporting child PID");
    Ok(StartOutcome::Started {
        pid: child_pid,
        log_path,
    })
}

/// Ask the daemon to terminate.
///
/// Returns `false` when there is no PID file, the file is unparseable, or the
/// signal could not be delivered. The PID file is removed in every case where
/// it existed.
pub fn stop(data_dir: &Path) -> bool {
    let pid_file = PidFile::new(data_dir);
    let pid = match pid_file.read() {
        Ok(Some(pid)) => pid,
        Ok(None) => return false,
        Err(e) => {
            warn!(path = %pid_file.path().display(), error = %e, "removing unreadable PID file");
            pid_file.delete().ok();
            return false;
        }
    };

    let delivered = terminate(pid);
    pid_file.delete().ok();

    if delivered {
        info!(pid, "sent SIGTERM to agentmeshd");
    } else {
        warn!(pid, "agentmeshd was not running; removed stale PID file");
    }
    delivered
}

/// Report whether the daemon is running, removing a stale PID file.
pub fn status(data_dir: &Path) -> DaemonStatus {
    match PidFile::new(data_dir).running_pid() {
        Some(pid) => DaemonStatus::Running { pid },
        None => DaemonStatus::Stopped,
    }
}

#[cfg(unix)]
fn terminate(pid: u32) -> bool {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => kill(Pid::from_raw(raw), Signal::SIGTERM).is_ok(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn terminate(_pid: u32) -> bool {
    false
}
