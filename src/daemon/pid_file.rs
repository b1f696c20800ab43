//! PID file management for daemon process tracking.
//!
//! The PID file is stored in the data directory as `agentmeshd.pid` and holds
//! the daemon's process id as decimal text. It is the only persisted state of
//! the lifecycle state machine:
//!
//! - no file, or a file naming a dead process: stopped
//! - a file naming a live process: running

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// PID file name inside the data directory.
pub const PID_FILE_NAME: &str = "agentmeshd.pid";

/// Result of probing a process id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// The process exists and can be signalled
    Running,
    /// The process exists but belongs to another user. Treated as running.
    NoPermission,
    /// No such process
    NotRunning,
}

impl ProcessStatus {
    /// Whether the process should be considered alive.
    pub fn is_alive(&self) -> bool {
        !matches!(self, ProcessStatus::NotRunning)
    }
}

/// Probe a process without affecting it (signal 0).
#[cfg(unix)]
pub fn verify_process(pid: u32) -> ProcessStatus {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    // 0 and negative values address process groups, never a single daemon.
    let raw = match i32::try_from(pid) {
        Ok(raw) if raw > 0 => raw,
        _ => return ProcessStatus::NotRunning,
    };

    match kill(Pid::from_raw(raw), None) {
        Ok(()) => ProcessStatus::Running,
        Err(Errno::EPERM) => ProcessStatus::NoPermission,
        Err(_) => ProcessStatus::NotRunning,
    }
}

#[cfg(not(unix))]
pub fn verify_process(pid: u32) -> ProcessStatus {
    // No signal-0 probe outside Unix; assume alive rather than allow a
    // duplicate daemon.
    if pid == 0 {
        ProcessStatus::NotRunning
    } else {
        ProcessStatus::Running
    }
}

/// Manages the daemon PID file.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Create a PidFile handle for the given data directory.
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(PID_FILE_NAME),
        }
    }

    /// Get the path to the PID file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write `pid` to the file, creating the parent directory if needed.
    pub fn write(&self, pid: u32) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = fs::File::create(&self.path)?;
        file.write_all(pid.to_string().as_bytes())?;
        file.sync_all()?;

        Ok(())
    }

    /// Read the PID file.
    ///
    /// # Returns
    /// * `Ok(Some(pid))` if the file exists and holds a valid PID
    /// * `Ok(None)` if the file doesn't exist
    /// * `Err(e)` with `InvalidData` if the contents are not a PID
    pub fn read(&self) -> io::Result<Option<u32>> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Self::parse_contents(&contents).map(Some),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Delete the PID file if it exists.
    pub fn delete(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Delete the PID file only if it still holds `pid`.
    ///
    /// Returns whether the file was removed. A file rewritten by another
    /// daemon, or one that is unreadable, is left in place.
    pub fn delete_if_owned(&self, pid: u32) -> io::Result<bool> {
        match self.read() {
            Ok(Some(current)) if current == pid => {
                self.delete()?;
                Ok(true)
            }
            Ok(_) => Ok(false),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Check if a PID file exists.
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Return the PID of a live daemon, cleaning up stale files.
    ///
    /// A missing file yields `None`. Unreadable contents or a dead process
    /// remove the file and yield `None`. A process we may not signal is
    /// reported as alive.
    pub fn running_pid(&self) -> Option<u32> {
        let pid = match self.read() {
            Ok(Some(pid)) => pid,
            Ok(None) => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "removing unreadable PID file");
                self.delete().ok();
                return None;
            }
        };

        if verify_process(pid).is_alive() {
            Some(pid)
        } else {
            warn!(pid, path = %self.path.display(), "removing stale PID file");
            self.delete().ok();
            None
        }
    }

    fn parse_contents(contents: &str) -> io::Result<u32> {
        contents
            .trim()
            .parse()
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "Invalid PID value"))
    }
}
