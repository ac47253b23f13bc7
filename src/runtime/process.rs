//! Supervised container processes
//!
//! A container's process is a plain child process started in the container's
//! working directory, in its own process group. It is referred to through a
//! [`ProcessHandle`]: the pid plus the kernel start time, so a recycled pid is
//! never mistaken for the original process.

use super::syscall::{self, ProcStat};
use crate::error::{RamaError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Process configuration for a container
#[derive(Debug, Clone)]
pub struct ProcessConfig {
    /// Arguments (first is the executable)
    pub args: Vec<String>,
    /// Environment variables added to the inherited environment
    pub env: HashMap<String, String>,
    /// Working directory
    pub cwd: PathBuf,
    /// File receiving stdout and stderr; discarded when unset
    pub log_file: Option<PathBuf>,
}

impl ProcessConfig {
    /// Create a new process config with the given command
    pub fn new(args: Vec<String>, cwd: PathBuf) -> Self {
        Self {
            args,
            env: HashMap::new(),
            cwd,
            log_file: None,
        }
    }

    /// Add an environment variable
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    /// Send output to a log file
    pub fn log_file(mut self, path: PathBuf) -> Self {
        self.log_file = Some(path);
        self
    }
}

/// Reuse-resistant reference to a supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessHandle {
    /// Process ID
    pub pid: u32,
    /// Kernel start time (clock ticks since boot)
    pub start_time: u64,
}

/// Outcome of a liveness check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// The original process is still running
    Alive,
    /// The process is gone (or a zombie awaiting its reaper)
    Exited,
    /// The pid now belongs to a different process
    Reused,
}

/// How a termination request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process had already exited before any signal was sent
    AlreadyExited,
    /// The process exited after SIGTERM
    Graceful,
    /// The process had to be killed with SIGKILL
    Killed,
    /// The pid belongs to another process; nothing was signalled
    Reused,
}

/// Timing policy for stopping a process
#[derive(Debug, Clone, Copy)]
pub struct StopPolicy {
    /// Wait for a graceful exit after SIGTERM
    pub grace: Duration,
    /// Wait for the process to disappear after SIGKILL
    pub kill_timeout: Duration,
    /// Liveness polling interval
    pub poll_interval: Duration,
}

impl ProcessHandle {
    /// Capture the identity of a live (or not yet reaped) process
    pub fn capture(pid: u32) -> Result<Self> {
        let stat = ProcStat::read(pid)
            .map_err(|e| RamaError::Process(format!("Failed to inspect pid {}: {}", pid, e)))?
            .ok_or_else(|| RamaError::Process(format!("Process {} does not exist", pid)))?;

        Ok(Self {
            pid,
            start_time: stat.start_time,
        })
    }

    /// Check whether this handle still names a running process
    pub fn liveness(&self) -> Liveness {
        match ProcStat::read(self.pid) {
            Ok(Some(stat)) if stat.start_time != self.start_time => Liveness::Reused,
            Ok(Some(stat)) if stat.is_defunct() => Liveness::Exited,
            Ok(Some(_)) => Liveness::Alive,
            Ok(None) => Liveness::Exited,
            Err(e) => {
                // procfs unreadable: fall back to a signal-0 probe
                warn!(pid = self.pid, error = %e, "cannot read process stat");
                match syscall::kill(self.pid as i32, 0) {
                    Ok(()) => Liveness::Alive,
                    Err(_) => Liveness::Exited,
                }
            }
        }
    }

    /// True while the original process is running
    pub fn is_alive(&self) -> bool {
        self.liveness() == Liveness::Alive
    }

    /// Signal the process group led by this process. The identity is checked
    /// first so a recycled pid is never signalled.
    fn signal(&self, signal: i32) -> Result<Liveness> {
        let liveness = self.liveness();
        if liveness != Liveness::Alive {
            return Ok(liveness);
        }

        let result = syscall::kill(-(self.pid as i32), signal)
            .or_else(|_| syscall::kill(self.pid as i32, signal));
        match result {
            Ok(()) => Ok(Liveness::Alive),
            Err(e) if syscall::is_esrch(&e) => Ok(Liveness::Exited),
            Err(e) => Err(RamaError::Process(format!(
                "Failed to signal pid {}: {}",
                self.pid, e
            ))),
        }
    }

    /// Poll until the process is no longer alive or `timeout` passes
    fn wait_gone(&self, timeout: Duration, poll: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.is_alive() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(poll);
        }
    }

    /// SIGTERM, wait up to `policy.grace`, then SIGKILL and wait up to
    /// `policy.kill_timeout`.
    pub fn terminate(&self, policy: StopPolicy) -> Result<Termination> {
        match self.signal(libc::SIGTERM)? {
            Liveness::Alive => {}
            Liveness::Exited => return Ok(Termination::AlreadyExited),
            Liveness::Reused => return Ok(Termination::Reused),
        }

        if self.wait_gone(policy.grace, policy.poll_interval) {
            return Ok(Termination::Graceful);
        }

        debug!(pid = self.pid, "grace period expired, sending SIGKILL");
        if self.signal(libc::SIGKILL)? != Liveness::Alive {
            return Ok(Termination::Killed);
        }

        if self.wait_gone(policy.kill_timeout, policy.poll_interval) {
            Ok(Termination::Killed)
        } else {
            Err(RamaError::Process(format!(
                "Process {} survived SIGKILL for {:?}",
                self.pid, policy.kill_timeout
            )))
        }
    }
}

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.pid, self.start_time)
    }
}

/// Start a supervised process. Returns once the process exists; a reaper
/// thread collects its exit status so it never lingers as a zombie.
pub fn spawn(config: &ProcessConfig) -> Result<ProcessHandle> {
    let (program, args) = config
        .args
        .split_first()
        .ok_or_else(|| RamaError::Process("Empty command".to_string()))?;

    let (stdout, stderr) = match &config.log_file {
        Some(path) => {
            let log = open_log(path)?;
            let log_err = log.try_clone()?;
            (Stdio::from(log), Stdio::from(log_err))
        }
        None => (Stdio::null(), Stdio::null()),
    };

    let mut child = Command::new(program)
        .args(args)
        .current_dir(&config.cwd)
        .envs(&config.env)
        .stdin(Stdio::null())
        .stdout(stdout)
        .stderr(stderr)
        .process_group(0)
        .spawn()
        .map_err(|e| RamaError::Process(format!("Failed to spawn {}: {}", program, e)))?;

    let pid = child.id();
    let handle = match ProcessHandle::capture(pid) {
        Ok(handle) => handle,
        Err(e) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(e);
        }
    };

    thread::Builder::new()
        .name(format!("reaper-{}", pid))
        .spawn(move || match child.wait() {
            Ok(status) => debug!(pid, %status, "supervised process exited"),
            Err(e) => warn!(pid, error = %e, "failed to reap supervised process"),
        })
        .map_err(|e| RamaError::Process(format!("Failed to start reaper: {}", e)))?;

    Ok(handle)
}

fn open_log(path: &Path) -> Result<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}
