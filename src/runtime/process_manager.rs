// src/runtime/process_manager.rs
//! Process manager for spawning run child processes
//!
//! Children get their handoff variables as a per-process environment
//! overlay; the parent's own environment is never touched, so concurrent
//! runs in one process cannot see each other's configuration.
//!
//! Each child leads its own process group so a timeout can signal
//! everything the run started, not just the direct child.

use crate::utils::errors::{EngineError, Result};
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Configuration for spawning a process
#[derive(Debug, Clone)]
pub struct SpawnConfig {
    /// Program to execute
    pub program: String,

    /// Arguments after the program
    pub args: Vec<String>,

    /// Working directory
    pub work_dir: Option<PathBuf>,

    /// Environment overlay for this child only
    pub env_vars: Vec<(String, String)>,

    /// Kill the child after this long; `None` waits indefinitely
    pub timeout: Option<Duration>,

    /// Time between SIGTERM and SIGKILL when the timeout fires
    pub kill_grace: Duration,
}

impl SpawnConfig {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: vec![],
            work_dir: None,
            env_vars: vec![],
            timeout: None,
            kill_grace: Duration::from_secs(2),
        }
    }

    /// Build from a command line: optional interpreter, command, arguments
    pub fn for_command(interpreter: Option<&str>, command: &str, args: &[String]) -> Self {
        match interpreter {
            Some(interpreter) => {
                let mut config = Self::new(interpreter);
                config.args.push(command.to_string());
                config.args.extend(args.iter().cloned());
                config
            }
            None => {
                let mut config = Self::new(command);
                config.args = args.to_vec();
                config
            }
        }
    }
}

/// Captured result of a finished child
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// Exit code; `None` when killed by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Process manager for spawning run processes
#[derive(Debug, Clone, Default)]
pub struct ProcessManager;

impl ProcessManager {
    pub fn new() -> Self {
        Self
    }

    /// Spawn a new process with piped output
    pub fn spawn(&self, config: &SpawnConfig) -> Result<Child> {
        debug!("Spawning process: {} {:?}", config.program, config.args);

        let mut command = Command::new(&config.program);
        command.args(&config.args);

        if let Some(work_dir) = &config.work_dir {
            command.current_dir(work_dir);
        }

        for (key, value) in &config.env_vars {
            command.env(key, value);
        }

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        let child = command.spawn().map_err(|e| {
            EngineError::ProcessSpawnFailed(format!(
                "Failed to spawn '{}': {}",
                config.program, e
            ))
        })?;

        debug!("Process spawned with PID: {:?}", child.id());

        Ok(child)
    }

    /// Spawn a process and wait for it, capturing stdout and stderr
    pub async fn run_to_completion(&self, config: &SpawnConfig) -> Result<ProcessOutput> {
        let mut child = self.spawn(config)?;

        let stdout = child.stdout.take().map(|mut out| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = out.read_to_end(&mut buf).await;
                buf
            })
        });
        let stderr = child.stderr.take().map(|mut err| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = err.read_to_end(&mut buf).await;
                buf
            })
        });

        let (status, timed_out) = match config.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => (status?, false),
                Err(_) => {
                    warn!("Process {:?} exceeded {:?}, terminating", child.id(), limit);
                    (self.terminate(&mut child, config.kill_grace).await?, true)
                }
            },
            None => (child.wait().await?, false),
        };

        // a killed run's pipes may still be held open by a straggler
        let drain_limit = timed_out.then_some(config.kill_grace);
        let stdout = collect(stdout, drain_limit).await;
        let stderr = collect(stderr, drain_limit).await;

        Ok(ProcessOutput {
            exit_code: status.code(),
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            timed_out,
        })
    }

    /// SIGTERM the child's process group, wait out the grace period, then SIGKILL
    async fn terminate(
        &self,
        child: &mut Child,
        grace: Duration,
    ) -> Result<std::process::ExitStatus> {
        let group = child.id().map(|pid| Pid::from_raw(pid as i32));

        if let Some(pgid) = group {
            debug!("Sending SIGTERM to process group {}", pgid);
            signal_group(pgid, Signal::SIGTERM);
        }

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(status) => {
                // the leader is gone but its group may not be
                if let Some(pgid) = group {
                    signal_group(pgid, Signal::SIGKILL);
                }
                Ok(status?)
            }
            Err(_) => {
                debug!("Process still alive, sending SIGKILL");
                match group {
                    Some(pgid) => signal_group(pgid, Signal::SIGKILL),
                    None => child.kill().await.map_err(|e| {
                        EngineError::RuntimeError(format!("Failed to kill process: {}", e))
                    })?,
                }
                Ok(child.wait().await?)
            }
        }
    }
}

fn signal_group(pgid: Pid, signal: Signal) {
    match killpg(pgid, signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!("Failed to send {} to process group {}: {}", signal, pgid, e),
    }
}

/// Join a pipe reader, giving up after `limit` when one is set
async fn collect(task: Option<JoinHandle<Vec<u8>>>, limit: Option<Duration>) -> Vec<u8> {
    let Some(mut task) = task else {
        return Vec::new();
    };
    match limit {
        Some(limit) => match tokio::time::timeout(limit, &mut task).await {
            Ok(joined) => joined.unwrap_or_default(),
            Err(_) => {
                task.abort();
                Vec::new()
            }
        },
        None => task.await.unwrap_or_default(),
    }
}
