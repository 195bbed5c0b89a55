// src/runtime/local.rs
//! Local runtime: run as a child process on this host
//!
//! Protocol:
//!
//! 1. `MLRUN_EXEC_CONFIG` carries the JSON-encoded run struct
//! 2. `MLRUN_META_TMPFILE` names a fresh path in a per-run temp directory;
//!    the child writes its final record there
//! 3. `MLRUN_META_DBPATH` carries the run-database target, if any
//! 4. the child's exit code is advisory only (see [`ExitCodePolicy`])
//! 5. the handoff file is read, deleted, and returned as the record

use crate::run::context::HandoffEnv;
use crate::run::outcome::{RunOutcome, SoftFailure};
use crate::run::run_struct::RunStruct;
use crate::runtime::base::RuntimeBase;
use crate::runtime::kind::RuntimeKind;
use crate::runtime::process_manager::{ProcessManager, SpawnConfig};
use crate::utils::config::LocalConfig;
use crate::utils::errors::{EngineError, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

const HANDOFF_FILE: &str = "run-meta.json";

/// How a non-zero child exit code affects the outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExitCodePolicy {
    /// Log stderr and carry on; the handoff file decides the outcome
    #[default]
    Ignore,
}

#[derive(Debug, Clone)]
pub struct LocalRuntime {
    pub base: RuntimeBase,
    config: LocalConfig,
    exit_policy: ExitCodePolicy,
    manager: ProcessManager,
}

impl LocalRuntime {
    pub fn new(command: Option<String>, args: Vec<String>, config: LocalConfig) -> Self {
        Self {
            base: RuntimeBase::new(command, args),
            config,
            exit_policy: ExitCodePolicy::default(),
            manager: ProcessManager::new(),
        }
    }

    pub fn exit_policy(&self) -> ExitCodePolicy {
        self.exit_policy
    }

    pub fn process_struct(&mut self, run: &mut RunStruct) {
        self.base.process_struct(RuntimeKind::Local, run);
    }

    pub async fn run(&mut self, run: &mut RunStruct) -> Result<RunOutcome> {
        let command = self.base.command.clone().ok_or_else(|| {
            EngineError::ConfigError("local runtime needs spec.runtime.command".into())
        })?;

        let handoff_dir = tempfile::Builder::new()
            .prefix("mlrun-run-")
            .tempdir()
            .map_err(|e| EngineError::RuntimeError(format!("Failed to create handoff dir: {}", e)))?;
        let handoff_path = handoff_dir.path().join(HANDOFF_FILE);

        let handoff = HandoffEnv {
            exec_config: Some(run.to_json()?),
            meta_tmpfile: Some(handoff_path.clone()),
            meta_dbpath: self.base.rundb.clone(),
        };

        let mut spawn = SpawnConfig::for_command(
            self.config.interpreter.as_deref(),
            &command,
            &self.base.args,
        );
        spawn.env_vars = handoff.to_vars();
        spawn.work_dir = self.config.work_dir.clone();
        spawn.timeout = self.config.timeout_secs.map(Duration::from_secs);
        spawn.kill_grace = Duration::from_secs(self.config.kill_grace_secs);

        info!("Running local command: {} {:?}", command, self.base.args);
        let output = self.manager.run_to_completion(&spawn).await?;

        if !output.stdout.is_empty() {
            info!(target: "mlrun_engine::child", "{}", output.stdout.trim_end());
        }
        if !output.success() {
            match self.exit_policy {
                ExitCodePolicy::Ignore => warn!(
                    "Command {} exited with {:?}: {}",
                    command,
                    output.exit_code,
                    output.stderr.trim_end()
                ),
            }
        }

        if output.timed_out {
            return Ok(RunOutcome::Failed(SoftFailure::TimedOut {
                after_secs: self.config.timeout_secs.unwrap_or_default(),
            }));
        }

        let outcome = read_handoff(&handoff_path, output.exit_code).await;
        // handoff_dir is removed on drop, taking any partial file with it
        drop(handoff_dir);
        Ok(outcome)
    }
}

/// Read and delete the child's handoff file
async fn read_handoff(path: &Path, exit_code: Option<i32>) -> RunOutcome {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!("Handoff file {:?} was not written", path);
            return RunOutcome::Failed(SoftFailure::MissingHandoff {
                path: PathBuf::from(path),
                exit_code,
            });
        }
        Err(e) => {
            return RunOutcome::Failed(SoftFailure::UnreadableHandoff {
                path: PathBuf::from(path),
                reason: e.to_string(),
            })
        }
    };

    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("Failed to remove handoff file {:?}: {}", path, e);
    }

    match serde_json::from_slice(&bytes) {
        Ok(record) => RunOutcome::Completed(record),
        Err(e) => {
            warn!("Handoff file {:?} is not JSON: {}", path, e);
            RunOutcome::Failed(SoftFailure::UnreadableHandoff {
                path: PathBuf::from(path),
                reason: e.to_string(),
            })
        }
    }
}
