// src/utils/config.rs
//! Engine configuration
//!
//! Layered with the `config` crate, lowest precedence first:
//!
//! 1. built-in defaults
//! 2. `mlrun-engine.{toml,yaml,json}` in the working directory, or the file
//!    named by `MLRUN_ENGINE_CONFIG`
//! 3. `MLRUN_ENGINE__<SECTION>__<KEY>` environment variables
//!
//! The `MLRUN_ENGINE` prefix keeps these apart from the handoff variables
//! (`MLRUN_EXEC_CONFIG` and friends), which are never configuration.

use crate::utils::errors::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable naming an explicit configuration file
pub const CONFIG_FILE_ENV: &str = "MLRUN_ENGINE_CONFIG";

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default run-database target when the caller passes none
    pub rundb: Option<String>,

    pub local: LocalConfig,
    pub remote: RemoteConfig,
    pub mpijob: MpiJobConfig,
    pub kfp: KfpConfig,
    pub observability: ObservabilityConfig,
}

/// Local (child process) runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    /// Program placed in front of `command`, e.g. `python3`
    pub interpreter: Option<String>,

    /// Working directory for the child
    pub work_dir: Option<PathBuf>,

    /// Kill the child after this many seconds; unset waits forever
    pub timeout_secs: Option<u64>,

    /// Time between SIGTERM and SIGKILL on timeout
    pub kill_grace_secs: u64,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            interpreter: None,
            work_dir: None,
            timeout_secs: None,
            kill_grace_secs: 2,
        }
    }
}

/// Remote (HTTP function) runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Log level header sent when the struct carries no `spec.log_level`
    pub default_log_level: String,

    /// Request timeout; unset waits forever
    pub timeout_secs: Option<u64>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            default_log_level: "info".to_string(),
            timeout_secs: None,
        }
    }
}

/// Distributed (MPI) runtime settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MpiJobConfig {
    /// Directory `ManifestJobSubmitter` writes job manifests to
    pub manifest_dir: PathBuf,

    /// Namespace used when the job spec does not name one
    pub namespace: String,

    pub api_version: String,
}

impl Default for MpiJobConfig {
    fn default() -> Self {
        Self {
            manifest_dir: std::env::temp_dir().join("mlrun-mpijobs"),
            namespace: "default-tenant".to_string(),
            api_version: "kubeflow.org/v1alpha1".to_string(),
        }
    }
}

/// Pipeline metadata output locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KfpConfig {
    /// Where `mlpipeline-metrics.json` and `mlpipeline-ui-metadata.json` go
    pub metadata_dir: PathBuf,

    /// Where one file per run output goes
    pub outputs_dir: PathBuf,
}

impl Default for KfpConfig {
    fn default() -> Self {
        Self {
            metadata_dir: PathBuf::from("/"),
            outputs_dir: PathBuf::from("/tmp"),
        }
    }
}

/// Logging and metrics settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub log_filter: String,

    /// Emit JSON lines instead of human-readable output
    pub json_logs: bool,

    /// Install the Prometheus recorder
    pub metrics: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: "info,mlrun_engine=info".to_string(),
            json_logs: false,
            metrics: true,
        }
    }
}

impl EngineConfig {
    /// Load configuration from file and environment
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();

        builder = match std::env::var(CONFIG_FILE_ENV) {
            Ok(path) => builder.add_source(config::File::with_name(&path)),
            Err(_) => builder.add_source(config::File::with_name("mlrun-engine").required(false)),
        };

        let config = builder
            .add_source(
                config::Environment::with_prefix("MLRUN_ENGINE")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Load configuration from a single file, ignoring the environment
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
