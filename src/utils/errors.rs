// src/utils/errors.rs
//! Error types for the run engine
//!
//! Configuration and dispatch problems are programmer errors and surface as
//! `Err`. Backend execution problems (a child that never wrote its record,
//! a remote that answered 500) are not errors at all: they are reported as
//! [`crate::run::outcome::RunOutcome::Failed`].

use thiserror::Error;

/// Engine result alias
pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// No runtime could be resolved, or a setting is invalid
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// `spec.runtime.kind` names a backend this engine does not know
    #[error("unsupported runtime - {kind}")]
    UnsupportedRuntime { kind: String },

    /// The run struct (or a runtime descriptor) is not a usable document
    #[error("invalid run struct: {0}")]
    InvalidRunStruct(String),

    /// Network failure reaching a remote function
    #[error("cannot run function at url {url}: {reason}")]
    Transport { url: String, reason: String },

    #[error("process spawn failed: {0}")]
    ProcessSpawnFailed(String),

    #[error("runtime error: {0}")]
    RuntimeError(String),

    #[error("run database error: {0}")]
    RunDbError(String),

    #[error("job submission failed: {0}")]
    JobSubmission(String),

    #[error("storage failed: {0}")]
    StorageFailed(String),

    #[error("export failed: {0}")]
    ExportFailed(String),

    #[error("observability setup failed: {0}")]
    ObservabilityFailed(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("config load error: {0}")]
    ConfigLoad(#[from] config::ConfigError),
}

impl EngineError {
    /// Whether this error means the caller asked for something unrunnable.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigError(_)
                | Self::UnsupportedRuntime { .. }
                | Self::InvalidRunStruct(_)
                | Self::ConfigLoad(_)
        )
    }

    pub fn transport(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Transport {
            url: url.into(),
            reason: reason.to_string(),
        }
    }
}
