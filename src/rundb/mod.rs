// src/rundb/mod.rs
//! Run database clients
//!
//! Completed run records are stored through the [`RunDb`] trait. The target
//! string a run carries (`MLRUN_META_DBPATH`, `rundb` arguments) selects the
//! backend:
//!
//! - `sqlite://<path>` → [`SqliteRunDb`]
//! - `memory://<name>` → [`MemoryRunDb`] (process-local, shared by name)
//! - anything else is a directory → [`FileRunDb`]
//!
//! Writes with `commit = false` are buffered until [`RunDb::commit`].

pub mod file;
pub mod memory;
pub mod sqlite;

pub use file::FileRunDb;
pub use memory::MemoryRunDb;
pub use sqlite::SqliteRunDb;

use crate::run::secrets::SecretsStore;
use crate::utils::errors::{EngineError, Result};
use serde_json::Value;

pub const DEFAULT_PROJECT: &str = "default";

/// Durable sink for run records
pub trait RunDb: Send {
    /// Open the backend, authenticating with `secrets` where it needs to
    fn connect(&mut self, secrets: &SecretsStore) -> Result<()>;

    /// Queue a record, flushing immediately when `commit` is set
    fn store_run(&mut self, record: &Value, commit: bool) -> Result<()>;

    /// Flush queued records
    fn commit(&mut self) -> Result<()>;

    fn read_run(&self, uid: &str, project: &str, iteration: u64) -> Result<Option<Value>>;

    fn list_runs(&self, project: &str) -> Result<Vec<Value>>;
}

/// Build an unconnected client for a target string
pub fn get_run_db(target: &str) -> Result<Box<dyn RunDb>> {
    let target = target.trim();
    if target.is_empty() {
        return Err(EngineError::ConfigError("empty run database target".into()));
    }

    if let Some(path) = target.strip_prefix("sqlite://") {
        return Ok(Box::new(SqliteRunDb::new(path)));
    }
    if let Some(name) = target.strip_prefix("memory://") {
        return Ok(Box::new(MemoryRunDb::named(name)));
    }
    if target.contains("://") {
        return Err(EngineError::ConfigError(format!(
            "unsupported run database target: {}",
            target
        )));
    }

    Ok(Box::new(FileRunDb::new(target)))
}

/// Identity of a stored run
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunKey {
    pub project: String,
    pub uid: String,
    pub iteration: u64,
}

impl RunKey {
    /// Extract the key from a record's `metadata`
    pub fn from_record(record: &Value) -> Result<Self> {
        let meta = record
            .get("metadata")
            .and_then(Value::as_object)
            .ok_or_else(|| EngineError::RunDbError("run record has no metadata".into()))?;

        let uid = meta
            .get("uid")
            .and_then(Value::as_str)
            .filter(|uid| !uid.is_empty())
            .ok_or_else(|| EngineError::RunDbError("run record has no metadata.uid".into()))?;

        let project = meta
            .get("project")
            .and_then(Value::as_str)
            .filter(|p| !p.is_empty())
            .unwrap_or(DEFAULT_PROJECT);

        let iteration = meta.get("iteration").and_then(Value::as_u64).unwrap_or(0);

        Ok(Self {
            project: project.to_string(),
            uid: uid.to_string(),
            iteration,
        })
    }
}
