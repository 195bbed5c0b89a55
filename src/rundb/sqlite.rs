// src/rundb/sqlite.rs
//! SQLite-backed run database
//!
//! One row per (project, uid, iteration); the full record is kept as JSON
//! text so nothing the backend reported is lost.

use crate::rundb::{RunDb, RunKey};
use crate::run::secrets::SecretsStore;
use crate::utils::errors::{EngineError, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::PathBuf;
use tracing::{debug, info};

pub struct SqliteRunDb {
    path: PathBuf,
    conn: Option<Connection>,
    pending: Vec<(RunKey, Value)>,
}

impl SqliteRunDb {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            conn: None,
            pending: Vec::new(),
        }
    }

    fn conn(&self) -> Result<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| EngineError::RunDbError("sqlite run database is not connected".into()))
    }

    /// Initialize database schema
    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute(
            r#"
            CREATE TABLE IF NOT EXISTS runs (
                project TEXT NOT NULL,
                uid TEXT NOT NULL,
                iteration INTEGER NOT NULL,
                state TEXT,
                body TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (project, uid, iteration)
            )
            "#,
            [],
        )
        .map_err(|e| EngineError::StorageFailed(format!("Schema creation failed: {}", e)))?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_runs_project ON runs(project, updated_at)",
            [],
        )
        .map_err(|e| EngineError::StorageFailed(format!("Index creation failed: {}", e)))?;

        Ok(())
    }
}

impl RunDb for SqliteRunDb {
    fn connect(&mut self, _secrets: &SecretsStore) -> Result<()> {
        if self.conn.is_some() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                EngineError::StorageFailed(format!("Failed to create directory: {}", e))
            })?;
        }

        let conn = Connection::open(&self.path).map_err(|e| {
            EngineError::StorageFailed(format!("Failed to open database: {}", e))
        })?;
        Self::init_schema(&conn)?;

        info!("SQLite run database opened at {:?}", self.path);
        self.conn = Some(conn);
        Ok(())
    }

    fn store_run(&mut self, record: &Value, commit: bool) -> Result<()> {
        let key = RunKey::from_record(record)?;
        self.pending.push((key, record.clone()));
        if commit {
            self.commit()?;
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| EngineError::RunDbError("sqlite run database is not connected".into()))?;

        let tx = conn.transaction()?;
        for (key, record) in self.pending.iter() {
            let state = record
                .pointer("/status/state")
                .and_then(Value::as_str)
                .map(str::to_string);

            tx.execute(
                r#"
                INSERT OR REPLACE INTO runs (project, uid, iteration, state, body, updated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
                params![
                    key.project,
                    key.uid,
                    key.iteration as i64,
                    state,
                    serde_json::to_string(record)?,
                    chrono::Utc::now().timestamp(),
                ],
            )
            .map_err(|e| EngineError::StorageFailed(format!("Failed to store run: {}", e)))?;
            debug!("Stored run {} ({})", key.uid, key.project);
        }
        tx.commit()?;

        self.pending.clear();
        Ok(())
    }

    fn read_run(&self, uid: &str, project: &str, iteration: u64) -> Result<Option<Value>> {
        let body: Option<String> = self
            .conn()?
            .query_row(
                "SELECT body FROM runs WHERE project = ? AND uid = ? AND iteration = ?",
                params![project, uid, iteration as i64],
                |row| row.get(0),
            )
            .optional()?;

        body.map(|text| serde_json::from_str(&text).map_err(EngineError::from))
            .transpose()
    }

    fn list_runs(&self, project: &str) -> Result<Vec<Value>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT body FROM runs WHERE project = ? ORDER BY updated_at, uid, iteration")
            .map_err(|e| EngineError::StorageFailed(format!("Query preparation failed: {}", e)))?;

        let bodies = stmt
            .query_map(params![project], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        bodies
            .iter()
            .map(|text| serde_json::from_str(text).map_err(EngineError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_store_read_and_replace() {
        let dir = tempdir().unwrap();
        let mut db = SqliteRunDb::new(dir.path().join("runs.db"));
        db.connect(&SecretsStore::new()).unwrap();

        db.store_run(
            &json!({"metadata": {"uid": "r1"}, "status": {"state": "running"}}),
            true,
        )
        .unwrap();
        db.store_run(
            &json!({"metadata": {"uid": "r1"}, "status": {"state": "completed"}}),
            true,
        )
        .unwrap();

        let runs = db.list_runs("default").unwrap();
        assert_eq!(runs.len(), 1);

        let run = db.read_run("r1", "default", 0).unwrap().unwrap();
        assert_eq!(run["status"]["state"], "completed");
    }

    #[test]
    fn test_read_missing() {
        let dir = tempdir().unwrap();
        let mut db = SqliteRunDb::new(dir.path().join("runs.db"));
        db.connect(&SecretsStore::new()).unwrap();
        assert!(db.read_run("nope", "default", 0).unwrap().is_none());
    }

    #[test]
    fn test_not_connected() {
        let db = SqliteRunDb::new("/nonexistent/runs.db");
        assert!(db.list_runs("default").is_err());
    }
}
