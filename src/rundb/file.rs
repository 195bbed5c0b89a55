// src/rundb/file.rs
//! Directory-backed run database
//!
//! Layout: `<base>/runs/<project>/<uid>-<iteration>.json`

use crate::rundb::{RunDb, RunKey};
use crate::run::secrets::SecretsStore;
use crate::utils::errors::{EngineError, Result};
use crate::utils::paths::is_single_segment;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub struct FileRunDb {
    base_dir: PathBuf,
    pending: Vec<(RunKey, Value)>,
    connected: bool,
}

impl FileRunDb {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            pending: Vec::new(),
            connected: false,
        }
    }

    fn project_dir(&self, project: &str) -> Result<PathBuf> {
        if !is_single_segment(project) {
            return Err(EngineError::RunDbError(format!("invalid project name {:?}", project)));
        }
        Ok(self.base_dir.join("runs").join(project))
    }

    fn run_path(&self, key: &RunKey) -> Result<PathBuf> {
        let file = format!("{}-{}.json", key.uid, key.iteration);
        if !is_single_segment(&key.uid) || !is_single_segment(&file) {
            return Err(EngineError::RunDbError(format!("invalid run uid {:?}", key.uid)));
        }
        Ok(self.project_dir(&key.project)?.join(file))
    }

    fn write_record(&self, key: &RunKey, record: &Value) -> Result<()> {
        let path = self.run_path(key)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, serde_json::to_vec_pretty(record)?).map_err(|e| {
            EngineError::StorageFailed(format!("Failed to write run {:?}: {}", path, e))
        })?;
        debug!("Stored run {} at {:?}", key.uid, path);
        Ok(())
    }
}

impl RunDb for FileRunDb {
    fn connect(&mut self, _secrets: &SecretsStore) -> Result<()> {
        fs::create_dir_all(self.base_dir.join("runs")).map_err(|e| {
            EngineError::StorageFailed(format!(
                "Failed to create run directory under {:?}: {}",
                self.base_dir, e
            ))
        })?;
        self.connected = true;
        info!("File run database at {:?}", self.base_dir);
        Ok(())
    }

    fn store_run(&mut self, record: &Value, commit: bool) -> Result<()> {
        let key = RunKey::from_record(record)?;
        self.run_path(&key)?;
        self.pending.push((key, record.clone()));
        if commit {
            self.commit()?;
        }
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        if !self.connected {
            return Err(EngineError::RunDbError("file run database is not connected".into()));
        }

        // a record leaves the queue only once it is on disk
        while let Some((key, record)) = self.pending.first() {
            self.write_record(key, record)?;
            self.pending.remove(0);
        }
        Ok(())
    }

    fn read_run(&self, uid: &str, project: &str, iteration: u64) -> Result<Option<Value>> {
        let path = self.run_path(&RunKey {
            project: project.to_string(),
            uid: uid.to_string(),
            iteration,
        })?;
        read_json(&path)
    }

    fn list_runs(&self, project: &str) -> Result<Vec<Value>> {
        let dir = self.project_dir(project)?;
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().map_or(false, |ext| ext == "json"))
            .collect();
        paths.sort();

        let mut runs = Vec::with_capacity(paths.len());
        for path in paths {
            if let Some(run) = read_json(&path)? {
                runs.push(run);
            }
        }
        Ok(runs)
    }
}

fn read_json(path: &Path) -> Result<Option<Value>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_store_and_read() {
        let dir = tempdir().unwrap();
        let mut db = FileRunDb::new(dir.path());
        db.connect(&SecretsStore::new()).unwrap();

        let record = json!({"metadata": {"uid": "abc", "project": "p1"}, "status": {"state": "completed"}});
        db.store_run(&record, true).unwrap();

        assert!(dir.path().join("runs/p1/abc-0.json").exists());
        assert_eq!(db.read_run("abc", "p1", 0).unwrap(), Some(record));
        assert_eq!(db.read_run("missing", "p1", 0).unwrap(), None);
    }

    #[test]
    fn test_uncommitted_writes_are_buffered() {
        let dir = tempdir().unwrap();
        let mut db = FileRunDb::new(dir.path());
        db.connect(&SecretsStore::new()).unwrap();

        db.store_run(&json!({"metadata": {"uid": "a"}}), false).unwrap();
        db.store_run(&json!({"metadata": {"uid": "b"}}), false).unwrap();
        assert!(db.list_runs("default").unwrap().is_empty());

        db.commit().unwrap();
        assert_eq!(db.list_runs("default").unwrap().len(), 2);
    }

    #[test]
    fn test_escaping_keys_rejected() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("db");
        let mut db = FileRunDb::new(&base);
        db.connect(&SecretsStore::new()).unwrap();

        for record in [
            json!({"metadata": {"uid": "../../escaped"}}),
            json!({"metadata": {"uid": "/abs"}}),
            json!({"metadata": {"uid": "ok", "project": ".."}}),
            json!({"metadata": {"uid": "ok", "project": "../outside"}}),
        ] {
            let err = db.store_run(&record, true).unwrap_err();
            assert!(matches!(err, EngineError::RunDbError(_)), "{:?}", err);
        }

        assert!(db.pending.is_empty());
        assert!(!dir.path().join("escaped-0.json").exists());
        assert!(!dir.path().join("outside").exists());
        assert!(db.read_run("../x", "default", 0).is_err());
        assert!(db.list_runs("../..").is_err());
    }

    #[test]
    fn test_failed_commit_keeps_queue() {
        let dir = tempdir().unwrap();
        let mut db = FileRunDb::new(dir.path());
        db.connect(&SecretsStore::new()).unwrap();

        // a plain file where the project directory should go
        std::fs::write(dir.path().join("runs/blocked"), b"").unwrap();
        db.store_run(&json!({"metadata": {"uid": "a", "project": "blocked"}}), false).unwrap();
        db.store_run(&json!({"metadata": {"uid": "b"}}), false).unwrap();

        assert!(db.commit().is_err());
        assert_eq!(db.pending.len(), 2);

        std::fs::remove_file(dir.path().join("runs/blocked")).unwrap();
        db.commit().unwrap();
        assert!(db.pending.is_empty());
        assert!(db.read_run("a", "blocked", 0).unwrap().is_some());
        assert!(db.read_run("b", "default", 0).unwrap().is_some());
    }

    #[test]
    fn test_commit_requires_connect() {
        let dir = tempdir().unwrap();
        let mut db = FileRunDb::new(dir.path());
        assert!(db.store_run(&json!({"metadata": {"uid": "a"}}), true).is_err());
    }
}
