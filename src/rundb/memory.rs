// src/rundb/memory.rs
//! In-process run database
//!
//! Stores are shared by name for the life of the process, so a record
//! committed through one `memory://name` client is visible to the next.

use crate::rundb::{RunDb, RunKey};
use crate::run::secrets::SecretsStore;
use crate::utils::errors::Result;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

type Store = Arc<Mutex<BTreeMap<RunKey, Value>>>;

static STORES: Lazy<Mutex<HashMap<String, Store>>> = Lazy::new(|| Mutex::new(HashMap::new()));

pub struct MemoryRunDb {
    store: Store,
    pending: Vec<(RunKey, Value)>,
    connected_with: Option<Vec<String>>,
}

impl MemoryRunDb {
    /// Client for the process-wide store called `name`
    pub fn named(name: &str) -> Self {
        let store = STORES
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(BTreeMap::new())))
            .clone();

        Self {
            store,
            pending: Vec::new(),
            connected_with: None,
        }
    }

    /// Secret names seen at connect time, if connected
    pub fn connected_with(&self) -> Option<&[String]> {
        self.connected_with.as_deref()
    }
}

impl RunDb for MemoryRunDb {
    fn connect(&mut self, secrets: &SecretsStore) -> Result<()> {
        self.connected_with = Some(secrets.keys().map(str::to_string).collect());
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
        let mut store = self.store.lock();
        for (key, record) in self.pending.drain(..) {
            store.insert(key, record);
        }
        Ok(())
    }

    fn read_run(&self, uid: &str, project: &str, iteration: u64) -> Result<Option<Value>> {
        let key = RunKey {
            project: project.to_string(),
            uid: uid.to_string(),
            iteration,
        };
        Ok(self.store.lock().get(&key).cloned())
    }

    fn list_runs(&self, project: &str) -> Result<Vec<Value>> {
        Ok(self
            .store
            .lock()
            .iter()
            .filter(|(key, _)| key.project == project)
            .map(|(_, run)| run.clone())
            .collect())
    }
}
