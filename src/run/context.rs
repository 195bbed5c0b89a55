// src/run/context.rs
//! Execution context for run code
//!
//! A context is created once per run invocation. It is populated from an
//! event payload, an explicit spec document, or a spec inherited from a
//! parent process through the handoff variables:
//!
//! | Variable             | Meaning                                  |
//! |----------------------|------------------------------------------|
//! | `MLRUN_EXEC_CONFIG`  | full run struct, JSON encoded            |
//! | `MLRUN_META_TMPFILE` | path the child writes its record to      |
//! | `MLRUN_META_DBPATH`  | run-database target for autocommit       |
//!
//! The parent never mutates its own environment. It hands the variables to
//! each child as a scoped overlay (see [`HandoffEnv::to_vars`]), and the
//! child reads them back with [`HandoffEnv::from_process`].

use crate::run::run_struct::{object_entry, RunStruct};
use crate::run::secrets::SecretsStore;
use crate::rundb::{get_run_db, DEFAULT_PROJECT};
use crate::utils::errors::{EngineError, Result};
use crate::utils::ids::new_uid;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const EXEC_CONFIG_ENV: &str = "MLRUN_EXEC_CONFIG";
pub const META_TMPFILE_ENV: &str = "MLRUN_META_TMPFILE";
pub const META_DBPATH_ENV: &str = "MLRUN_META_DBPATH";

/// Handoff values passed from a parent to a child process
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandoffEnv {
    pub exec_config: Option<String>,
    pub meta_tmpfile: Option<PathBuf>,
    pub meta_dbpath: Option<String>,
}

impl HandoffEnv {
    /// Read the handoff variables this process inherited
    pub fn from_process() -> Self {
        let non_empty = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            exec_config: non_empty(EXEC_CONFIG_ENV),
            meta_tmpfile: non_empty(META_TMPFILE_ENV).map(PathBuf::from),
            meta_dbpath: non_empty(META_DBPATH_ENV),
        }
    }

    /// Environment overlay for one child
    pub fn to_vars(&self) -> Vec<(String, String)> {
        let mut vars = Vec::with_capacity(3);
        if let Some(config) = &self.exec_config {
            vars.push((EXEC_CONFIG_ENV.to_string(), config.clone()));
        }
        if let Some(tmp) = &self.meta_tmpfile {
            vars.push((META_TMPFILE_ENV.to_string(), tmp.to_string_lossy().into_owned()));
        }
        if let Some(db) = &self.meta_dbpath {
            vars.push((META_DBPATH_ENV.to_string(), db.clone()));
        }
        vars
    }
}

/// Trigger event delivered to a function
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Option<String>,
    pub body: Value,
}

impl Event {
    pub fn new(id: impl Into<String>, body: Value) -> Self {
        Self {
            id: Some(id.into()),
            body,
        }
    }
}

/// Spec handed to [`get_or_create_ctx`]
#[derive(Debug, Clone, PartialEq)]
pub enum SpecInput {
    Document(RunStruct),
    Text(String),
}

impl SpecInput {
    fn from_body(body: &Value) -> Result<Option<Self>> {
        match body {
            Value::Null => Ok(None),
            Value::String(text) if text.is_empty() => Ok(None),
            Value::String(text) => Ok(Some(Self::Text(text.clone()))),
            other => Ok(Some(Self::Document(RunStruct::from_value(other.clone())?))),
        }
    }

    fn resolve(self) -> Result<RunStruct> {
        match self {
            Self::Document(doc) => Ok(doc),
            Self::Text(text) => RunStruct::parse(&text),
        }
    }
}

/// Where inherited handoff values come from
#[derive(Debug, Clone, Default)]
pub enum EnvSource {
    /// Read this process's environment
    #[default]
    Process,
    /// Use these values instead of the environment
    Explicit(HandoffEnv),
    /// Ignore inherited values entirely
    Ignore,
}

/// Arguments to [`get_or_create_ctx`]
#[derive(Debug, Clone, Default)]
pub struct CtxOptions {
    pub uid: Option<String>,
    pub event: Option<Event>,
    pub spec: Option<SpecInput>,
    pub env: EnvSource,
    pub rundb: Option<String>,
}

/// Build the context for the current run.
///
/// Precedence:
///
/// - an event body replaces `spec`, and the event id is used when no `uid`
///   was given
/// - an inherited `MLRUN_EXEC_CONFIG` replaces both (a detached child follows
///   whatever its parent decided)
/// - `uid` falls back to a fresh random token
/// - an inherited `MLRUN_META_DBPATH` wins over `rundb`; any resolved target
///   turns on autocommit
pub fn get_or_create_ctx(name: &str, options: CtxOptions) -> Result<ExecutionContext> {
    let CtxOptions {
        mut uid,
        event,
        mut spec,
        env,
        rundb,
    } = options;

    if let Some(event) = event {
        spec = SpecInput::from_body(&event.body)?;
        if uid.as_deref().map_or(true, str::is_empty) {
            uid = event.id;
        }
    }

    let inherited = match env {
        EnvSource::Process => HandoffEnv::from_process(),
        EnvSource::Explicit(env) => env,
        EnvSource::Ignore => HandoffEnv::default(),
    };

    if let Some(config) = inherited.exec_config {
        debug!("Using inherited {}", EXEC_CONFIG_ENV);
        spec = Some(SpecInput::Text(config));
    }

    let uid = uid.filter(|u| !u.is_empty()).unwrap_or_else(new_uid);
    let rundb = inherited.meta_dbpath.or(rundb).filter(|db| !db.is_empty());

    let mut ctx = ExecutionContext::new(name, uid);
    ctx.autocommit = rundb.is_some();
    ctx.rundb = rundb;
    ctx.tmpfile = inherited.meta_tmpfile;

    if let Some(spec) = spec {
        ctx.from_dict(spec.resolve()?)?;
    }

    info!("Execution context {} ({}) ready", ctx.name, ctx.uid);
    Ok(ctx)
}

/// Run lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Created,
    Running,
    Completed,
    Error,
}

impl RunState {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "created" => Some(Self::Created),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

/// Identity, inputs and outputs of one run
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    name: String,
    uid: String,
    project: String,
    iteration: u64,
    labels: Map<String, Value>,
    parameters: Map<String, Value>,
    inputs: Map<String, Value>,
    results: Map<String, Value>,
    log_level: String,
    state: RunState,
    error: Option<String>,
    secrets: SecretsStore,
    document: RunStruct,
    rundb: Option<String>,
    autocommit: bool,
    tmpfile: Option<PathBuf>,
    start_time: DateTime<Utc>,
}

impl ExecutionContext {
    pub fn new(name: impl Into<String>, uid: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uid: uid.into(),
            project: DEFAULT_PROJECT.to_string(),
            iteration: 0,
            labels: Map::new(),
            parameters: Map::new(),
            inputs: Map::new(),
            results: Map::new(),
            log_level: "info".to_string(),
            state: RunState::Running,
            error: None,
            secrets: SecretsStore::new(),
            document: RunStruct::new(),
            rundb: None,
            autocommit: false,
            tmpfile: None,
            start_time: Utc::now(),
        }
    }

    /// Populate fields from a run document; unknown keys are kept verbatim
    pub fn from_dict(&mut self, doc: RunStruct) -> Result<()> {
        if let Some(meta) = doc.metadata() {
            if let Some(uid) = meta.get("uid").and_then(Value::as_str).filter(|u| !u.is_empty()) {
                self.uid = uid.to_string();
            }
            if let Some(name) = meta.get("name").and_then(Value::as_str).filter(|n| !n.is_empty()) {
                self.name = name.to_string();
            }
            if let Some(project) = meta.get("project").and_then(Value::as_str).filter(|p| !p.is_empty()) {
                self.project = project.to_string();
            }
            if let Some(iteration) = meta.get("iteration").and_then(Value::as_u64) {
                self.iteration = iteration;
            }
            if let Some(labels) = meta.get("labels").and_then(Value::as_object) {
                self.labels.extend(labels.clone());
            }
        }

        if let Some(spec) = doc.spec() {
            if let Some(params) = spec.get("parameters").and_then(Value::as_object) {
                self.parameters.extend(params.clone());
            }
            if let Some(inputs) = spec.get("inputs").and_then(Value::as_object) {
                self.inputs.extend(inputs.clone());
            }
            if let Some(level) = spec.get("log_level").and_then(Value::as_str) {
                self.log_level = level.to_string();
            }
            self.secrets = SecretsStore::from_dict(spec)?;
        }

        if let Some(status) = doc.get("status").and_then(Value::as_object) {
            if let Some(outputs) = status.get("outputs").and_then(Value::as_object) {
                self.results.extend(outputs.clone());
            }
            if let Some(state) = status.get("state").and_then(Value::as_str).and_then(RunState::parse) {
                self.state = state;
            }
        }

        self.document = doc;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn rundb(&self) -> Option<&str> {
        self.rundb.as_deref()
    }

    pub fn autocommit(&self) -> bool {
        self.autocommit
    }

    pub fn tmpfile(&self) -> Option<&Path> {
        self.tmpfile.as_deref()
    }

    /// The document this context was populated from
    pub fn spec_document(&self) -> &RunStruct {
        &self.document
    }

    pub fn parameters(&self) -> &Map<String, Value> {
        &self.parameters
    }

    /// Typed parameter lookup with a fallback
    pub fn get_param<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.parameters
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
            .unwrap_or(default)
    }

    pub fn inputs(&self) -> &Map<String, Value> {
        &self.inputs
    }

    pub fn get_input(&self, key: &str) -> Option<&Value> {
        self.inputs.get(key)
    }

    pub fn secrets(&self) -> &SecretsStore {
        &self.secrets
    }

    pub fn get_secret(&self, key: &str) -> Option<&str> {
        self.secrets.get(key)
    }

    pub fn labels(&self) -> &Map<String, Value> {
        &self.labels
    }

    pub fn set_label(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.labels.insert(key.into(), value.into());
    }

    pub fn results(&self) -> &Map<String, Value> {
        &self.results
    }

    pub fn log_result(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.results.insert(key.into(), value.into());
    }

    pub fn log_results(&mut self, results: Map<String, Value>) {
        self.results.extend(results);
    }

    pub fn set_state(&mut self, state: RunState) {
        self.state = state;
    }

    /// Mark the run failed with a message
    pub fn set_error(&mut self, message: impl Into<String>) {
        self.state = RunState::Error;
        self.error = Some(message.into());
    }

    /// Render the current run record
    pub fn to_dict(&self) -> Value {
        let mut doc = self.document.clone();

        let meta = doc.metadata_mut();
        meta.insert("name".into(), Value::String(self.name.clone()));
        meta.insert("uid".into(), Value::String(self.uid.clone()));
        meta.insert("project".into(), Value::String(self.project.clone()));
        meta.insert("iteration".into(), Value::from(self.iteration));
        meta.insert("labels".into(), Value::Object(self.labels.clone()));

        let spec = doc.spec_mut();
        spec.insert("parameters".into(), Value::Object(self.parameters.clone()));
        spec.insert("inputs".into(), Value::Object(self.inputs.clone()));
        spec.insert("log_level".into(), Value::String(self.log_level.clone()));

        let status = object_entry(doc.as_map_mut(), "status");
        status.insert("state".into(), Value::String(self.state.as_str().into()));
        status.insert("outputs".into(), Value::Object(self.results.clone()));
        status.insert("start_time".into(), Value::String(self.start_time.to_rfc3339()));
        status.insert("last_update".into(), Value::String(Utc::now().to_rfc3339()));
        match &self.error {
            Some(error) => {
                status.insert("error".into(), Value::String(error.clone()));
            }
            None => {
                status.remove("error");
            }
        }

        doc.into_value()
    }

    /// Finish the run: write the handoff file for a waiting parent and, with
    /// autocommit, store the record in the run database.
    pub fn commit(&mut self) -> Result<Value> {
        if matches!(self.state, RunState::Created | RunState::Running) {
            self.state = RunState::Completed;
        }
        let record = self.to_dict();

        if let Some(tmp) = &self.tmpfile {
            std::fs::write(tmp, serde_json::to_vec(&record)?).map_err(|e| {
                EngineError::StorageFailed(format!("Failed to write handoff file {:?}: {}", tmp, e))
            })?;
            debug!("Wrote run record to handoff file {:?}", tmp);
        }

        if self.autocommit {
            if let Some(target) = &self.rundb {
                let mut db = get_run_db(target)?;
                db.connect(&self.secrets)?;
                db.store_run(&record, true)?;
                debug!("Committed run {} to {}", self.uid, target);
            }
        }

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rundb::MemoryRunDb;
    use crate::rundb::RunDb;
    use serde_json::json;
    use std::collections::HashSet;

    fn no_env() -> CtxOptions {
        CtxOptions {
            env: EnvSource::Ignore,
            ..Default::default()
        }
    }

    fn doc(value: Value) -> SpecInput {
        SpecInput::Document(RunStruct::from_value(value).unwrap())
    }

    #[test]
    fn test_generated_uids_are_unique() {
        let uids: HashSet<String> = (0..10_000)
            .map(|_| get_or_create_ctx("t", no_env()).unwrap().uid().to_string())
            .collect();
        assert_eq!(uids.len(), 10_000);
        assert!(uids.iter().all(|u| !u.is_empty()));
    }

    #[test]
    fn test_inherited_spec_wins_over_argument() {
        let ctx = get_or_create_ctx(
            "t",
            CtxOptions {
                spec: Some(doc(json!({"a": 2}))),
                env: EnvSource::Explicit(HandoffEnv {
                    exec_config: Some(r#"{"a":1}"#.to_string()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(ctx.spec_document().get("a"), Some(&json!(1)));
        assert_eq!(ctx.to_dict()["a"], json!(1));
    }

    #[test]
    fn test_ignored_env_keeps_argument() {
        let ctx = get_or_create_ctx(
            "t",
            CtxOptions {
                spec: Some(doc(json!({"a": 2}))),
                ..no_env()
            },
        )
        .unwrap();
        assert_eq!(ctx.spec_document().get("a"), Some(&json!(2)));
    }

    #[test]
    fn test_event_body_and_id() {
        let event = Event::new("evt-1", json!(r#"{"spec": {"parameters": {"lr": 0.1}}}"#));
        let ctx = get_or_create_ctx(
            "t",
            CtxOptions {
                event: Some(event.clone()),
                ..no_env()
            },
        )
        .unwrap();
        assert_eq!(ctx.uid(), "evt-1");
        assert_eq!(ctx.get_param("lr", 0.0_f64), 0.1);

        let ctx = get_or_create_ctx(
            "t",
            CtxOptions {
                uid: Some("explicit".into()),
                event: Some(event),
                ..no_env()
            },
        )
        .unwrap();
        assert_eq!(ctx.uid(), "explicit");
    }

    #[test]
    fn test_spec_metadata_overrides_identity() {
        let ctx = get_or_create_ctx(
            "arg-name",
            CtxOptions {
                uid: Some("arg-uid".into()),
                spec: Some(SpecInput::Text(
                    "metadata:\n  name: train\n  uid: doc-uid\n  project: fraud\n".into(),
                )),
                ..no_env()
            },
        )
        .unwrap();
        assert_eq!(ctx.name(), "train");
        assert_eq!(ctx.uid(), "doc-uid");
        assert_eq!(ctx.project(), "fraud");
    }

    #[test]
    fn test_rundb_and_autocommit() {
        let ctx = get_or_create_ctx("t", no_env()).unwrap();
        assert!(!ctx.autocommit());
        assert!(ctx.rundb().is_none());

        let ctx = get_or_create_ctx(
            "t",
            CtxOptions {
                rundb: Some("memory://arg".into()),
                ..no_env()
            },
        )
        .unwrap();
        assert!(ctx.autocommit());
        assert_eq!(ctx.rundb(), Some("memory://arg"));

        let ctx = get_or_create_ctx(
            "t",
            CtxOptions {
                rundb: Some("memory://arg".into()),
                env: EnvSource::Explicit(HandoffEnv {
                    meta_dbpath: Some("memory://env".into()),
                    meta_tmpfile: Some(PathBuf::from("/tmp/handoff.json")),
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(ctx.rundb(), Some("memory://env"));
        assert_eq!(ctx.tmpfile(), Some(Path::new("/tmp/handoff.json")));
    }

    #[test]
    fn test_malformed_text_spec() {
        let result = get_or_create_ctx(
            "t",
            CtxOptions {
                spec: Some(SpecInput::Text("[1, 2, 3]".into())),
                ..no_env()
            },
        );
        assert!(result.unwrap_err().is_configuration_error());
    }

    #[test]
    fn test_commit_writes_handoff_and_rundb() {
        let dir = tempfile::tempdir().unwrap();
        let handoff = dir.path().join("meta.json");

        let mut ctx = get_or_create_ctx(
            "train",
            CtxOptions {
                uid: Some("commit-1".into()),
                env: EnvSource::Explicit(HandoffEnv {
                    meta_tmpfile: Some(handoff.clone()),
                    meta_dbpath: Some("memory://ctx-commit".into()),
                    ..Default::default()
                }),
                ..Default::default()
            },
        )
        .unwrap();
        ctx.log_result("accuracy", 0.93);
        ctx.set_label("owner", "ml-team");
        let record = ctx.commit().unwrap();

        assert_eq!(record["status"]["state"], "completed");
        assert_eq!(record["status"]["outputs"]["accuracy"], json!(0.93));

        let written: Value = serde_json::from_slice(&std::fs::read(&handoff).unwrap()).unwrap();
        assert_eq!(written["metadata"]["uid"], "commit-1");

        let db = MemoryRunDb::named("ctx-commit");
        let stored = db.read_run("commit-1", "default", 0).unwrap().unwrap();
        assert_eq!(stored["metadata"]["labels"]["owner"], "ml-team");
    }

    #[test]
    fn test_error_state_survives_commit() {
        let mut ctx = get_or_create_ctx("t", no_env()).unwrap();
        ctx.set_error("bad input");
        let record = ctx.commit().unwrap();
        assert_eq!(record["status"]["state"], "error");
        assert_eq!(record["status"]["error"], "bad input");
    }

    #[test]
    fn test_handoff_vars() {
        let env = HandoffEnv {
            exec_config: Some("{}".into()),
            meta_tmpfile: None,
            meta_dbpath: Some("memory://x".into()),
        };
        let vars = env.to_vars();
        assert_eq!(
            vars,
            vec![
                (EXEC_CONFIG_ENV.to_string(), "{}".to_string()),
                (META_DBPATH_ENV.to_string(), "memory://x".to_string()),
            ]
        );
    }
}
