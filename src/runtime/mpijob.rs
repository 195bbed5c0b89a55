// src/runtime/mpijob.rs
//! Distributed (MPI) runtime
//!
//! Builds an `MPIJob` from `spec.runtime.spec`, injects the same handoff
//! variables a local child gets, submits it, and returns immediately.
//! Workers report completion to the run database themselves.

use crate::run::context::HandoffEnv;
use crate::run::outcome::RunOutcome;
use crate::run::run_struct::RunStruct;
use crate::runtime::base::RuntimeBase;
use crate::runtime::kind::RuntimeKind;
use crate::utils::config::MpiJobConfig;
use crate::utils::errors::{EngineError, Result};
use crate::utils::ids::new_uid;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

pub const UID_LABEL: &str = "mlrun/uid";

/// Name/value pair in a container environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

/// MPI job description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MpiJob {
    pub name: String,
    pub namespace: Option<String>,
    pub image: String,
    pub command: Vec<String>,
    pub replicas: u32,
    pub env: Vec<EnvVar>,
    pub labels: BTreeMap<String, String>,
    pub resources: Option<Value>,
}

impl Default for MpiJob {
    fn default() -> Self {
        Self {
            name: "mlrun-mpijob".to_string(),
            namespace: None,
            image: String::new(),
            command: vec![],
            replicas: 1,
            env: vec![],
            labels: BTreeMap::new(),
            resources: None,
        }
    }
}

impl MpiJob {
    pub fn from_dict(spec: Value) -> Result<Self> {
        let job: MpiJob = serde_json::from_value(spec)
            .map_err(|e| EngineError::InvalidRunStruct(format!("bad mpijob spec: {}", e)))?;

        if job.image.is_empty() {
            return Err(EngineError::InvalidRunStruct("mpijob spec needs an image".into()));
        }
        if job.replicas == 0 {
            return Err(EngineError::InvalidRunStruct("mpijob replicas must be positive".into()));
        }
        Ok(job)
    }

    /// Set an environment variable, replacing any previous value
    pub fn env(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        let value = value.into();
        match self.env.iter_mut().find(|var| var.name == name) {
            Some(var) => var.value = value,
            None => self.env.push(EnvVar { name, value }),
        }
        self
    }

    pub fn get_env(&self, name: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|var| var.name == name)
            .map(|var| var.value.as_str())
    }

    /// Render the Kubeflow `MPIJob` resource
    pub fn to_manifest(&self, api_version: &str, default_namespace: &str) -> Value {
        let mut container = json!({
            "name": "mpi",
            "image": self.image,
            "env": self.env,
        });
        if !self.command.is_empty() {
            container["command"] = json!(self.command);
        }
        if let Some(resources) = &self.resources {
            container["resources"] = resources.clone();
        }

        json!({
            "apiVersion": api_version,
            "kind": "MPIJob",
            "metadata": {
                "name": self.name,
                "namespace": self.namespace.as_deref().unwrap_or(default_namespace),
                "labels": self.labels,
            },
            "spec": {
                "replicas": self.replicas,
                "template": {
                    "spec": {
                        "containers": [container],
                        "restartPolicy": "OnFailure",
                    }
                }
            }
        })
    }
}

/// Cluster job submission client
pub trait JobSubmitter: Send + Sync {
    /// Submit a job; returns the submitted job's name
    fn submit(&self, job: &MpiJob) -> Result<String>;
}

/// Writes each job as a YAML manifest for an external applier
#[derive(Debug, Clone)]
pub struct ManifestJobSubmitter {
    dir: PathBuf,
    api_version: String,
    namespace: String,
}

impl ManifestJobSubmitter {
    pub fn new(config: &MpiJobConfig) -> Self {
        Self {
            dir: config.manifest_dir.clone(),
            api_version: config.api_version.clone(),
            namespace: config.namespace.clone(),
        }
    }
}

impl JobSubmitter for ManifestJobSubmitter {
    fn submit(&self, job: &MpiJob) -> Result<String> {
        std::fs::create_dir_all(&self.dir).map_err(|e| {
            EngineError::JobSubmission(format!("cannot create {:?}: {}", self.dir, e))
        })?;

        let manifest = job.to_manifest(&self.api_version, &self.namespace);
        let path = self.dir.join(format!("{}.yaml", job.name));
        std::fs::write(&path, serde_yaml::to_string(&manifest)?)
            .map_err(|e| EngineError::JobSubmission(format!("cannot write {:?}: {}", path, e)))?;

        info!("Wrote MPIJob manifest {:?}", path);
        Ok(job.name.clone())
    }
}

/// Keeps submitted jobs in memory
#[derive(Debug, Default)]
pub struct RecordingJobSubmitter {
    jobs: Mutex<Vec<MpiJob>>,
}

impl RecordingJobSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submitted(&self) -> Vec<MpiJob> {
        self.jobs.lock().clone()
    }
}

impl JobSubmitter for RecordingJobSubmitter {
    fn submit(&self, job: &MpiJob) -> Result<String> {
        self.jobs.lock().push(job.clone());
        Ok(job.name.clone())
    }
}

#[derive(Clone)]
pub struct MpiRuntime {
    pub base: RuntimeBase,
    submitter: Arc<dyn JobSubmitter>,
}

impl std::fmt::Debug for MpiRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MpiRuntime").field("base", &self.base).finish()
    }
}

impl MpiRuntime {
    pub fn new(command: Option<String>, args: Vec<String>, submitter: Arc<dyn JobSubmitter>) -> Self {
        Self {
            base: RuntimeBase::new(command, args),
            submitter,
        }
    }

    pub fn process_struct(&mut self, run: &mut RunStruct) {
        self.base.process_struct(RuntimeKind::MpiJob, run);
    }

    pub async fn run(&mut self, run: &mut RunStruct) -> Result<RunOutcome> {
        let uid = match run.uid() {
            Some(uid) => uid.to_string(),
            None => {
                let uid = new_uid();
                run.set_uid(uid.clone());
                uid
            }
        };

        let job_spec = run
            .runtime()
            .and_then(|runtime| runtime.get("spec"))
            .cloned()
            .ok_or_else(|| EngineError::ConfigError("mpijob runtime needs spec.runtime.spec".into()))?;

        let mut job = MpiJob::from_dict(job_spec)?;
        job.name = format!("{}-{}", job.name, &uid[..uid.len().min(8)]);
        job.labels.insert(UID_LABEL.to_string(), uid.clone());

        if job.command.is_empty() {
            if let Some(command) = &self.base.command {
                job.command.push(command.clone());
                job.command.extend(self.base.args.iter().cloned());
            }
        }

        let handoff = HandoffEnv {
            exec_config: Some(run.to_json()?),
            meta_tmpfile: None,
            meta_dbpath: self.base.rundb.clone(),
        };
        for (name, value) in handoff.to_vars() {
            job.env(name, value);
        }

        let name = self.submitter.submit(&job)?;
        info!("Submitted MPI job {} for run {}", name, uid);

        Ok(RunOutcome::Submitted { uid, job: name })
    }
}
