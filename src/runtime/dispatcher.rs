// src/runtime/dispatcher.rs
//! Runtime selection and the `run_start` entry point
//!
//! Resolution order, first match wins:
//!
//! 1. a handler callable
//! 2. an explicit runtime descriptor, merged into `spec.runtime`
//! 3. `spec.runtime.kind`
//! 4. a bare command (`://` means remote)
//! 5. nothing usable: configuration error

use crate::export::{MetadataExporter, PipelineMetadataWriter};
use crate::observability::{record_outcome, record_submitted};
use crate::run::outcome::RunOutcome;
use crate::run::run_struct::RunStruct;
use crate::runtime::handler::{HandlerFn, HandlerRuntime};
use crate::runtime::kind::RuntimeKind;
use crate::runtime::local::LocalRuntime;
use crate::runtime::mpijob::{JobSubmitter, ManifestJobSubmitter, MpiRuntime};
use crate::runtime::remote::RemoteRuntime;
use crate::utils::config::EngineConfig;
use crate::utils::errors::{EngineError, Result};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// A resolved runtime, ready for one run
#[derive(Debug)]
pub enum Runtime {
    Local(LocalRuntime),
    Remote(RemoteRuntime),
    Mpi(MpiRuntime),
    Handler(HandlerRuntime),
}

impl Runtime {
    pub fn kind(&self) -> RuntimeKind {
        match self {
            Runtime::Local(_) => RuntimeKind::Local,
            Runtime::Remote(_) => RuntimeKind::Remote,
            Runtime::Mpi(_) => RuntimeKind::MpiJob,
            Runtime::Handler(_) => RuntimeKind::Handler,
        }
    }

    pub fn set_rundb(&mut self, rundb: Option<String>) {
        let rundb = rundb.filter(|db| !db.is_empty());
        match self {
            Runtime::Local(rt) => rt.base.rundb = rundb,
            Runtime::Remote(rt) => rt.base.rundb = rundb,
            Runtime::Mpi(rt) => rt.base.rundb = rundb,
            Runtime::Handler(rt) => rt.base.rundb = rundb,
        }
    }

    pub fn process_struct(&mut self, run: &mut RunStruct) {
        match self {
            Runtime::Local(rt) => rt.process_struct(run),
            Runtime::Remote(rt) => rt.process_struct(run),
            Runtime::Mpi(rt) => rt.process_struct(run),
            Runtime::Handler(rt) => rt.process_struct(run),
        }
    }

    pub async fn run(&mut self, run: &mut RunStruct) -> Result<RunOutcome> {
        match self {
            Runtime::Local(rt) => rt.run(run).await,
            Runtime::Remote(rt) => rt.run(run).await,
            Runtime::Mpi(rt) => rt.run(run).await,
            Runtime::Handler(rt) => rt.run(run).await,
        }
    }
}

/// Explicit runtime description passed by the caller
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeDescriptor {
    Object(Map<String, Value>),
    /// JSON text of an object
    Text(String),
}

impl RuntimeDescriptor {
    pub fn into_map(self) -> Result<Map<String, Value>> {
        match self {
            RuntimeDescriptor::Object(map) => Ok(map),
            RuntimeDescriptor::Text(text) => match serde_json::from_str::<Value>(&text) {
                Ok(Value::Object(map)) => Ok(map),
                Ok(other) => Err(EngineError::ConfigError(format!(
                    "runtime descriptor must be an object, got {}",
                    crate::run::run_struct::type_name(&other)
                ))),
                Err(e) => Err(EngineError::ConfigError(format!(
                    "malformed runtime descriptor: {}",
                    e
                ))),
            },
        }
    }
}

/// Arguments to [`Dispatcher::run_start`]
#[derive(Clone, Default)]
pub struct RunOptions {
    pub runtime: Option<RuntimeDescriptor>,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub rundb: Option<String>,
    pub kfp: bool,
    pub handler: Option<HandlerFn>,
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("runtime", &self.runtime)
            .field("command", &self.command)
            .field("args", &self.args)
            .field("rundb", &self.rundb)
            .field("kfp", &self.kfp)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

/// Resolves runtimes and drives runs
#[derive(Clone)]
pub struct Dispatcher {
    config: EngineConfig,
    submitter: Arc<dyn JobSubmitter>,
    exporter: Arc<dyn MetadataExporter>,
}

impl Dispatcher {
    pub fn new(config: EngineConfig) -> Self {
        let submitter = Arc::new(ManifestJobSubmitter::new(&config.mpijob));
        let exporter = Arc::new(PipelineMetadataWriter::from_config(&config.kfp));
        Self {
            config,
            submitter,
            exporter,
        }
    }

    pub fn with_submitter(mut self, submitter: Arc<dyn JobSubmitter>) -> Self {
        self.submitter = submitter;
        self
    }

    pub fn with_exporter(mut self, exporter: Arc<dyn MetadataExporter>) -> Self {
        self.exporter = exporter;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Pick the runtime for `run`; may merge a descriptor into `spec.runtime`
    pub fn resolve(&self, run: &mut RunStruct, options: &RunOptions) -> Result<Runtime> {
        if let Some(handler) = &options.handler {
            return Ok(Runtime::Handler(HandlerRuntime::new(Arc::clone(handler))));
        }

        if let Some(descriptor) = &options.runtime {
            let descriptor = descriptor.clone().into_map()?;
            run.runtime_mut().extend(descriptor);
        }

        if let Some(kind) = run.runtime().map(|rt| rt.get("kind")) {
            let kind = match kind {
                None | Some(Value::Null) => RuntimeKind::Local,
                Some(Value::String(kind)) => kind.parse()?,
                Some(other) => {
                    return Err(EngineError::UnsupportedRuntime {
                        kind: other.to_string(),
                    })
                }
            };
            return self.build(kind, None, vec![]);
        }

        match options.command.as_deref().filter(|c| !c.is_empty()) {
            Some(command) => self.build(
                RuntimeKind::for_command(command),
                Some(command.to_string()),
                options.args.clone(),
            ),
            None => Err(EngineError::ConfigError(
                "runtime was not specified via struct, runtime or command".into(),
            )),
        }
    }

    fn build(&self, kind: RuntimeKind, command: Option<String>, args: Vec<String>) -> Result<Runtime> {
        match kind {
            RuntimeKind::Local => Ok(Runtime::Local(LocalRuntime::new(
                command,
                args,
                self.config.local.clone(),
            ))),
            RuntimeKind::Remote => Ok(Runtime::Remote(RemoteRuntime::new(
                command,
                args,
                self.config.remote.clone(),
            ))),
            RuntimeKind::MpiJob => Ok(Runtime::Mpi(MpiRuntime::new(
                command,
                args,
                Arc::clone(&self.submitter),
            ))),
            RuntimeKind::Handler => Err(EngineError::UnsupportedRuntime {
                kind: kind.as_str().to_string(),
            }),
        }
    }

    /// Resolve a runtime, run the struct on it, and post-process the result
    pub async fn run_start(&self, mut run: RunStruct, options: RunOptions) -> Result<RunOutcome> {
        let mut runtime = self.resolve(&mut run, &options)?;
        let kind = runtime.kind();

        runtime.set_rundb(options.rundb.clone().or_else(|| self.config.rundb.clone()));
        runtime.process_struct(&mut run);

        info!("Starting {} run {}", kind, run.uid().unwrap_or("(new)"));
        record_submitted(kind);
        let started = Instant::now();
        let outcome = runtime.run(&mut run).await?;
        record_outcome(kind, &outcome, started.elapsed());

        match &outcome {
            RunOutcome::Completed(record) if options.kfp => {
                if let Err(e) = self.exporter.write_metadata(record) {
                    warn!("Pipeline metadata export failed: {}", e);
                }
            }
            RunOutcome::Failed(reason) => warn!("{} run produced no record: {}", kind, reason),
            _ => {}
        }

        Ok(outcome)
    }
}
