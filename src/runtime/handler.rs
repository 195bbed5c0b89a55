// src/runtime/handler.rs
//! In-process handler runtime
//!
//! Calls a user function with a [`FunctionContext`] and an [`Event`] whose
//! body is the JSON-encoded run struct, the same shape a serverless trigger
//! would deliver.

use crate::run::context::Event;
use crate::run::outcome::{RunOutcome, SoftFailure};
use crate::run::run_struct::RunStruct;
use crate::runtime::base::RuntimeBase;
use crate::runtime::kind::RuntimeKind;
use crate::utils::errors::Result;
use crate::utils::ids::new_event_id;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn, Level};

/// User function invoked by [`HandlerRuntime`]
pub type HandlerFn = Arc<dyn Fn(&mut FunctionContext, Event) -> Result<Value> + Send + Sync>;

/// Logger handed to handler functions.
///
/// Messages below the logger's level are dropped before they reach the
/// global subscriber.
#[derive(Debug, Clone)]
pub struct FunctionLogger {
    name: String,
    level: Level,
}

impl FunctionLogger {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            level: Level::INFO,
        }
    }

    pub fn level(&self) -> Level {
        self.level
    }

    pub fn set_level(&mut self, level: Level) {
        self.level = level;
    }

    fn enabled(&self, level: Level) -> bool {
        // tracing orders levels by verbosity: TRACE > DEBUG > INFO
        level <= self.level
    }

    pub fn debug(&self, message: &str) {
        if self.enabled(Level::DEBUG) {
            debug!(target: "mlrun_engine::handler", function = %self.name, "{}", message);
        }
    }

    pub fn info(&self, message: &str) {
        if self.enabled(Level::INFO) {
            info!(target: "mlrun_engine::handler", function = %self.name, "{}", message);
        }
    }

    pub fn warn(&self, message: &str) {
        if self.enabled(Level::WARN) {
            warn!(target: "mlrun_engine::handler", function = %self.name, "{}", message);
        }
    }

    pub fn error(&self, message: &str) {
        error!(target: "mlrun_engine::handler", function = %self.name, "{}", message);
    }
}

/// Context passed to handler functions
#[derive(Debug, Clone)]
pub struct FunctionContext {
    pub logger: FunctionLogger,
    pub rundb: Option<String>,
}

impl FunctionContext {
    pub fn new(name: impl Into<String>, rundb: Option<String>) -> Self {
        Self {
            logger: FunctionLogger::new(name),
            rundb,
        }
    }

    pub fn set_logger_level(&mut self, verbose: bool) {
        let level = if verbose { Level::DEBUG } else { Level::INFO };
        self.logger.set_level(level);
    }
}

#[derive(Clone)]
pub struct HandlerRuntime {
    pub base: RuntimeBase,
    handler: HandlerFn,
    verbose: bool,
}

impl std::fmt::Debug for HandlerRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRuntime")
            .field("base", &self.base)
            .field("verbose", &self.verbose)
            .finish_non_exhaustive()
    }
}

impl HandlerRuntime {
    pub fn new(handler: HandlerFn) -> Self {
        Self {
            base: RuntimeBase::default(),
            handler,
            verbose: false,
        }
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn process_struct(&mut self, run: &mut RunStruct) {
        self.base.process_struct(RuntimeKind::Handler, run);
    }

    pub async fn run(&mut self, run: &mut RunStruct) -> Result<RunOutcome> {
        let name = run.name().unwrap_or("handler").to_string();
        let mut context = FunctionContext::new(name, self.base.rundb.clone());
        context.set_logger_level(self.verbose);

        let event = Event::new(new_event_id(), Value::String(run.to_json()?));
        debug!("Invoking handler with event {:?}", event.id);

        match (self.handler)(&mut context, event) {
            Ok(Value::Null) => {
                warn!("Handler returned no record");
                Ok(RunOutcome::Failed(SoftFailure::EmptyResponse))
            }
            Ok(record) => Ok(RunOutcome::Completed(record)),
            Err(e) => {
                warn!("Handler failed: {}", e);
                Ok(RunOutcome::Failed(SoftFailure::HandlerFailed {
                    message: e.to_string(),
                }))
            }
        }
    }
}
