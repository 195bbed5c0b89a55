// src/run/mod.rs
//! Run documents and the per-run execution context
//!
//! - **Run Struct**: the JSON document passed across every boundary
//! - **Context**: identity, parameters and results of one run, plus the
//!   parent/child handoff protocol
//! - **Secrets**: secret sources and their wire form
//! - **Outcome**: what a backend produced (record, submission, soft failure)

pub mod context;
pub mod outcome;
pub mod run_struct;
pub mod secrets;

pub use context::{
    get_or_create_ctx, CtxOptions, EnvSource, Event, ExecutionContext, HandoffEnv, RunState,
    SpecInput, EXEC_CONFIG_ENV, META_DBPATH_ENV, META_TMPFILE_ENV,
};
pub use outcome::{RunOutcome, RunRecord, SoftFailure};
pub use run_struct::RunStruct;
pub use secrets::{SecretSource, SecretSourceKind, SecretsStore};
