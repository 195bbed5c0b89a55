// src/lib.rs
//! MLRun Execution Engine Library
//!
//! This library runs ML jobs described by a run struct on one of several
//! backends and hands the resulting run record back to the caller.
//!
//! # Architecture
//!
//! The engine is structured into several key modules:
//!
//! - **run**: run structs, execution context, secrets, outcomes
//! - **runtime**: dispatcher plus local, remote, MPI and handler runtimes
//! - **rundb**: run database clients (file, SQLite, in-memory)
//! - **export**: post-run pipeline metadata
//! - **observability**: tracing and metrics
//! - **utils**: configuration, errors, identifiers

// Public module exports
pub mod export;
pub mod observability;
pub mod run;
pub mod rundb;
pub mod runtime;
pub mod utils;

// Re-export commonly used types
pub use run::context::{get_or_create_ctx, CtxOptions, ExecutionContext};
pub use run::outcome::{RunOutcome, SoftFailure};
pub use run::run_struct::RunStruct;
pub use rundb::{get_run_db, RunDb};
pub use runtime::dispatcher::{Dispatcher, RunOptions};
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
