// src/runtime/mod.rs
//! Run execution backends
//!
//! This module provides the runtimes a run struct can be dispatched to:
//!
//! - **Dispatcher**: picks a runtime and drives `run_start`
//! - **Local**: detached child process with a file handoff
//! - **Remote**: HTTP-triggered function
//! - **MPI Job**: distributed job, submitted and left running
//! - **Handler**: in-process callable
//! - **Process Manager**: child spawning, output capture, timeouts
//!
//! # Architecture
//!
//! ```text
//!                 run_start(struct, options)
//!                            │
//!                       Dispatcher
//!        ┌──────────┬────────┴──┬─────────────┐
//!        ▼          ▼           ▼             ▼
//!     Handler     Local       Remote        MpiJob
//!   (callable)  (child +    (HTTP PUT)   (JobSubmitter)
//!                handoff)
//!        │          │           │             │
//!        └──────────┴─────┬─────┘             │
//!                         ▼                   ▼
//!              RunOutcome::Completed   RunOutcome::Submitted
//! ```

pub mod base;
pub mod dispatcher;
pub mod handler;
pub mod kind;
pub mod local;
pub mod mpijob;
pub mod process_manager;
pub mod remote;

// Re-export commonly used types
pub use base::RuntimeBase;
pub use dispatcher::{Dispatcher, RunOptions, Runtime, RuntimeDescriptor};
pub use handler::{FunctionContext, FunctionLogger, HandlerFn, HandlerRuntime};
pub use kind::RuntimeKind;
pub use local::{ExitCodePolicy, LocalRuntime};
pub use mpijob::{JobSubmitter, ManifestJobSubmitter, MpiJob, MpiRuntime, RecordingJobSubmitter};
pub use process_manager::{ProcessManager, ProcessOutput, SpawnConfig};
pub use remote::RemoteRuntime;
