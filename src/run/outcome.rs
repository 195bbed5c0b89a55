// src/run/outcome.rs
//! Result of executing a run on a backend
//!
//! Backends fail open: a child that crashed or a remote that answered 500
//! has usually reported through its own channel already (stderr, the run
//! database), so the orchestrator gets a `Failed` outcome with a reason
//! instead of an error.

use serde_json::Value;
use std::fmt;
use std::path::PathBuf;

/// Completed run record as returned by a backend
pub type RunRecord = Value;

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    /// The backend produced a run record
    Completed(RunRecord),

    /// Fire-and-forget submission was accepted; completion is reported to
    /// the run database out of band
    Submitted { uid: String, job: String },

    /// The backend ran (or tried to) but produced no record
    Failed(SoftFailure),
}

impl RunOutcome {
    pub fn record(&self) -> Option<&RunRecord> {
        match self {
            Self::Completed(record) => Some(record),
            _ => None,
        }
    }

    pub fn into_record(self) -> Option<RunRecord> {
        match self {
            Self::Completed(record) => Some(record),
            _ => None,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    pub fn failure(&self) -> Option<&SoftFailure> {
        match self {
            Self::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

/// Why a backend produced no record
#[derive(Debug, Clone, PartialEq)]
pub enum SoftFailure {
    /// The child never wrote its handoff file
    MissingHandoff {
        path: PathBuf,
        exit_code: Option<i32>,
    },

    /// The handoff file exists but is not JSON
    UnreadableHandoff { path: PathBuf, reason: String },

    /// The child was killed after the configured timeout
    TimedOut { after_secs: u64 },

    /// The remote function answered with a non-success status
    HttpStatus { status: u16 },

    /// The remote function answered 2xx with a body that is not JSON
    InvalidResponse { reason: String },

    /// The in-process handler returned an error
    HandlerFailed { message: String },

    /// The in-process handler returned nothing
    EmptyResponse,
}

impl SoftFailure {
    /// Short label used in metrics
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MissingHandoff { .. } => "missing_handoff",
            Self::UnreadableHandoff { .. } => "unreadable_handoff",
            Self::TimedOut { .. } => "timed_out",
            Self::HttpStatus { .. } => "http_status",
            Self::InvalidResponse { .. } => "invalid_response",
            Self::HandlerFailed { .. } => "handler_failed",
            Self::EmptyResponse => "empty_response",
        }
    }
}

impl fmt::Display for SoftFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingHandoff { path, exit_code } => match exit_code {
                Some(code) => write!(
                    f,
                    "handoff file {} was not written (exit code {})",
                    path.display(),
                    code
                ),
                None => write!(f, "handoff file {} was not written", path.display()),
            },
            Self::UnreadableHandoff { path, reason } => {
                write!(f, "handoff file {} is unreadable: {}", path.display(), reason)
            }
            Self::TimedOut { after_secs } => write!(f, "run timed out after {}s", after_secs),
            Self::HttpStatus { status } => write!(f, "remote function returned status {}", status),
            Self::InvalidResponse { reason } => write!(f, "invalid remote response: {}", reason),
            Self::HandlerFailed { message } => write!(f, "handler failed: {}", message),
            Self::EmptyResponse => write!(f, "handler returned no result"),
        }
    }
}
