// src/runtime/kind.rs
//! Runtime kind discriminator

use crate::utils::errors::{EngineError, Result};
use std::fmt;
use std::str::FromStr;

/// Execution backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeKind {
    /// Detached child process on this host
    Local,
    /// HTTP-triggered remote function
    Remote,
    /// Distributed MPI job, fire-and-forget
    MpiJob,
    /// In-process callable
    Handler,
}

impl RuntimeKind {
    /// Value written to `spec.runtime.kind`
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeKind::Local => "local",
            RuntimeKind::Remote => "remote",
            RuntimeKind::MpiJob => "mpijob",
            RuntimeKind::Handler => "handler",
        }
    }

    /// Pick Remote or Local from a bare command string
    pub fn for_command(command: &str) -> Self {
        if command.contains("://") {
            RuntimeKind::Remote
        } else {
            RuntimeKind::Local
        }
    }
}

impl FromStr for RuntimeKind {
    type Err = EngineError;

    fn from_str(kind: &str) -> Result<Self> {
        match kind {
            "" | "local" => Ok(RuntimeKind::Local),
            "remote" => Ok(RuntimeKind::Remote),
            "mpijob" => Ok(RuntimeKind::MpiJob),
            "handler" => Ok(RuntimeKind::Handler),
            other => Err(EngineError::UnsupportedRuntime {
                kind: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_kinds() {
        assert_eq!("".parse::<RuntimeKind>().unwrap(), RuntimeKind::Local);
        assert_eq!("local".parse::<RuntimeKind>().unwrap(), RuntimeKind::Local);
        assert_eq!("remote".parse::<RuntimeKind>().unwrap(), RuntimeKind::Remote);
        assert_eq!("mpijob".parse::<RuntimeKind>().unwrap(), RuntimeKind::MpiJob);
    }

    #[test]
    fn test_parse_unknown_kind() {
        match "spark".parse::<RuntimeKind>() {
            Err(EngineError::UnsupportedRuntime { kind }) => assert_eq!(kind, "spark"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_round_trip_names() {
        for kind in [
            RuntimeKind::Local,
            RuntimeKind::Remote,
            RuntimeKind::MpiJob,
            RuntimeKind::Handler,
        ] {
            assert_eq!(kind.as_str().parse::<RuntimeKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_for_command() {
        assert_eq!(RuntimeKind::for_command("http://host/fn"), RuntimeKind::Remote);
        assert_eq!(RuntimeKind::for_command("./script.py"), RuntimeKind::Local);
    }
}
