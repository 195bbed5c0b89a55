// src/runtime/base.rs
//! Fields and struct normalization shared by every runtime

use crate::run::run_struct::RunStruct;
use crate::runtime::kind::RuntimeKind;
use serde_json::Value;

/// Command, arguments and run-database target of a runtime
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeBase {
    pub command: Option<String>,
    pub args: Vec<String>,
    pub rundb: Option<String>,
}

impl RuntimeBase {
    pub fn new(command: Option<String>, args: Vec<String>) -> Self {
        Self {
            command: command.filter(|c| !c.is_empty()),
            args,
            rundb: None,
        }
    }

    /// Normalize `spec.runtime` for `kind`.
    ///
    /// The kind is always overwritten. An explicit command/args is written
    /// into the struct; otherwise it is read back from the struct. Calling
    /// this twice leaves the struct unchanged the second time.
    pub fn process_struct(&mut self, kind: RuntimeKind, run: &mut RunStruct) {
        let runtime = run.runtime_mut();
        runtime.insert("kind".into(), Value::String(kind.as_str().into()));

        if let Some(command) = self.command.clone() {
            runtime.insert("command".into(), Value::String(command));
        } else {
            self.command = runtime
                .get("command")
                .and_then(Value::as_str)
                .filter(|c| !c.is_empty())
                .map(str::to_string);
        }

        if self.args.is_empty() {
            self.args = runtime
                .get("args")
                .and_then(Value::as_array)
                .map(|args| args.iter().map(arg_to_string).collect())
                .unwrap_or_default();
        } else {
            runtime.insert(
                "args".into(),
                Value::Array(self.args.iter().cloned().map(Value::String).collect()),
            );
        }
    }
}

fn arg_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
