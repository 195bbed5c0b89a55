// src/run/run_struct.rs
//! The run struct: the one document that crosses every process and network
//! boundary.
//!
//! It stays a plain JSON mapping so unknown keys survive every hop. Typed
//! accessors create intermediate objects on demand, the way the runtimes
//! expect `spec` and `spec.runtime` to always exist after processing.

use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Mutable run document (`metadata`, `spec`, `status`, ...)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunStruct(Map<String, Value>);

impl RunStruct {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wrap a JSON value; anything but an object is rejected.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::new()),
            other => Err(EngineError::InvalidRunStruct(format!(
                "expected a mapping, got {}",
                type_name(&other)
            ))),
        }
    }

    /// Parse a text-encoded struct.
    ///
    /// YAML is accepted as a data-only format; JSON parses as a subset of it.
    pub fn parse(text: &str) -> Result<Self> {
        let value: Value = serde_yaml::from_str(text)
            .map_err(|e| EngineError::InvalidRunStruct(format!("cannot parse run struct: {}", e)))?;
        Self::from_value(value)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn as_map_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn metadata(&self) -> Option<&Map<String, Value>> {
        self.0.get("metadata").and_then(Value::as_object)
    }

    pub fn metadata_mut(&mut self) -> &mut Map<String, Value> {
        object_entry(&mut self.0, "metadata")
    }

    pub fn spec(&self) -> Option<&Map<String, Value>> {
        self.0.get("spec").and_then(Value::as_object)
    }

    pub fn spec_mut(&mut self) -> &mut Map<String, Value> {
        object_entry(&mut self.0, "spec")
    }

    /// `spec.runtime`, if present and a mapping
    pub fn runtime(&self) -> Option<&Map<String, Value>> {
        self.spec()
            .and_then(|spec| spec.get("runtime"))
            .and_then(Value::as_object)
    }

    pub fn runtime_mut(&mut self) -> &mut Map<String, Value> {
        object_entry(self.spec_mut(), "runtime")
    }

    /// `spec.runtime.kind` as written, if it is a string
    pub fn runtime_kind(&self) -> Option<&str> {
        self.runtime()
            .and_then(|runtime| runtime.get("kind"))
            .and_then(Value::as_str)
    }

    pub fn uid(&self) -> Option<&str> {
        self.metadata()
            .and_then(|meta| meta.get("uid"))
            .and_then(Value::as_str)
            .filter(|uid| !uid.is_empty())
    }

    pub fn set_uid(&mut self, uid: impl Into<String>) {
        self.metadata_mut().insert("uid".into(), Value::String(uid.into()));
    }

    pub fn name(&self) -> Option<&str> {
        self.metadata()
            .and_then(|meta| meta.get("name"))
            .and_then(Value::as_str)
    }

    /// `spec.log_level`, if set
    pub fn log_level(&self) -> Option<&str> {
        self.spec()
            .and_then(|spec| spec.get("log_level"))
            .and_then(Value::as_str)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for RunStruct {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Get `map[key]` as an object, replacing a missing or non-object value.
pub(crate) fn object_entry<'a>(map: &'a mut Map<String, Value>, key: &str) -> &'a mut Map<String, Value> {
    let slot = map
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    match slot {
        Value::Object(inner) => inner,
        _ => unreachable!("slot was just made an object"),
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "a mapping",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accessors_create_missing_sections() {
        let mut run = RunStruct::new();
        run.runtime_mut().insert("kind".into(), json!("remote"));

        assert_eq!(run.runtime_kind(), Some("remote"));
        assert_eq!(run.into_value(), json!({"spec": {"runtime": {"kind": "remote"}}}));
    }

    #[test]
    fn test_parse_yaml_and_json() {
        let yaml = RunStruct::parse("metadata:\n  name: train\n  uid: abc\n").unwrap();
        assert_eq!(yaml.name(), Some("train"));
        assert_eq!(yaml.uid(), Some("abc"));

        let json = RunStruct::parse(r#"{"spec": {"log_level": "debug"}}"#).unwrap();
        assert_eq!(json.log_level(), Some("debug"));
    }

    #[test]
    fn test_non_mapping_rejected() {
        let err = RunStruct::from_value(json!([1, 2])).unwrap_err();
        assert!(err.is_configuration_error());
        assert!(RunStruct::parse("just a string").is_err());
    }

    #[test]
    fn test_unknown_keys_survive() {
        let run = RunStruct::from_value(json!({"custom": {"x": 1}, "spec": {}})).unwrap();
        let text = run.to_json().unwrap();
        let back: RunStruct = serde_json::from_str(&text).unwrap();
        assert_eq!(back.get("custom"), Some(&json!({"x": 1})));
    }

    #[test]
    fn test_empty_uid_treated_as_absent() {
        let run = RunStruct::from_value(json!({"metadata": {"uid": ""}})).unwrap();
        assert!(run.uid().is_none());
    }
}
