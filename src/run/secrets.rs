// src/run/secrets.rs
//! Secrets propagation
//!
//! Secrets are declared in `spec.secret_sources` as `{kind, source}`
//! descriptors and resolved into a name → value map on whichever side
//! needs them. Only the descriptors travel with the run struct; `file` and
//! `env` sources are re-resolved on the receiving side, so their values
//! never appear in the struct.
//!
//! Supported kinds:
//!
//! - `inline`: a mapping (or JSON text of one) of name → value
//! - `file`: path to a file of `KEY=VALUE` lines
//! - `env`: comma separated environment variable names

use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

/// Kinds of secret source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretSourceKind {
    Inline,
    File,
    Env,
}

/// Serialized secret source descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretSource {
    pub kind: SecretSourceKind,
    pub source: Value,
}

/// Resolved secrets for one run
#[derive(Clone, Default)]
pub struct SecretsStore {
    secrets: BTreeMap<String, String>,
    sources: Vec<SecretSource>,
}

impl SecretsStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a spec mapping's `secret_sources` list
    pub fn from_dict(spec: &Map<String, Value>) -> Result<Self> {
        let mut store = Self::new();

        let Some(sources) = spec.get("secret_sources") else {
            return Ok(store);
        };

        let sources: Vec<SecretSource> = serde_json::from_value(sources.clone()).map_err(|e| {
            EngineError::InvalidRunStruct(format!("bad spec.secret_sources: {}", e))
        })?;

        for source in sources {
            store.add_source(source.kind, source.source)?;
        }

        Ok(store)
    }

    /// Resolve and remember a source
    pub fn add_source(&mut self, kind: SecretSourceKind, source: Value) -> Result<()> {
        match kind {
            SecretSourceKind::Inline => {
                let map = match &source {
                    Value::Object(map) => map.clone(),
                    Value::String(text) => serde_json::from_str::<Map<String, Value>>(text)
                        .map_err(|e| {
                            EngineError::InvalidRunStruct(format!("bad inline secrets: {}", e))
                        })?,
                    _ => {
                        return Err(EngineError::InvalidRunStruct(
                            "inline secrets must be a mapping".into(),
                        ))
                    }
                };
                for (key, value) in map {
                    self.secrets.insert(key, value_to_string(&value));
                }
            }
            SecretSourceKind::File => {
                let path = source.as_str().ok_or_else(|| {
                    EngineError::InvalidRunStruct("file secret source must be a path".into())
                })?;
                let text = std::fs::read_to_string(path).map_err(|e| {
                    EngineError::ConfigError(format!("cannot read secrets file {}: {}", path, e))
                })?;
                for (key, value) in parse_key_values(&text) {
                    self.secrets.insert(key, value);
                }
            }
            SecretSourceKind::Env => {
                let names = source.as_str().ok_or_else(|| {
                    EngineError::InvalidRunStruct("env secret source must be a string".into())
                })?;
                for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
                    match std::env::var(name) {
                        Ok(value) => {
                            self.secrets.insert(name.to_string(), value);
                        }
                        Err(_) => warn!("secret env var {} is not set", name),
                    }
                }
            }
        }

        debug!("Added {:?} secret source", kind);
        self.sources.push(SecretSource { kind, source });
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.secrets.get(key).map(String::as_str)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.secrets.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.is_empty()
    }

    /// Wire form: the list of source descriptors
    pub fn to_serial(&self) -> Vec<SecretSource> {
        self.sources.clone()
    }

    pub fn to_serial_value(&self) -> Value {
        Value::Array(
            self.sources
                .iter()
                .map(|s| serde_json::json!({"kind": s.kind, "source": s.source}))
                .collect(),
        )
    }
}

impl fmt::Debug for SecretsStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretsStore")
            .field("keys", &self.secrets.keys().collect::<Vec<_>>())
            .field("sources", &self.sources.len())
            .finish()
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// `KEY=VALUE` lines; blanks and `#` comments are skipped
fn parse_key_values(text: &str) -> Vec<(String, String)> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let (key, value) = line.split_once('=')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    fn spec(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_empty_spec() {
        let store = SecretsStore::from_dict(&Map::new()).unwrap();
        assert!(store.is_empty());
        assert!(store.to_serial().is_empty());
    }

    #[test]
    fn test_inline_mapping_and_text() {
        let store = SecretsStore::from_dict(&spec(json!({
            "secret_sources": [
                {"kind": "inline", "source": {"USER": "admin", "PORT": 5432}},
                {"kind": "inline", "source": "{\"TOKEN\": \"t0k\"}"}
            ]
        })))
        .unwrap();

        assert_eq!(store.get("USER"), Some("admin"));
        assert_eq!(store.get("PORT"), Some("5432"));
        assert_eq!(store.get("TOKEN"), Some("t0k"));
        assert_eq!(store.to_serial().len(), 2);
    }

    #[test]
    fn test_file_source_travels_as_reference() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# creds\nDB_PASSWORD = hunter2\n\nAPI_KEY=abc").unwrap();
        let path = file.path().to_string_lossy().to_string();

        let store = SecretsStore::from_dict(&spec(json!({
            "secret_sources": [{"kind": "file", "source": path}]
        })))
        .unwrap();

        assert_eq!(store.get("DB_PASSWORD"), Some("hunter2"));
        assert_eq!(store.get("API_KEY"), Some("abc"));

        let serial = store.to_serial_value().to_string();
        assert!(!serial.contains("hunter2"));
        assert!(serial.contains(&path));
    }

    #[test]
    fn test_env_source() {
        std::env::set_var("MLRUN_TEST_SECRET_A", "value-a");
        let store = SecretsStore::from_dict(&spec(json!({
            "secret_sources": [{"kind": "env", "source": "MLRUN_TEST_SECRET_A, MLRUN_TEST_SECRET_MISSING"}]
        })))
        .unwrap();

        assert_eq!(store.get("MLRUN_TEST_SECRET_A"), Some("value-a"));
        assert!(store.get("MLRUN_TEST_SECRET_MISSING").is_none());
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let result = SecretsStore::from_dict(&spec(json!({
            "secret_sources": [{"kind": "vault", "source": "x"}]
        })));
        assert!(result.is_err());
    }

    #[test]
    fn test_debug_hides_values() {
        let mut store = SecretsStore::new();
        store
            .add_source(SecretSourceKind::Inline, json!({"PASS": "s3cret"}))
            .unwrap();
        assert!(!format!("{:?}", store).contains("s3cret"));
    }
}
