// src/export/kfp.rs
//! Kubeflow Pipelines step metadata
//!
//! Writes:
//! - `mlpipeline-metrics.json` (numeric outputs as pipeline metrics)
//! - one file per output under the outputs directory
//! - `mlpipeline-ui-metadata.json` (markdown run report)

use crate::export::MetadataExporter;
use crate::utils::config::KfpConfig;
use crate::utils::errors::{EngineError, Result};
use crate::utils::paths::is_single_segment;
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const METRICS_FILE: &str = "mlpipeline-metrics.json";
pub const UI_METADATA_FILE: &str = "mlpipeline-ui-metadata.json";

#[derive(Debug, Serialize)]
struct PipelineMetrics {
    metrics: Vec<PipelineMetric>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PipelineMetric {
    name: String,
    number_value: f64,
    format: &'static str,
}

#[derive(Debug, Serialize)]
struct UiMetadata {
    outputs: Vec<UiOutput>,
}

#[derive(Debug, Serialize)]
struct UiOutput {
    #[serde(rename = "type")]
    kind: &'static str,
    storage: &'static str,
    source: String,
}

/// Writer for pipeline-step metadata files
#[derive(Debug, Clone)]
pub struct PipelineMetadataWriter {
    metadata_dir: PathBuf,
    outputs_dir: PathBuf,
}

impl PipelineMetadataWriter {
    pub fn new(metadata_dir: impl Into<PathBuf>, outputs_dir: impl Into<PathBuf>) -> Self {
        Self {
            metadata_dir: metadata_dir.into(),
            outputs_dir: outputs_dir.into(),
        }
    }

    pub fn from_config(config: &KfpConfig) -> Self {
        Self::new(config.metadata_dir.clone(), config.outputs_dir.clone())
    }

    fn write_metrics(&self, outputs: &Map<String, Value>) -> Result<()> {
        let metrics = PipelineMetrics {
            metrics: outputs
                .iter()
                .filter_map(|(key, value)| {
                    value.as_f64().map(|number| PipelineMetric {
                        name: metric_name(key),
                        number_value: number,
                        format: "RAW",
                    })
                })
                .collect(),
        };
        write_json(&self.metadata_dir.join(METRICS_FILE), &metrics)
    }

    fn write_outputs(&self, outputs: &Map<String, Value>) -> Result<()> {
        if outputs.is_empty() {
            return Ok(());
        }
        create_dir(&self.outputs_dir)?;

        for (key, value) in outputs {
            let text = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let path = self.outputs_dir.join(key);
            std::fs::write(&path, text)
                .map_err(|e| EngineError::ExportFailed(format!("Failed to write {:?}: {}", path, e)))?;
        }
        Ok(())
    }

    fn write_ui_metadata(&self, record: &Value) -> Result<()> {
        let metadata = UiMetadata {
            outputs: vec![UiOutput {
                kind: "markdown",
                storage: "inline",
                source: run_report(record),
            }],
        };
        write_json(&self.metadata_dir.join(UI_METADATA_FILE), &metadata)
    }
}

impl MetadataExporter for PipelineMetadataWriter {
    fn write_metadata(&self, record: &Value) -> Result<()> {
        let empty = Map::new();
        let outputs = record
            .pointer("/status/outputs")
            .and_then(Value::as_object)
            .unwrap_or(&empty);

        // output keys become file names, check them before writing anything
        if let Some(key) = outputs.keys().find(|key| !is_single_segment(key)) {
            return Err(EngineError::ExportFailed(format!(
                "output key {:?} is not a valid file name",
                key
            )));
        }

        self.write_metrics(outputs)?;
        self.write_outputs(outputs)?;
        self.write_ui_metadata(record)?;

        debug!(
            "Wrote pipeline metadata to {:?} ({} outputs)",
            self.metadata_dir,
            outputs.len()
        );
        Ok(())
    }
}

/// Pipeline metric names must be lowercase with dashes
fn metric_name(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' | '-' => c,
            'A'..='Z' => c.to_ascii_lowercase(),
            _ => '-',
        })
        .collect()
}

fn run_report(record: &Value) -> String {
    let field = |pointer: &str| {
        record
            .pointer(pointer)
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .unwrap_or_default()
    };

    let mut report = format!(
        "# Run {}\n\n| uid | project | state | start |\n|---|---|---|---|\n| {} | {} | {} | {} |\n",
        field("/metadata/name"),
        field("/metadata/uid"),
        field("/metadata/project"),
        field("/status/state"),
        field("/status/start_time"),
    );

    for (title, pointer) in [("Parameters", "/spec/parameters"), ("Outputs", "/status/outputs")] {
        if let Some(map) = record.pointer(pointer).and_then(Value::as_object) {
            if map.is_empty() {
                continue;
            }
            report.push_str(&format!("\n## {}\n\n| key | value |\n|---|---|\n", title));
            for (key, value) in map {
                report.push_str(&format!("| {} | {} |\n", key, value));
            }
        }
    }
    report
}

fn create_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)
        .map_err(|e| EngineError::ExportFailed(format!("Failed to create {:?}: {}", dir, e)))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir(parent)?;
    }
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| EngineError::ExportFailed(format!("JSON serialization error: {}", e)))?;
    std::fs::write(path, text)
        .map_err(|e| EngineError::ExportFailed(format!("Failed to write {:?}: {}", path, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> Value {
        json!({
            "metadata": {"name": "train", "uid": "u1", "project": "default"},
            "spec": {"parameters": {"lr": 0.1}},
            "status": {
                "state": "completed",
                "outputs": {"Accuracy": 0.93, "model_path": "s3://bucket/model.pkl"}
            }
        })
    }

    #[test]
    fn test_writes_all_files() {
        let dir = tempfile::tempdir().unwrap();
        let writer = PipelineMetadataWriter::new(dir.path().join("meta"), dir.path().join("out"));
        writer.write_metadata(&record()).unwrap();

        let metrics: Value =
            serde_json::from_str(&std::fs::read_to_string(dir.path().join("meta").join(METRICS_FILE)).unwrap())
                .unwrap();
        assert_eq!(metrics["metrics"].as_array().unwrap().len(), 1);
        assert_eq!(metrics["metrics"][0]["name"], "accuracy");
        assert_eq!(metrics["metrics"][0]["numberValue"], 0.93);

        assert_eq!(
            std::fs::read_to_string(dir.path().join("out/model_path")).unwrap(),
            "s3://bucket/model.pkl"
        );
        assert_eq!(std::fs::read_to_string(dir.path().join("out/Accuracy")).unwrap(), "0.93");

        let ui: Value = serde_json::from_str(
            &std::fs::read_to_string(dir.path().join("meta").join(UI_METADATA_FILE)).unwrap(),
        )
        .unwrap();
        assert_eq!(ui["outputs"][0]["type"], "markdown");
        let source = ui["outputs"][0]["source"].as_str().unwrap();
        assert!(source.contains("# Run train"));
        assert!(source.contains("| lr | 0.1 |"));
    }

    #[test]
    fn test_record_without_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let writer = PipelineMetadataWriter::new(dir.path(), dir.path().join("out"));
        writer.write_metadata(&json!({"metadata": {"uid": "x"}})).unwrap();

        assert!(dir.path().join(METRICS_FILE).exists());
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn test_escaping_output_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let writer = PipelineMetadataWriter::new(dir.path().join("meta"), dir.path().join("out"));

        for key in ["../escaped", "/abs", "..", "nested/key"] {
            let mut outputs = Map::new();
            outputs.insert("fine".into(), json!(1));
            outputs.insert(key.into(), json!("x"));
            let record = json!({"status": {"outputs": outputs}});
            let err = writer.write_metadata(&record).unwrap_err();
            assert!(matches!(err, EngineError::ExportFailed(_)), "{:?}", err);
        }

        assert!(!dir.path().join("escaped").exists());
        assert!(!dir.path().join("meta").exists());
        assert!(!dir.path().join("out").exists());
    }

    #[test]
    fn test_metric_name() {
        assert_eq!(metric_name("Train Loss_1"), "train-loss-1");
    }
}
