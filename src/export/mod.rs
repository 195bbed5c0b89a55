// src/export/mod.rs
//! Post-run metadata export
//!
//! Exporters run after a run completes and publish its record to places
//! outside the run database, such as pipeline-step output files.

pub mod kfp;

pub use kfp::PipelineMetadataWriter;

use crate::utils::errors::Result;
use serde_json::Value;

/// Publishes a completed run record
pub trait MetadataExporter: Send + Sync {
    fn write_metadata(&self, record: &Value) -> Result<()>;
}
