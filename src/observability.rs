// src/observability.rs
//! Logging and metrics setup
//!
//! # Metrics
//!
//! - `mlrun_runs_submitted_total{kind}`: runs handed to a backend
//! - `mlrun_runs_completed_total{kind}`: runs that produced a record
//! - `mlrun_runs_soft_failed_total{kind,reason}`: runs that produced none
//! - `mlrun_run_duration_seconds{kind}`: wall time spent in `run()`

use crate::run::outcome::RunOutcome;
use crate::runtime::kind::RuntimeKind;
use crate::utils::config::ObservabilityConfig;
use crate::utils::errors::{EngineError, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

static PROMETHEUS: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the global tracing subscriber
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    let result = if config.json_logs {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    result.map_err(|e| EngineError::ObservabilityFailed(format!("tracing: {}", e)))
}

/// Install the Prometheus recorder (idempotent)
pub fn init_metrics() -> Result<&'static PrometheusHandle> {
    PROMETHEUS.get_or_try_init(|| {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| EngineError::ObservabilityFailed(format!("metrics: {}", e)))?;

        metrics::describe_counter!("mlrun_runs_submitted_total", "Runs handed to a backend");
        metrics::describe_counter!("mlrun_runs_completed_total", "Runs that produced a record");
        metrics::describe_counter!(
            "mlrun_runs_soft_failed_total",
            "Runs whose backend produced no record"
        );
        metrics::describe_histogram!("mlrun_run_duration_seconds", "Time spent executing a run");

        Ok(handle)
    })
}

/// Render current metrics in Prometheus text format, if installed
pub fn render_metrics() -> Option<String> {
    PROMETHEUS.get().map(PrometheusHandle::render)
}

pub(crate) fn record_submitted(kind: RuntimeKind) {
    metrics::counter!("mlrun_runs_submitted_total", "kind" => kind.as_str()).increment(1);
}

pub(crate) fn record_outcome(kind: RuntimeKind, outcome: &RunOutcome, elapsed: Duration) {
    metrics::histogram!("mlrun_run_duration_seconds", "kind" => kind.as_str())
        .record(elapsed.as_secs_f64());

    match outcome {
        RunOutcome::Completed(_) => {
            metrics::counter!("mlrun_runs_completed_total", "kind" => kind.as_str()).increment(1);
        }
        RunOutcome::Submitted { .. } => {}
        RunOutcome::Failed(reason) => {
            metrics::counter!(
                "mlrun_runs_soft_failed_total",
                "kind" => kind.as_str(),
                "reason" => reason.reason()
            )
            .increment(1);
        }
    }
}
