// src/main.rs
//! MLRun Execution Engine
//!
//! Dispatches a run struct file to its runtime and prints the resulting
//! run record.

use anyhow::{Context, Result};
use clap::Parser;
use mlrun_engine::observability::{init_metrics, init_tracing};
use mlrun_engine::runtime::dispatcher::{Dispatcher, RunOptions, RuntimeDescriptor};
use mlrun_engine::{EngineConfig, RunOutcome, RunStruct};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info};

/// Run an ML job described by a run struct
#[derive(Parser, Debug)]
#[command(name = "mlrun-engine", version, about)]
struct Cli {
    /// Run struct file (YAML or JSON)
    struct_file: PathBuf,

    /// Run-database target (directory, sqlite://path or memory://name)
    #[arg(long, env = "MLRUN_ENGINE__RUNDB")]
    rundb: Option<String>,

    /// Runtime descriptor as a JSON object, merged into spec.runtime
    #[arg(long)]
    runtime: Option<String>,

    /// Command to run when the struct names no runtime
    #[arg(long)]
    command: Option<String>,

    /// Arguments passed to the command
    #[arg(long = "arg")]
    args: Vec<String>,

    /// Write pipeline step metadata after a completed run
    #[arg(long)]
    kfp: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = EngineConfig::load()?;
    init_tracing(&config.observability)?;
    if config.observability.metrics {
        init_metrics()?;
    }

    info!("Starting MLRun engine v{}", env!("CARGO_PKG_VERSION"));
    debug!("Configuration loaded: {:?}", config);

    let text = std::fs::read_to_string(&cli.struct_file)
        .with_context(|| format!("cannot read {}", cli.struct_file.display()))?;
    let run = RunStruct::parse(&text)?;

    let options = RunOptions {
        runtime: cli.runtime.map(RuntimeDescriptor::Text),
        command: cli.command,
        args: cli.args,
        rundb: cli.rundb,
        kfp: cli.kfp,
        handler: None,
    };

    let outcome = Dispatcher::new(config).run_start(run, options).await?;
    match outcome {
        RunOutcome::Completed(record) => {
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(ExitCode::SUCCESS)
        }
        RunOutcome::Submitted { uid, job } => {
            println!("{}", serde_json::json!({"uid": uid, "job": job}));
            Ok(ExitCode::SUCCESS)
        }
        RunOutcome::Failed(reason) => {
            eprintln!("run produced no record: {}", reason);
            Ok(ExitCode::FAILURE)
        }
    }
}
