//! # Chunkjob: Chunked Genome-Wide Job Orchestration
//!
//! Splits each partition (chromosome) into fixed-length shards, runs one
//! compute job per shard on LSF, resubmits memory-limit kills with a larger
//! budget and concatenates finished shards per partition.
//!
//! ## Usage
//! ```bash
//! chunkjob --partitions chr1,chr2 \
//!     --reference /ref/{partition}.legend.gz \
//!     --out-dir imputed --tool impute2 \
//!     --tool-args "-l {reference} -int {start} {end} -o {output}"
//! ```
//!
//! Exit status: 0 when every partition was aggregated, 1 when any was
//! withheld, 2 on a fatal error.

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use chunkjob::config::Config;
use chunkjob::data::Registry;
use chunkjob::pipelines::{Aggregator, Orchestrator, Partitioner, RunReport};
use chunkjob::utils::telemetry::{HeartbeatConfig, HeartbeatHandle, Stage, TelemetryBlackboard};

fn main() -> ExitCode {
    match run() {
        Ok(report) if report.is_success() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::from(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}

fn run() -> anyhow::Result<RunReport> {
    let config = Config::parse_and_validate()?;
    init_tracing(&config.log_level);
    info!("chunkjob v{}", env!("CARGO_PKG_VERSION"));

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            cancel.store(true, Ordering::SeqCst);
        })
        .context("installing signal handler")?;
    }

    let telemetry = TelemetryBlackboard::new();
    let heartbeat = if config.heartbeat_seconds > 0 {
        Some(HeartbeatHandle::spawn(
            telemetry.clone(),
            HeartbeatConfig {
                interval_secs: config.heartbeat_seconds,
                ..HeartbeatConfig::default()
            },
        )?)
    } else {
        None
    };

    telemetry.set_stage(Stage::Discovering);
    let specs = config.partition_specs();
    let partitions = Partitioner::new(config.chunk_length, config.position_column)
        .discover(&specs)
        .context("partition discovery failed; nothing was submitted")?;
    let registry = Registry::initialize(partitions, config.default_memory_mb);
    info!(
        partitions = registry.partitions().len(),
        shards = registry.len(),
        "registry initialized"
    );

    let layout = config.layout();
    let aggregator = Aggregator::new(layout).remove_shard_outputs(config.remove_shard_outputs);
    let mut orchestrator = Orchestrator::new(
        registry,
        config.scheduler(),
        config.compute_command()?,
        config.status_table().context("loading status table")?,
        aggregator,
        config.settings(),
    )
    .with_context(|| format!("preparing output directory {}", config.out_dir.display()))?
    .with_cancel_flag(cancel)
    .with_telemetry(telemetry);

    let report = orchestrator.run()?;
    if let Some(heartbeat) = heartbeat {
        heartbeat.shutdown();
    }

    if let Some(path) = &config.summary {
        report
            .write_json(path)
            .with_context(|| format!("writing summary {}", path.display()))?;
        info!(path = %path.display(), "wrote run summary");
    }
    for partition in report.withheld() {
        warn!(partition = %partition.name, status = ?partition.status, "partition withheld");
    }
    Ok(report)
}
