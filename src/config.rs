//! # Configuration Logic
//!
//! ## Role
//! CLI argument parsing and validation, and conversion into the runtime
//! pieces the orchestrator is built from.
//!
//! ## Validation
//! - At least one partition; names unique and usable as file name stems
//! - `--reference` contains `{partition}` when more than one partition is given
//! - Chunk length, memory budget and increment are positive
//! - `--max-memory-mb`, if given, is not below `--default-memory-mb`
//! - The tool argument template only uses known placeholders
//!
//! ## Example CLI
//! ```bash
//! chunkjob --partitions chr20,chr21,chr22 \
//!     --reference /ref/1000GP_{partition}.legend.gz \
//!     --out-dir imputed --tool impute2 \
//!     --tool-args "-m /ref/{partition}.map -l {reference} -int {start} {end} -o {output}"
//! ```

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::error::{ChunkjobError, Result};
use crate::io::OutputLayout;
use crate::pipelines::orchestrator::OrchestratorSettings;
use crate::pipelines::partitioner::PartitionSpec;
use crate::scheduler::{ComputeCommand, LsfClient, StatusTable};
use crate::utils::backoff::Backoff;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "chunkjob",
    version,
    about = "Split genome-wide computations into fixed-length shards and drive them through a batch scheduler"
)]
pub struct Config {
    /// Partition identifiers in scheduling order (comma separated)
    #[arg(long, value_delimiter = ',', required = true)]
    pub partitions: Vec<String>,

    /// Reference locator; `{partition}` is replaced by each partition id
    #[arg(long)]
    pub reference: String,

    /// 1-based column holding the coordinate in the reference
    #[arg(long, default_value_t = 2)]
    pub position_column: usize,

    /// Directory for shard outputs, aggregates and logs
    #[arg(long)]
    pub out_dir: PathBuf,

    /// Output file extension
    #[arg(long, default_value = "gen")]
    pub ext: String,

    /// Compute tool executable
    #[arg(long)]
    pub tool: String,

    /// Tool argument template ({partition} {shard} {start} {end} {reference} {output})
    #[arg(long, default_value = "", allow_hyphen_values = true)]
    pub tool_args: String,

    /// Shard length in coordinate units
    #[arg(long, default_value_t = 5_000_000)]
    pub chunk_length: u64,

    /// Seconds between sweeps
    #[arg(long, default_value_t = 60)]
    pub poll_interval_seconds: u64,

    /// Initial memory budget per shard (MB)
    #[arg(long, default_value_t = 6000)]
    pub default_memory_mb: u32,

    /// Memory added after each memory-limit termination (MB)
    #[arg(long, default_value_t = 1500)]
    pub memory_increment_mb: u32,

    /// Optional ceiling on the memory budget (MB)
    #[arg(long)]
    pub max_memory_mb: Option<u32>,

    /// Consecutive failed submissions before a shard is failed
    #[arg(long, default_value_t = 5)]
    pub max_submission_retries: u32,

    /// Consecutive failed status queries before a shard is failed
    #[arg(long, default_value_t = 10)]
    pub max_query_retries: u32,

    /// Base delay after a failed status query (doubles per failure)
    #[arg(long, default_value_t = 30)]
    pub query_backoff_seconds: u64,

    /// Stop after this many seconds, reporting unfinished shards as stuck
    #[arg(long)]
    pub deadline_seconds: Option<u64>,

    /// Worker threads for scheduler calls within a sweep
    #[arg(long, default_value_t = 1)]
    pub workers: usize,

    /// Scheduler queue
    #[arg(long)]
    pub queue: Option<String>,

    /// Extra options passed to bsub (whitespace separated)
    #[arg(long, allow_hyphen_values = true)]
    pub bsub_args: Option<String>,

    /// JSON file with the raw status table
    #[arg(long)]
    pub status_table: Option<PathBuf>,

    /// Exit codes that signal a memory-limit kill (comma separated)
    #[arg(long, value_delimiter = ',', allow_negative_numbers = true)]
    pub memory_limit_exit_codes: Option<Vec<i32>>,

    /// Write a JSON run summary here
    #[arg(long)]
    pub summary: Option<PathBuf>,

    /// Delete shard outputs once their partition is aggregated
    #[arg(long)]
    pub remove_shard_outputs: bool,

    /// Heartbeat interval in seconds (0 disables)
    #[arg(long, default_value_t = 30)]
    pub heartbeat_seconds: u64,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Parse from the process arguments and validate
    pub fn parse_and_validate() -> Result<Self> {
        let config = Self::parse();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.partitions.is_empty() {
            return Err(ChunkjobError::config("at least one partition is required"));
        }
        let mut seen = HashSet::new();
        for name in &self.partitions {
            if name.is_empty() || name.contains('/') || name.contains('\\') {
                return Err(ChunkjobError::config(format!(
                    "invalid partition name {:?}",
                    name
                )));
            }
            if !seen.insert(name.as_str()) {
                return Err(ChunkjobError::config(format!(
                    "partition {} listed twice",
                    name
                )));
            }
        }
        if self.partitions.len() > 1 && !self.reference.contains("{partition}") {
            return Err(ChunkjobError::config(
                "--reference must contain {partition} when several partitions are given",
            ));
        }
        if self.position_column == 0 {
            return Err(ChunkjobError::config("--position-column is 1-based"));
        }
        if self.chunk_length == 0 {
            return Err(ChunkjobError::config("--chunk-length must be positive"));
        }
        if self.default_memory_mb == 0 || self.memory_increment_mb == 0 {
            return Err(ChunkjobError::config(
                "--default-memory-mb and --memory-increment-mb must be positive",
            ));
        }
        if let Some(max) = self.max_memory_mb {
            if max < self.default_memory_mb {
                return Err(ChunkjobError::config(format!(
                    "--max-memory-mb {} is below --default-memory-mb {}",
                    max, self.default_memory_mb
                )));
            }
        }
        if self.max_submission_retries == 0 || self.max_query_retries == 0 {
            return Err(ChunkjobError::config("retry limits must be at least 1"));
        }
        if self.ext.trim_start_matches('.').is_empty() {
            return Err(ChunkjobError::config("--ext must not be empty"));
        }
        self.compute_command()?;
        Ok(())
    }

    /// Partitions with their reference locators resolved
    pub fn partition_specs(&self) -> Vec<PartitionSpec> {
        self.partitions
            .iter()
            .map(|name| PartitionSpec::new(name, self.reference.replace("{partition}", name)))
            .collect()
    }

    pub fn compute_command(&self) -> Result<ComputeCommand> {
        ComputeCommand::new(&self.tool, &self.tool_args)
    }

    pub fn layout(&self) -> OutputLayout {
        OutputLayout::new(&self.out_dir, &self.ext)
    }

    /// Built-in LSF table unless a file is given; exit-code override applied last
    pub fn status_table(&self) -> Result<StatusTable> {
        let table = match &self.status_table {
            Some(path) => StatusTable::from_path(path)?,
            None => StatusTable::default(),
        };
        Ok(match &self.memory_limit_exit_codes {
            Some(codes) => table.with_memory_limit_codes(codes.clone()),
            None => table,
        })
    }

    pub fn scheduler(&self) -> LsfClient {
        let extra = self
            .bsub_args
            .as_deref()
            .map(|a| a.split_whitespace().map(String::from).collect())
            .unwrap_or_default();
        LsfClient::new()
            .with_queue(self.queue.clone())
            .with_extra_args(extra)
    }

    pub fn settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            chunk_length: self.chunk_length,
            poll_interval: Duration::from_secs(self.poll_interval_seconds),
            memory_increment_mb: self.memory_increment_mb,
            max_memory_mb: self.max_memory_mb,
            max_submission_retries: self.max_submission_retries,
            max_query_retries: self.max_query_retries,
            query_backoff: Backoff::new(Duration::from_secs(self.query_backoff_seconds)),
            deadline: self.deadline_seconds.map(Duration::from_secs),
            workers: self.workers.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Config {
        let mut args = vec![
            "chunkjob",
            "--partitions",
            "chr1,chr2",
            "--reference",
            "/ref/{partition}.legend.gz",
            "--out-dir",
            "/tmp/out",
            "--tool",
            "impute2",
            "--tool-args",
            "-l {reference} -int {start} {end} -o {output}",
        ];
        args.extend_from_slice(extra);
        Config::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        config.validate().unwrap();
        assert_eq!(config.chunk_length, 5_000_000);
        assert_eq!(config.default_memory_mb, 6000);
        assert_eq!(config.memory_increment_mb, 1500);
        assert_eq!(config.poll_interval_seconds, 60);
        assert_eq!(config.ext, "gen");

        let settings = config.settings();
        assert_eq!(settings.poll_interval, Duration::from_secs(60));
        assert_eq!(settings.workers, 1);
        assert!(settings.deadline.is_none());
    }

    #[test]
    fn test_partition_specs_substitute_reference() {
        let specs = parse(&[]).partition_specs();
        assert_eq!(specs[0], PartitionSpec::new("chr1", "/ref/chr1.legend.gz"));
        assert_eq!(specs[1], PartitionSpec::new("chr2", "/ref/chr2.legend.gz"));
    }

    #[test]
    fn test_duplicate_partition_rejected() {
        let mut config = parse(&[]);
        config.partitions = vec!["chr1".into(), "chr1".into()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_shared_reference_needs_placeholder() {
        let mut config = parse(&[]);
        config.reference = "/ref/all.legend.gz".into();
        assert!(config.validate().is_err());
        config.partitions = vec!["chr1".into()];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_memory_ceiling_below_default_rejected() {
        let config = parse(&["--max-memory-mb", "4000"]);
        assert!(matches!(config.validate(), Err(ChunkjobError::Config { .. })));
    }

    #[test]
    fn test_bad_tool_template_rejected() {
        let mut config = parse(&[]);
        config.tool_args = "-x {chromosome}".into();
        assert!(matches!(config.validate(), Err(ChunkjobError::Config { .. })));

        let config = Config::try_parse_from([
            "chunkjob",
            "--partitions",
            "chr1",
            "--reference",
            "/ref/chr1.legend.gz",
            "--out-dir",
            "/tmp/out",
            "--tool",
            "impute2",
            "--tool-args",
            "-x {chromosome}",
        ])
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_memory_limit_codes_override_table() {
        let config = parse(&["--memory-limit-exit-codes", "137,140"]);
        let table = config.status_table().unwrap();
        assert_eq!(table.memory_limit_exit_codes, vec![137, 140]);
        assert_eq!(table.finished, vec!["DONE".to_string()]);
    }

    #[test]
    fn test_optional_limits() {
        let config = parse(&["--deadline-seconds", "3600", "--workers", "8", "--max-memory-mb", "20000"]);
        config.validate().unwrap();
        let settings = config.settings();
        assert_eq!(settings.deadline, Some(Duration::from_secs(3600)));
        assert_eq!(settings.workers, 8);
        assert_eq!(settings.max_memory_mb, Some(20_000));
    }
}
