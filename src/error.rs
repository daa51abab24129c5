//! # Centralized Error Handling
//!
//! Unified error types for the entire crate using `thiserror`.
//!
//! Discovery errors (`DataAccess`, `EmptyPartition`, `Parse`) are fatal to a run.
//! Scheduler errors (`SubmissionParse`, `SchedulerCommand`, `SchedulerQuery`) are
//! per-shard and are turned into state transitions by the orchestrator.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for chunkjob operations
#[derive(Error, Debug)]
pub enum ChunkjobError {
    /// I/O errors (file missing, permission denied, read/write failures)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Reference data could not be opened or decompressed
    #[error("Cannot read reference {path}: {message}")]
    DataAccess { path: PathBuf, message: String },

    /// Reference data contained no coordinate records
    #[error("Partition {partition} has no records in {path}")]
    EmptyPartition { partition: String, path: PathBuf },

    /// Malformed reference record
    #[error("Parse error in {path} at line {line}: {message}")]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    /// Configuration errors (invalid CLI arguments)
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Scheduler acknowledged a submission without a recognizable job id
    #[error("Could not parse job id from scheduler output: {output:?}")]
    SubmissionParse { output: String },

    /// The scheduler command itself could not be run
    #[error("Scheduler command `{command}` failed: {message}")]
    SchedulerCommand { command: String, message: String },

    /// Status query for a job failed
    #[error("Status query for job {handle} failed: {message}")]
    SchedulerQuery { handle: u64, message: String },

    /// Shard output expected for aggregation is absent
    #[error("Shard output missing: {path}")]
    MissingShardOutput { path: PathBuf },

    /// Status table or run summary (de)serialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Type alias for Results using ChunkjobError
pub type Result<T> = std::result::Result<T, ChunkjobError>;

impl ChunkjobError {
    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a data access error for a reference locator
    pub fn data_access(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::DataAccess {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a parse error
    pub fn parse(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            path: path.into(),
            line,
            message: message.into(),
        }
    }

    /// Create a scheduler query error
    pub fn query(handle: u64, message: impl Into<String>) -> Self {
        Self::SchedulerQuery {
            handle,
            message: message.into(),
        }
    }

    /// Create a scheduler command error
    pub fn command(command: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SchedulerCommand {
            command: command.into(),
            message: message.into(),
        }
    }

    /// True for errors raised while discovering partitions.
    pub fn is_discovery(&self) -> bool {
        matches!(
            self,
            Self::DataAccess { .. } | Self::EmptyPartition { .. } | Self::Parse { .. }
        )
    }
}
