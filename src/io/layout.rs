//! # Output Layout
//!
//! File naming conventions inside the output directory:
//! - shard output: `{partition}.{shard}.{ext}`
//! - aggregate:    `{partition}.{ext}`
//! - job logs:     `logs/{partition}.{shard}.{attempt}.out|err`
//! - run logs:     `progress.log`, `errors.log`

use std::path::{Path, PathBuf};

use crate::data::ShardIdx;

#[derive(Clone, Debug)]
pub struct OutputLayout {
    dir: PathBuf,
    ext: String,
}

impl OutputLayout {
    pub fn new(dir: impl Into<PathBuf>, ext: impl Into<String>) -> Self {
        let ext: String = ext.into();
        Self {
            dir: dir.into(),
            ext: ext.trim_start_matches('.').to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ext(&self) -> &str {
        &self.ext
    }

    pub fn shard_output(&self, partition: &str, shard: ShardIdx) -> PathBuf {
        self.dir.join(format!("{}.{}.{}", partition, shard, self.ext))
    }

    pub fn partition_output(&self, partition: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", partition, self.ext))
    }

    pub fn job_log_dir(&self) -> PathBuf {
        self.dir.join("logs")
    }

    /// Scheduler stdout/stderr paths for one submission attempt
    pub fn job_logs(&self, partition: &str, shard: ShardIdx, attempt: u32) -> (PathBuf, PathBuf) {
        let stem = format!("{}.{}.{}", partition, shard, attempt);
        let dir = self.job_log_dir();
        (dir.join(format!("{}.out", stem)), dir.join(format!("{}.err", stem)))
    }

    pub fn progress_log(&self) -> PathBuf {
        self.dir.join("progress.log")
    }

    pub fn error_log(&self) -> PathBuf {
        self.dir.join("errors.log")
    }

    /// Create the output and job-log directories
    pub fn create_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.job_log_dir())
    }
}
