//! # Run Logs
//!
//! The two append-only, human-readable logs the orchestrator keeps next to
//! its outputs. They are separate from `tracing` diagnostics and are never
//! read back.
//!
//! ```text
//! progress.log  {timestamp}\t{partition}.{shard}\t{from}->{to}\t{detail}
//! errors.log    {timestamp}\t{partition}\t{shard}\t{handle}\t{raw status}\t{reason}
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{Local, SecondsFormat};

use crate::data::{JobHandle, RawStatus, ShardIdx, ShardState};
use crate::error::Result;

fn timestamp() -> String {
    Local::now().to_rfc3339_opts(SecondsFormat::Secs, false)
}

fn open_append(path: &Path) -> Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

/// One line per shard state transition
pub struct ProgressLog {
    out: BufWriter<File>,
}

impl ProgressLog {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            out: open_append(path)?,
        })
    }

    pub fn transition(
        &mut self,
        partition: &str,
        shard: ShardIdx,
        from: ShardState,
        to: ShardState,
        detail: &str,
    ) -> Result<()> {
        writeln!(
            self.out,
            "{}\t{}.{}\t{}->{}\t{}",
            timestamp(),
            partition,
            shard,
            from,
            to,
            detail
        )?;
        self.out.flush()?;
        Ok(())
    }

    /// Partition-level event (aggregation, withholding)
    pub fn partition_event(&mut self, partition: &str, detail: &str) -> Result<()> {
        writeln!(self.out, "{}\t{}\t-\t{}", timestamp(), partition, detail)?;
        self.out.flush()?;
        Ok(())
    }
}

/// One line per terminal failure (or shard left unfinished)
pub struct ErrorLog {
    out: BufWriter<File>,
}

impl ErrorLog {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            out: open_append(path)?,
        })
    }

    pub fn failure(
        &mut self,
        partition: &str,
        shard: ShardIdx,
        handle: Option<JobHandle>,
        status: Option<&RawStatus>,
        reason: &str,
    ) -> Result<()> {
        writeln!(
            self.out,
            "{}\t{}\t{}\t{}\t{}\t{}",
            timestamp(),
            partition,
            shard,
            handle.map_or_else(|| "-".to_string(), |h| h.to_string()),
            status.map_or_else(|| "-".to_string(), |s| s.to_string()),
            reason
        )?;
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logs_append_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("progress.log");

        let mut log = ProgressLog::open(&path).unwrap();
        log.transition("chr1", ShardIdx::new(1), ShardState::Pending, ShardState::Submitted, "job 7")
            .unwrap();
        drop(log);
        let mut log = ProgressLog::open(&path).unwrap();
        log.transition("chr1", ShardIdx::new(1), ShardState::Submitted, ShardState::Done, "job 7")
            .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("chr1.1\tPending->Submitted\tjob 7"));
        assert!(lines[1].contains("Submitted->Done"));
    }

    #[test]
    fn test_error_line_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("errors.log");
        let mut log = ErrorLog::open(&path).unwrap();
        let status = RawStatus::new("ZOMBI", Some(1));
        log.failure("chr2", ShardIdx::new(1), Some(JobHandle(99)), Some(&status), "job failed")
            .unwrap();
        log.failure("chr2", ShardIdx::new(2), None, None, "stuck").unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let first: Vec<&str> = text.lines().next().unwrap().split('\t').collect();
        assert_eq!(&first[1..], &["chr2", "1", "99", "ZOMBI/1", "job failed"]);
        assert!(text.lines().nth(1).unwrap().ends_with("chr2\t2\t-\t-\tstuck"));
    }
}
