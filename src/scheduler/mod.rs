//! # Scheduler Module
//!
//! ## Role
//! Narrow boundary to the external batch scheduler. Orchestration code only
//! sees `JobSpec`, `JobHandle`, `RawStatus` and `Outcome`; all scheduler
//! text parsing lives in the adapter (`lsf`).
//!
//! ## Sub-modules
//! - `command`: compute tool command-line templating
//! - `status`: configurable raw-status → `Outcome` table
//! - `lsf`: adapter shelling out to `bsub`/`bjobs`

pub mod command;
pub mod lsf;
pub mod status;

use std::path::PathBuf;

use crate::data::{JobHandle, RawStatus};
use crate::error::Result;

pub use command::{ComputeCommand, ShardContext};
pub use lsf::LsfClient;
pub use status::StatusTable;

/// Resources requested for one submission
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResourceSpec {
    pub memory_mb: u32,
}

/// Everything the scheduler needs to run one shard attempt
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobSpec {
    /// Job name, `{partition}.{shard}`
    pub name: String,
    /// Compute tool argv (program first)
    pub command: Vec<String>,
    pub resources: ResourceSpec,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
}

/// Submit and query jobs on a batch scheduler.
///
/// Calls are short and blocking. Implementations must be shareable across
/// the sweep worker pool.
pub trait SchedulerClient: Send + Sync {
    /// Submit a job. A missing or unparseable acknowledgment is an error;
    /// the caller keeps the shard pending.
    fn submit(&self, job: &JobSpec) -> Result<JobHandle>;

    /// Query raw status and exit code for a previously issued handle.
    fn query(&self, handle: JobHandle) -> Result<RawStatus>;
}

impl<T: SchedulerClient + ?Sized> SchedulerClient for &T {
    fn submit(&self, job: &JobSpec) -> Result<JobHandle> {
        (**self).submit(job)
    }

    fn query(&self, handle: JobHandle) -> Result<RawStatus> {
        (**self).query(handle)
    }
}

impl<T: SchedulerClient + ?Sized> SchedulerClient for Box<T> {
    fn submit(&self, job: &JobSpec) -> Result<JobHandle> {
        (**self).submit(job)
    }

    fn query(&self, handle: JobHandle) -> Result<RawStatus> {
        (**self).query(handle)
    }
}
