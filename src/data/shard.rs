//! # Shard Records
//!
//! ## Role
//! Mutable per-shard lifecycle state. A shard is the unit of scheduling,
//! keyed by `(partition, shard index)`.
//!
//! ## Lifecycle
//! ```text
//! Pending ──submit──▶ Submitted ──poll──▶ Running ─┐ (self-loop)
//!    ▲                    │                 │       │
//!    └── memory limit ────┴─────────────────┘       │
//!                         ├──▶ Done                 │
//!                         └──▶ Failed ◀─────────────┘
//! ```
//! `Done` and `Failed` are terminal. The transition methods below are the
//! only way to change `state`, and each one checks the state it starts from.

use std::fmt;
use std::time::Instant;

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::data::ShardKey;

/// Opaque job identifier issued by the scheduler at submission time
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct JobHandle(pub u64);

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Raw status and exit code as reported by the scheduler
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RawStatus {
    pub status: String,
    pub exit_code: Option<i32>,
}

impl RawStatus {
    pub fn new(status: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self {
            status: status.into(),
            exit_code,
        }
    }
}

impl fmt::Display for RawStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.exit_code {
            Some(code) => write!(f, "{}/{}", self.status, code),
            None => write!(f, "{}/-", self.status),
        }
    }
}

/// Abstracted result of polling a job handle
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Running,
    MemoryLimitExceeded,
    Succeeded,
    Failed(RawStatus),
}

/// Shard lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum ShardState {
    Pending,
    Submitted,
    Running,
    Done,
    Failed,
}

impl ShardState {
    pub fn as_str(self) -> &'static str {
        match self {
            ShardState::Pending => "Pending",
            ShardState::Submitted => "Submitted",
            ShardState::Running => "Running",
            ShardState::Done => "Done",
            ShardState::Failed => "Failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ShardState::Done | ShardState::Failed)
    }

    /// A job handle from this state's submission is still unresolved.
    pub fn has_outstanding_job(self) -> bool {
        matches!(self, ShardState::Submitted | ShardState::Running)
    }
}

impl fmt::Display for ShardState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a shard ended in `Failed`
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum FailureReason {
    /// The job terminated with a status other than success or memory limit
    JobFailed { status: RawStatus },
    /// Submission kept failing
    SubmissionExhausted { attempts: u32, message: String },
    /// Status queries kept failing
    SchedulerUnavailable { attempts: u32, message: String },
    /// Memory escalation would pass the configured ceiling
    MemoryCeiling { requested_mb: u32, ceiling_mb: u32 },
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::JobFailed { status } => write!(f, "job failed with {}", status),
            FailureReason::SubmissionExhausted { attempts, message } => {
                write!(f, "submission failed {} times: {}", attempts, message)
            }
            FailureReason::SchedulerUnavailable { attempts, message } => {
                write!(f, "status query failed {} times: {}", attempts, message)
            }
            FailureReason::MemoryCeiling {
                requested_mb,
                ceiling_mb,
            } => write!(
                f,
                "memory limit exceeded; {} MB would pass the {} MB ceiling",
                requested_mb, ceiling_mb
            ),
        }
    }
}

/// Mutable state of one shard
#[derive(Clone, Debug, Serialize)]
pub struct ShardRecord {
    pub key: ShardKey,
    /// Memory budget (MB) for the current or next submission; never decreases
    pub memory_mb: u32,
    /// Most recent job handle. Outstanding only while `state.has_outstanding_job()`.
    pub handle: Option<JobHandle>,
    pub state: ShardState,
    /// Submission attempt number, starting at 1; bumped on each memory escalation
    pub attempts: u32,
    pub last_status: Option<RawStatus>,
    /// Consecutive failed submissions
    pub submission_failures: u32,
    /// Consecutive failed status queries
    pub query_failures: u32,
    /// Earliest time the next status query may run (set after a query error)
    #[serde(skip)]
    pub next_poll_at: Option<Instant>,
    pub submitted_at: Option<DateTime<Local>>,
    pub completed_at: Option<DateTime<Local>>,
    pub failure: Option<FailureReason>,
}

impl ShardRecord {
    pub fn new(key: ShardKey, memory_mb: u32) -> Self {
        Self {
            key,
            memory_mb,
            handle: None,
            state: ShardState::Pending,
            attempts: 1,
            last_status: None,
            submission_failures: 0,
            query_failures: 0,
            next_poll_at: None,
            submitted_at: None,
            completed_at: None,
            failure: None,
        }
    }

    /// Outstanding job handle, if any
    pub fn outstanding(&self) -> Option<JobHandle> {
        if self.state.has_outstanding_job() {
            self.handle
        } else {
            None
        }
    }

    /// Pending → Submitted
    pub fn mark_submitted(&mut self, handle: JobHandle) {
        assert_eq!(self.state, ShardState::Pending, "submit from {:?}", self.state);
        self.handle = Some(handle);
        self.state = ShardState::Submitted;
        self.submission_failures = 0;
        self.query_failures = 0;
        self.next_poll_at = None;
        self.last_status = None;
        self.submitted_at = Some(Local::now());
    }

    /// Count a failed submission. Returns true once `max_retries` is reached.
    pub fn record_submission_failure(&mut self, max_retries: u32) -> bool {
        debug_assert_eq!(self.state, ShardState::Pending);
        self.submission_failures += 1;
        self.submission_failures >= max_retries
    }

    /// Count a failed status query. Returns true once `max_retries` is reached.
    pub fn record_query_failure(&mut self, max_retries: u32, retry_at: Instant) -> bool {
        debug_assert!(self.state.has_outstanding_job());
        self.query_failures += 1;
        self.next_poll_at = Some(retry_at);
        self.query_failures >= max_retries
    }

    /// Whether a status query may be issued now
    pub fn poll_due(&self, now: Instant) -> bool {
        self.next_poll_at.map_or(true, |t| now >= t)
    }

    /// Submitted|Running → Running
    pub fn mark_running(&mut self, status: RawStatus) {
        debug_assert!(self.state.has_outstanding_job());
        self.state = ShardState::Running;
        self.last_status = Some(status);
        self.query_failures = 0;
        self.next_poll_at = None;
    }

    /// Submitted|Running → Pending with a larger budget. Returns the new budget.
    pub fn escalate_memory(&mut self, increment_mb: u32, status: RawStatus) -> u32 {
        assert!(self.state.has_outstanding_job(), "escalate from {:?}", self.state);
        self.memory_mb = self.memory_mb.saturating_add(increment_mb);
        self.handle = None;
        self.state = ShardState::Pending;
        self.attempts += 1;
        self.last_status = Some(status);
        self.query_failures = 0;
        self.next_poll_at = None;
        self.memory_mb
    }

    /// Submitted|Running → Done
    pub fn mark_done(&mut self, status: RawStatus) {
        assert!(self.state.has_outstanding_job(), "done from {:?}", self.state);
        self.state = ShardState::Done;
        self.last_status = Some(status);
        self.query_failures = 0;
        self.next_poll_at = None;
        self.completed_at = Some(Local::now());
    }

    /// Any non-terminal state → Failed
    pub fn mark_failed(&mut self, reason: FailureReason) {
        assert!(!self.state.is_terminal(), "fail from {:?}", self.state);
        if let FailureReason::JobFailed { status } = &reason {
            self.last_status = Some(status.clone());
        }
        self.state = ShardState::Failed;
        self.next_poll_at = None;
        self.completed_at = Some(Local::now());
        self.failure = Some(reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{PartitionIdx, ShardIdx};

    fn record(memory_mb: u32) -> ShardRecord {
        ShardRecord::new(ShardKey::new(PartitionIdx::new(0), ShardIdx::new(2)), memory_mb)
    }

    #[test]
    fn test_escalation_returns_to_pending_with_more_memory() {
        let mut r = record(9000);
        r.mark_submitted(JobHandle(77));
        let mem = r.escalate_memory(1500, RawStatus::new("EXIT", Some(130)));

        assert_eq!(mem, 10_500);
        assert_eq!(r.memory_mb, 10_500);
        assert_eq!(r.state, ShardState::Pending);
        assert_eq!(r.attempts, 2);
        assert_eq!(r.handle, None);
        assert_eq!(r.outstanding(), None);
    }

    #[test]
    fn test_submission_failures_are_bounded() {
        let mut r = record(6000);
        assert!(!r.record_submission_failure(3));
        assert!(!r.record_submission_failure(3));
        assert!(r.record_submission_failure(3));
    }

    #[test]
    fn test_successful_submission_resets_failure_count() {
        let mut r = record(6000);
        r.record_submission_failure(3);
        r.mark_submitted(JobHandle(1));
        assert_eq!(r.submission_failures, 0);
        assert_eq!(r.outstanding(), Some(JobHandle(1)));
    }

    #[test]
    fn test_done_keeps_handle_for_audit() {
        let mut r = record(6000);
        r.mark_submitted(JobHandle(5));
        r.mark_running(RawStatus::new("RUN", None));
        r.mark_done(RawStatus::new("DONE", None));
        assert!(r.state.is_terminal());
        assert_eq!(r.handle, Some(JobHandle(5)));
        assert_eq!(r.outstanding(), None);
        assert!(r.completed_at.is_some());
    }

    #[test]
    #[should_panic]
    fn test_terminal_shard_cannot_be_resubmitted() {
        let mut r = record(6000);
        r.mark_submitted(JobHandle(5));
        r.mark_done(RawStatus::new("DONE", Some(0)));
        r.mark_submitted(JobHandle(6));
    }

    #[test]
    fn test_poll_backoff_gate() {
        let mut r = record(6000);
        r.mark_submitted(JobHandle(5));
        let now = Instant::now();
        assert!(r.poll_due(now));
        r.record_query_failure(10, now + std::time::Duration::from_secs(60));
        assert!(!r.poll_due(now));
        assert!(r.poll_due(now + std::time::Duration::from_secs(61)));
    }

    #[test]
    fn test_raw_status_display() {
        assert_eq!(RawStatus::new("EXIT", Some(130)).to_string(), "EXIT/130");
        assert_eq!(RawStatus::new("RUN", None).to_string(), "RUN/-");
    }
}
