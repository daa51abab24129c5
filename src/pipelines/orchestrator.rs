//! # Orchestration Control Loop
//!
//! ## Role
//! Drives every shard through its lifecycle on the batch scheduler.
//!
//! ## Algorithm Overview
//! Each sweep visits all shards in registry order (ascending partition,
//! ascending shard):
//! 1. **Pending:** submit at the current memory budget → Submitted. A failed
//!    submission leaves the shard Pending until `max_submission_retries`.
//! 2. **Submitted/Running:** poll once and map the raw status:
//!    - Running → no change (Submitted becomes Running on first sight)
//!    - MemoryLimitExceeded → budget += increment, handle cleared, back to
//!      Pending so the next sweep resubmits
//!    - Succeeded → Done
//!    - Failed → Failed. Only memory-limit terminations are retried.
//! 3. **After the sweep:** write the run logs in registry order, then
//!    aggregate every partition whose last shard just became Done.
//!
//! The loop sleeps `poll_interval` between sweeps and ends when all shards
//! are terminal, the optional deadline passes, or cancellation is requested.
//! On cancellation one more sweep runs that polls but never submits.
//!
//! ## Concurrency
//! With `workers > 1` the per-shard visits of one sweep run on a rayon pool.
//! A visit holds only its own shard's lock, so each record has exactly one
//! writer per sweep. Events are gathered in key order before logging, so
//! logs read the same as a sequential sweep.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::data::partition::Interval;
use crate::data::{
    FailureReason, JobHandle, Outcome, Partition, RawStatus, Registry, ShardKey, ShardRecord,
    ShardState,
};
use crate::error::Result;
use crate::io::{ErrorLog, OutputLayout, ProgressLog};
use crate::pipelines::aggregator::{completeness, Aggregator, Completeness};
use crate::scheduler::{ComputeCommand, JobSpec, ResourceSpec, SchedulerClient, ShardContext, StatusTable};
use crate::utils::backoff::Backoff;
use crate::utils::telemetry::{Stage, TelemetryBlackboard};
use crate::utils::threading::build_thread_pool;

/// Control-loop tunables
#[derive(Clone, Debug)]
pub struct OrchestratorSettings {
    pub chunk_length: u64,
    pub poll_interval: Duration,
    pub memory_increment_mb: u32,
    pub max_memory_mb: Option<u32>,
    pub max_submission_retries: u32,
    pub max_query_retries: u32,
    pub query_backoff: Backoff,
    pub deadline: Option<Duration>,
    pub workers: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            chunk_length: 5_000_000,
            poll_interval: Duration::from_secs(60),
            memory_increment_mb: 1500,
            max_memory_mb: None,
            max_submission_retries: 5,
            max_query_retries: 10,
            query_backoff: Backoff::default(),
            deadline: None,
            workers: 1,
        }
    }
}

/// Why the control loop stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// Every shard reached Done or Failed
    Completed,
    /// The watchdog deadline passed with shards still active
    DeadlineExceeded,
    /// Cancellation was requested
    Cancelled,
}

/// Final disposition of a partition
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum PartitionStatus {
    /// Not yet decided (only seen mid-run)
    Pending,
    Aggregated { path: PathBuf },
    Withheld { reason: String },
}

#[derive(Clone, Debug, Serialize)]
pub struct PartitionReport {
    pub name: String,
    pub shard_count: u32,
    pub status: PartitionStatus,
}

/// Outcome of a whole run
#[derive(Clone, Debug, Serialize)]
pub struct RunReport {
    pub stop_reason: StopReason,
    pub sweeps: u64,
    pub elapsed_secs: f64,
    pub memory_escalations: u64,
    pub partitions: Vec<PartitionReport>,
    pub shards: Vec<ShardRecord>,
}

impl RunReport {
    /// True when every partition was aggregated
    pub fn is_success(&self) -> bool {
        self.partitions
            .iter()
            .all(|p| matches!(p.status, PartitionStatus::Aggregated { .. }))
    }

    pub fn withheld(&self) -> impl Iterator<Item = &PartitionReport> {
        self.partitions
            .iter()
            .filter(|p| !matches!(p.status, PartitionStatus::Aggregated { .. }))
    }

    /// Serialize as pretty JSON
    pub fn write_json(&self, path: &std::path::Path) -> Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(std::io::BufWriter::new(file), self)?;
        Ok(())
    }
}

/// Counts from one sweep
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub submitted: usize,
    pub polled: usize,
    pub transitions: usize,
    pub escalations: usize,
    pub failures: usize,
    pub aggregated: usize,
}

/// Something that happened to one shard during a sweep
#[derive(Debug)]
enum SweepEvent {
    Transition {
        key: ShardKey,
        from: ShardState,
        to: ShardState,
        detail: String,
    },
    Escalated {
        key: ShardKey,
        memory_mb: u32,
    },
    Failed {
        key: ShardKey,
        handle: Option<JobHandle>,
        status: Option<RawStatus>,
        reason: FailureReason,
    },
    SubmitRetry {
        key: ShardKey,
        failures: u32,
        message: String,
    },
    QueryRetry {
        key: ShardKey,
        handle: JobHandle,
        failures: u32,
        retry_in: Duration,
        message: String,
    },
}

/// What a visit did, besides its events
#[derive(Default)]
struct Visit {
    submitted: bool,
    polled: bool,
    events: Vec<SweepEvent>,
}

pub struct Orchestrator<S> {
    registry: Registry,
    scheduler: S,
    command: ComputeCommand,
    status_table: StatusTable,
    aggregator: Aggregator,
    settings: OrchestratorSettings,
    pool: Option<rayon::ThreadPool>,
    progress: ProgressLog,
    errors: ErrorLog,
    partition_status: Vec<PartitionStatus>,
    cancel: Arc<AtomicBool>,
    telemetry: Arc<TelemetryBlackboard>,
    sweeps: u64,
}

impl<S: SchedulerClient> Orchestrator<S> {
    /// Create an orchestrator. Opens (appends to) the run logs in the output directory.
    pub fn new(
        registry: Registry,
        scheduler: S,
        command: ComputeCommand,
        status_table: StatusTable,
        aggregator: Aggregator,
        settings: OrchestratorSettings,
    ) -> Result<Self> {
        let layout = aggregator.layout();
        layout.create_dirs()?;
        let progress = ProgressLog::open(&layout.progress_log())?;
        let errors = ErrorLog::open(&layout.error_log())?;
        let pool = if settings.workers > 1 {
            Some(build_thread_pool(settings.workers)?)
        } else {
            None
        };
        let partition_status = vec![PartitionStatus::Pending; registry.partitions().len()];
        let telemetry = TelemetryBlackboard::new();
        telemetry.set_totals(registry.len(), registry.partitions().len());

        Ok(Self {
            registry,
            scheduler,
            command,
            status_table,
            aggregator,
            settings,
            pool,
            progress,
            errors,
            partition_status,
            cancel: Arc::new(AtomicBool::new(false)),
            telemetry,
            sweeps: 0,
        })
    }

    /// Share a cancellation flag (e.g. set from a signal handler)
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = cancel;
        self
    }

    /// Publish progress to an external blackboard
    pub fn with_telemetry(mut self, telemetry: Arc<TelemetryBlackboard>) -> Self {
        telemetry.set_totals(self.registry.len(), self.registry.partitions().len());
        self.telemetry = telemetry;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn partition_status(&self) -> &[PartitionStatus] {
        &self.partition_status
    }

    fn layout(&self) -> &OutputLayout {
        self.aggregator.layout()
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Run sweeps until every shard is terminal (or the loop is stopped).
    #[instrument(skip_all)]
    pub fn run(&mut self) -> Result<RunReport> {
        let start = Instant::now();
        self.telemetry.set_stage(Stage::Scheduling);
        info!(
            partitions = self.registry.partitions().len(),
            shards = self.registry.len(),
            "starting orchestration"
        );

        let stop = loop {
            if self.registry.all_terminal() {
                break StopReason::Completed;
            }
            if self.settings.deadline.is_some_and(|d| start.elapsed() >= d) {
                warn!("deadline exceeded; stopping with shards still active");
                break StopReason::DeadlineExceeded;
            }
            if self.is_cancelled() {
                info!("cancellation requested; draining in-flight polls");
                self.telemetry.set_stage(Stage::Draining);
                self.sweep(true);
                break if self.registry.all_terminal() {
                    StopReason::Completed
                } else {
                    StopReason::Cancelled
                };
            }

            self.sweep(false);
            if self.registry.all_terminal() {
                break StopReason::Completed;
            }
            self.pause();
        };

        let report = self.finish(stop, start.elapsed());
        self.telemetry.set_stage(Stage::Complete);
        Ok(report)
    }

    /// Sleep between sweeps, waking early on cancellation
    fn pause(&self) {
        let interval = self.settings.poll_interval;
        if interval.is_zero() {
            return;
        }
        let tick = interval.min(Duration::from_millis(250));
        let wake = Instant::now() + interval;
        while Instant::now() < wake && !self.is_cancelled() {
            thread::sleep(tick);
        }
    }

    /// One pass over every shard. In `drain` mode pending shards are not submitted.
    pub fn sweep(&mut self, drain: bool) -> SweepSummary {
        let keys = self.registry.keys();
        let now = Instant::now();

        let visits: Vec<Visit> = match &self.pool {
            Some(pool) => pool.install(|| {
                keys.par_iter()
                    .map(|&key| self.visit(key, drain, now))
                    .collect()
            }),
            None => keys.iter().map(|&key| self.visit(key, drain, now)).collect(),
        };
        self.sweeps += 1;

        let mut summary = SweepSummary::default();
        for visit in visits {
            summary.submitted += usize::from(visit.submitted);
            summary.polled += usize::from(visit.polled);
            for event in visit.events {
                match &event {
                    SweepEvent::Transition { .. } => summary.transitions += 1,
                    SweepEvent::Escalated { .. } => summary.escalations += 1,
                    SweepEvent::Failed { .. } => summary.failures += 1,
                    _ => {}
                }
                self.record(event);
            }
        }
        summary.aggregated = self.settle_partitions();

        let counts = self.registry.counts();
        self.telemetry.record_sweep(self.sweeps, &counts);
        debug!(
            sweep = self.sweeps,
            pending = counts.pending,
            in_flight = counts.in_flight(),
            done = counts.done,
            failed = counts.failed,
            "sweep complete"
        );
        summary
    }

    fn visit(&self, key: ShardKey, drain: bool, now: Instant) -> Visit {
        let Some(partition) = self.registry.partition(key.partition) else {
            return Visit::default();
        };
        self.registry
            .update(key, |rec| match rec.state {
                ShardState::Pending if !drain => self.submit(partition, rec),
                ShardState::Submitted | ShardState::Running if rec.poll_due(now) => {
                    self.poll(rec, now)
                }
                _ => Visit::default(),
            })
            .unwrap_or_default()
    }

    fn job_spec(&self, partition: &Partition, rec: &ShardRecord) -> JobSpec {
        let layout = self.layout();
        let shard = rec.key.shard;
        let interval = Interval::for_shard(shard, self.settings.chunk_length);
        let output = layout.shard_output(&partition.name, shard);
        let command = self.command.render(&ShardContext {
            partition: &partition.name,
            shard: shard.get(),
            start: interval.start,
            end: interval.end,
            reference: &partition.reference,
            output: &output,
        });
        let (stdout, stderr) = layout.job_logs(&partition.name, shard, rec.attempts);
        JobSpec {
            name: format!("{}.{}", partition.name, shard),
            command,
            resources: ResourceSpec {
                memory_mb: rec.memory_mb,
            },
            stdout,
            stderr,
        }
    }

    fn submit(&self, partition: &Partition, rec: &mut ShardRecord) -> Visit {
        debug_assert!(rec.outstanding().is_none());
        let key = rec.key;
        let job = self.job_spec(partition, rec);
        let mut visit = Visit {
            submitted: true,
            ..Visit::default()
        };

        match self.scheduler.submit(&job) {
            Ok(handle) => {
                rec.mark_submitted(handle);
                visit.events.push(SweepEvent::Transition {
                    key,
                    from: ShardState::Pending,
                    to: ShardState::Submitted,
                    detail: format!(
                        "job {} memory {}MB attempt {}",
                        handle, rec.memory_mb, rec.attempts
                    ),
                });
            }
            Err(e) => {
                let exhausted = rec.record_submission_failure(self.settings.max_submission_retries);
                if exhausted {
                    let reason = FailureReason::SubmissionExhausted {
                        attempts: rec.submission_failures,
                        message: e.to_string(),
                    };
                    self.fail(rec, reason, &mut visit.events);
                } else {
                    visit.events.push(SweepEvent::SubmitRetry {
                        key,
                        failures: rec.submission_failures,
                        message: e.to_string(),
                    });
                }
            }
        }
        visit
    }

    fn poll(&self, rec: &mut ShardRecord, now: Instant) -> Visit {
        let mut visit = Visit {
            polled: true,
            ..Visit::default()
        };
        let Some(handle) = rec.outstanding() else {
            return visit;
        };
        let key = rec.key;
        let from = rec.state;

        let raw = match self.scheduler.query(handle) {
            Ok(raw) => raw,
            Err(e) => {
                let failures = rec.query_failures + 1;
                let retry_in = self.settings.query_backoff.delay(failures);
                if rec.record_query_failure(self.settings.max_query_retries, now + retry_in) {
                    let reason = FailureReason::SchedulerUnavailable {
                        attempts: failures,
                        message: e.to_string(),
                    };
                    self.fail(rec, reason, &mut visit.events);
                } else {
                    visit.events.push(SweepEvent::QueryRetry {
                        key,
                        handle,
                        failures,
                        retry_in,
                        message: e.to_string(),
                    });
                }
                return visit;
            }
        };

        match self.status_table.classify(&raw) {
            Outcome::Running => {
                rec.mark_running(raw.clone());
                if from != ShardState::Running {
                    visit.events.push(SweepEvent::Transition {
                        key,
                        from,
                        to: ShardState::Running,
                        detail: format!("job {} {}", handle, raw),
                    });
                }
            }
            Outcome::MemoryLimitExceeded => {
                let old = rec.memory_mb;
                let requested = old.saturating_add(self.settings.memory_increment_mb);
                match self.settings.max_memory_mb {
                    Some(ceiling) if requested > ceiling => {
                        rec.last_status = Some(raw);
                        let reason = FailureReason::MemoryCeiling {
                            requested_mb: requested,
                            ceiling_mb: ceiling,
                        };
                        self.fail(rec, reason, &mut visit.events);
                    }
                    _ => {
                        let memory_mb = rec.escalate_memory(self.settings.memory_increment_mb, raw.clone());
                        visit.events.push(SweepEvent::Transition {
                            key,
                            from,
                            to: ShardState::Pending,
                            detail: format!(
                                "job {} {} memory limit exceeded; memory {}MB -> {}MB, attempt {}",
                                handle, raw, old, memory_mb, rec.attempts
                            ),
                        });
                        visit.events.push(SweepEvent::Escalated { key, memory_mb });
                    }
                }
            }
            Outcome::Succeeded => {
                rec.mark_done(raw.clone());
                visit.events.push(SweepEvent::Transition {
                    key,
                    from,
                    to: ShardState::Done,
                    detail: format!("job {} {}", handle, raw),
                });
            }
            Outcome::Failed(status) => {
                self.fail(rec, FailureReason::JobFailed { status }, &mut visit.events);
            }
        }
        visit
    }

    fn fail(&self, rec: &mut ShardRecord, reason: FailureReason, events: &mut Vec<SweepEvent>) {
        let from = rec.state;
        rec.mark_failed(reason.clone());
        events.push(SweepEvent::Transition {
            key: rec.key,
            from,
            to: ShardState::Failed,
            detail: reason.to_string(),
        });
        events.push(SweepEvent::Failed {
            key: rec.key,
            handle: rec.handle,
            status: rec.last_status.clone(),
            reason,
        });
    }

    fn partition_name(&self, key: ShardKey) -> &str {
        self.registry
            .partition(key.partition)
            .map(|p| p.name.as_str())
            .unwrap_or("?")
    }

    /// Write one event to the run logs, tracing and telemetry
    fn record(&mut self, event: SweepEvent) {
        match event {
            SweepEvent::Transition {
                key,
                from,
                to,
                detail,
            } => {
                let name = self.partition_name(key).to_string();
                debug!(partition = %name, shard = key.shard.get(), %from, %to, %detail, "transition");
                let written = self.progress.transition(&name, key.shard, from, to, &detail);
                log_write(written, "progress");
            }
            SweepEvent::Escalated { key, memory_mb } => {
                info!(
                    partition = self.partition_name(key),
                    shard = key.shard.get(),
                    memory_mb,
                    "memory limit exceeded; resubmitting with more memory"
                );
                self.telemetry.inc_escalations();
            }
            SweepEvent::Failed {
                key,
                handle,
                status,
                reason,
            } => {
                let name = self.partition_name(key).to_string();
                error!(partition = %name, shard = key.shard.get(), %reason, "shard failed");
                let written =
                    self.errors
                        .failure(&name, key.shard, handle, status.as_ref(), &reason.to_string());
                log_write(written, "errors");
            }
            SweepEvent::SubmitRetry {
                key,
                failures,
                message,
            } => {
                warn!(
                    partition = self.partition_name(key),
                    shard = key.shard.get(),
                    failures,
                    max = self.settings.max_submission_retries,
                    %message,
                    "submission failed; will retry next sweep"
                );
            }
            SweepEvent::QueryRetry {
                key,
                handle,
                failures,
                retry_in,
                message,
            } => {
                warn!(
                    partition = self.partition_name(key),
                    shard = key.shard.get(),
                    job = handle.0,
                    failures,
                    retry_in_secs = retry_in.as_secs_f64(),
                    %message,
                    "status query failed"
                );
            }
        }
    }

    /// Aggregate or withhold partitions that became settled. Returns the number aggregated.
    fn settle_partitions(&mut self) -> usize {
        let mut aggregated = 0;
        for i in 0..self.partition_status.len() {
            if self.partition_status[i] != PartitionStatus::Pending {
                continue;
            }
            let partition = &self.registry.partitions()[i];
            let status = match completeness(&self.registry, partition.idx) {
                Completeness::InProgress { .. } => continue,
                Completeness::Failed { settled: false, .. } => continue,
                Completeness::Failed {
                    shards,
                    settled: true,
                } => {
                    let list: Vec<String> = shards.iter().map(|s| s.to_string()).collect();
                    PartitionStatus::Withheld {
                        reason: format!("failed shards: {}", list.join(",")),
                    }
                }
                Completeness::Complete => match self.aggregator.aggregate(partition) {
                    Ok(path) => {
                        aggregated += 1;
                        self.telemetry.inc_partitions_aggregated();
                        PartitionStatus::Aggregated { path }
                    }
                    Err(e) => {
                        error!(partition = %partition.name, error = %e, "aggregation failed");
                        PartitionStatus::Withheld {
                            reason: format!("aggregation failed: {}", e),
                        }
                    }
                },
            };
            match status {
                PartitionStatus::Aggregated { path } => {
                    let name = partition.name.clone();
                    let detail = format!("aggregated -> {}", path.display());
                    log_write(self.progress.partition_event(&name, &detail), "progress");
                    self.partition_status[i] = PartitionStatus::Aggregated { path };
                }
                PartitionStatus::Withheld { reason } => self.withhold(i, reason),
                PartitionStatus::Pending => unreachable!(),
            }
        }
        aggregated
    }

    /// Mark a partition withheld. A withheld partition has no aggregate, so one
    /// left in the output directory by an earlier run is removed.
    fn withhold(&mut self, i: usize, reason: String) {
        let partition = &self.registry.partitions()[i];
        if let Err(e) = self.aggregator.discard(partition) {
            error!(partition = %partition.name, error = %e, "could not remove stale aggregate");
        }
        let name = partition.name.clone();
        let written = self
            .progress
            .partition_event(&name, &format!("withheld ({})", reason));
        log_write(written, "progress");
        self.partition_status[i] = PartitionStatus::Withheld { reason };
    }

    /// Withhold what is left, log unfinished shards and build the report
    fn finish(&mut self, stop: StopReason, elapsed: Duration) -> RunReport {
        let label = match stop {
            StopReason::Completed => "incomplete",
            StopReason::DeadlineExceeded => "stuck",
            StopReason::Cancelled => "cancelled",
        };

        for rec in self.registry.snapshot() {
            if rec.state.is_terminal() {
                continue;
            }
            let name = self.partition_name(rec.key).to_string();
            let reason = format!("{} in state {}", label, rec.state);
            let written = self.errors.failure(
                &name,
                rec.key.shard,
                rec.outstanding(),
                rec.last_status.as_ref(),
                &reason,
            );
            log_write(written, "errors");
        }

        for i in 0..self.partition_status.len() {
            if self.partition_status[i] != PartitionStatus::Pending {
                continue;
            }
            let partition = &self.registry.partitions()[i];
            let counts = self.registry.partition_counts(partition.idx);
            let reason = format!(
                "{}: {} of {} shards unfinished, {} failed",
                label,
                counts.total() - counts.terminal(),
                counts.total(),
                counts.failed
            );
            self.withhold(i, reason);
        }

        let partitions = self
            .registry
            .partitions()
            .iter()
            .zip(&self.partition_status)
            .map(|(p, status)| PartitionReport {
                name: p.name.clone(),
                shard_count: p.shard_count,
                status: status.clone(),
            })
            .collect();

        let report = RunReport {
            stop_reason: stop,
            sweeps: self.sweeps,
            elapsed_secs: elapsed.as_secs_f64(),
            memory_escalations: self.telemetry.escalations(),
            partitions,
            shards: self.registry.snapshot(),
        };
        info!(
            stop = ?report.stop_reason,
            sweeps = report.sweeps,
            withheld = report.withheld().count(),
            "orchestration finished"
        );
        report
    }
}

/// A failed run-log write is reported but does not stop the run
fn log_write(result: Result<()>, log: &str) {
    if let Err(e) = result {
        warn!(log, error = %e, "could not write run log");
    }
}
