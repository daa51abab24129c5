//! # Telemetry Blackboard
//!
//! Thread-safe progress tracking for an orchestration run.
//! Uses atomic counters that the control loop refreshes after every sweep.
//!
//! The blackboard pattern decouples scheduling from progress reporting:
//! - The control loop publishes per-state shard counts with relaxed stores
//! - A background heartbeat thread periodically reads and reports them

use std::io::{self, IsTerminal, Write};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::data::registry::StateCounts;

/// Processing stage for high-level progress tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Stage {
    Initializing = 0,
    Discovering = 1,
    Scheduling = 2,
    Draining = 3,
    Complete = 4,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Initializing => "Initializing",
            Stage::Discovering => "Discovering partitions",
            Stage::Scheduling => "Scheduling",
            Stage::Draining => "Draining",
            Stage::Complete => "Complete",
        }
    }

    fn from_u64(val: u64) -> Self {
        match val {
            0 => Stage::Initializing,
            1 => Stage::Discovering,
            2 => Stage::Scheduling,
            3 => Stage::Draining,
            _ => Stage::Complete,
        }
    }
}

/// Global telemetry state, designed for cheap atomic updates.
///
/// All counters use relaxed ordering; the heartbeat only needs eventual visibility.
pub struct TelemetryBlackboard {
    stage: AtomicU64,

    sweeps: AtomicU64,
    total_shards: AtomicU64,
    pending: AtomicU64,
    in_flight: AtomicU64,
    done: AtomicU64,
    failed: AtomicU64,
    escalations: AtomicU64,

    partitions_aggregated: AtomicU64,
    total_partitions: AtomicU64,

    start_time: Instant,
    last_progress_nanos: AtomicU64,

    shutdown: AtomicBool,
}

impl TelemetryBlackboard {
    /// Create a new telemetry blackboard
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    #[inline]
    pub fn set_stage(&self, stage: Stage) {
        self.stage.store(stage as u64, Ordering::Relaxed);
        self.touch_progress();
    }

    #[inline]
    pub fn stage(&self) -> Stage {
        Stage::from_u64(self.stage.load(Ordering::Relaxed))
    }

    pub fn set_totals(&self, shards: usize, partitions: usize) {
        self.total_shards.store(shards as u64, Ordering::Relaxed);
        self.total_partitions.store(partitions as u64, Ordering::Relaxed);
    }

    /// Publish the counts observed at the end of a sweep
    pub fn record_sweep(&self, sweep: u64, counts: &StateCounts) {
        self.sweeps.store(sweep, Ordering::Relaxed);
        self.pending.store(counts.pending as u64, Ordering::Relaxed);
        self.in_flight.store(counts.in_flight() as u64, Ordering::Relaxed);
        let terminal = counts.terminal() as u64;
        let prev = self.done.load(Ordering::Relaxed) + self.failed.load(Ordering::Relaxed);
        self.done.store(counts.done as u64, Ordering::Relaxed);
        self.failed.store(counts.failed as u64, Ordering::Relaxed);
        if terminal != prev {
            self.touch_progress();
        }
    }

    #[inline]
    pub fn inc_escalations(&self) {
        self.escalations.fetch_add(1, Ordering::Relaxed);
        self.touch_progress();
    }

    #[inline]
    pub fn inc_partitions_aggregated(&self) {
        self.partitions_aggregated.fetch_add(1, Ordering::Relaxed);
        self.touch_progress();
    }

    pub fn escalations(&self) -> u64 {
        self.escalations.load(Ordering::Relaxed)
    }

    #[inline]
    fn touch_progress(&self) {
        let elapsed = self.start_time.elapsed().as_nanos() as u64;
        self.last_progress_nanos.store(elapsed, Ordering::Relaxed);
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    fn snapshot(&self) -> TelemetrySnapshot {
        TelemetrySnapshot {
            stage: self.stage(),
            sweeps: self.sweeps.load(Ordering::Relaxed),
            total_shards: self.total_shards.load(Ordering::Relaxed),
            pending: self.pending.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            done: self.done.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            escalations: self.escalations.load(Ordering::Relaxed),
            partitions_aggregated: self.partitions_aggregated.load(Ordering::Relaxed),
            total_partitions: self.total_partitions.load(Ordering::Relaxed),
            elapsed_secs: self.elapsed_secs(),
            last_progress_nanos: self.last_progress_nanos.load(Ordering::Relaxed),
            current_nanos: self.start_time.elapsed().as_nanos() as u64,
        }
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn signal_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

impl Default for TelemetryBlackboard {
    fn default() -> Self {
        Self {
            stage: AtomicU64::new(Stage::Initializing as u64),
            sweeps: AtomicU64::new(0),
            total_shards: AtomicU64::new(0),
            pending: AtomicU64::new(0),
            in_flight: AtomicU64::new(0),
            done: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            escalations: AtomicU64::new(0),
            partitions_aggregated: AtomicU64::new(0),
            total_partitions: AtomicU64::new(0),
            start_time: Instant::now(),
            last_progress_nanos: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        }
    }
}

/// Snapshot of telemetry state at a point in time
struct TelemetrySnapshot {
    stage: Stage,
    sweeps: u64,
    total_shards: u64,
    pending: u64,
    in_flight: u64,
    done: u64,
    failed: u64,
    escalations: u64,
    partitions_aggregated: u64,
    total_partitions: u64,
    elapsed_secs: f64,
    last_progress_nanos: u64,
    current_nanos: u64,
}

impl TelemetrySnapshot {
    fn progress_pct(&self) -> f64 {
        if self.total_shards == 0 {
            return 0.0;
        }
        ((self.done + self.failed) as f64 / self.total_shards as f64 * 100.0).min(100.0)
    }
}

/// Heartbeat output configuration
pub struct HeartbeatConfig {
    /// Interval between heartbeats (seconds)
    pub interval_secs: u64,
    /// Stall warning threshold (seconds with no shard reaching a terminal state)
    pub stall_threshold_secs: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            stall_threshold_secs: 6 * 3600,
        }
    }
}

/// Handle to the heartbeat thread
pub struct HeartbeatHandle {
    handle: Option<JoinHandle<()>>,
    blackboard: Arc<TelemetryBlackboard>,
}

impl HeartbeatHandle {
    /// Spawn the heartbeat thread
    pub fn spawn(blackboard: Arc<TelemetryBlackboard>, config: HeartbeatConfig) -> io::Result<Self> {
        let bb = blackboard.clone();
        let is_tty = io::stderr().is_terminal();

        let handle = thread::Builder::new()
            .name("heartbeat".to_string())
            .spawn(move || {
                heartbeat_loop(bb, config, is_tty);
            })?;

        Ok(Self {
            handle: Some(handle),
            blackboard,
        })
    }

    /// Signal shutdown and wait for thread to finish
    pub fn shutdown(mut self) {
        self.blackboard.signal_shutdown();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.blackboard.signal_shutdown();
        // Don't block in drop - just signal shutdown
    }
}

/// Format duration in human-readable form
fn format_duration(secs: f64) -> String {
    if secs < 60.0 {
        format!("{:.0}s", secs)
    } else if secs < 3600.0 {
        let mins = (secs / 60.0).floor();
        let remaining_secs = secs % 60.0;
        format!("{:.0}m{:.0}s", mins, remaining_secs)
    } else {
        format!("{:.1}h", secs / 3600.0)
    }
}

/// Main heartbeat loop
fn heartbeat_loop(bb: Arc<TelemetryBlackboard>, config: HeartbeatConfig, is_tty: bool) {
    let interval = Duration::from_secs(config.interval_secs.max(1));
    let tick = Duration::from_millis(200);

    'outer: loop {
        // Sleep in short ticks so shutdown is not delayed by a full interval
        let wake = Instant::now() + interval;
        while Instant::now() < wake {
            if bb.is_shutdown() {
                break 'outer;
            }
            thread::sleep(tick);
        }

        let snap = bb.snapshot();
        let stall_secs =
            (snap.current_nanos.saturating_sub(snap.last_progress_nanos)) / 1_000_000_000;
        let is_stalled = stall_secs > config.stall_threshold_secs;

        if is_tty {
            print_tty_progress(&snap, is_stalled);
        } else {
            print_log_progress(&snap, is_stalled);
        }
    }

    // Clear TTY line on shutdown
    if is_tty {
        eprint!("\r\x1b[K");
        let _ = io::stderr().flush();
    }
}

/// Print progress for TTY (rewriting single line)
fn print_tty_progress(snap: &TelemetrySnapshot, is_stalled: bool) {
    let progress_pct = snap.progress_pct();

    let bar_width = 20;
    let filled = ((progress_pct / 100.0) * bar_width as f64) as usize;
    let bar: String = "=".repeat(filled.min(bar_width))
        + &" ".repeat(bar_width.saturating_sub(filled));

    let stall_str = if is_stalled { " [STALLED]" } else { "" };

    eprint!(
        "\r[{}] {:>5.1}% | {} | sweep {} | pend {} run {} done {} fail {} | mem+ {} | P{}/{} | {}{}    \x1b[K",
        bar,
        progress_pct,
        snap.stage.as_str(),
        snap.sweeps,
        snap.pending,
        snap.in_flight,
        snap.done,
        snap.failed,
        snap.escalations,
        snap.partitions_aggregated,
        snap.total_partitions,
        format_duration(snap.elapsed_secs),
        stall_str
    );
    let _ = io::stderr().flush();
}

/// Print progress for non-TTY (structured log line)
fn print_log_progress(snap: &TelemetrySnapshot, is_stalled: bool) {
    eprintln!(
        "[HEARTBEAT] stage=\"{}\" sweep={} shards={} pending={} in_flight={} done={} failed={} \
         escalations={} partitions={}/{} elapsed={:.0}s stalled={}",
        snap.stage.as_str(),
        snap.sweeps,
        snap.total_shards,
        snap.pending,
        snap.in_flight,
        snap.done,
        snap.failed,
        snap.escalations,
        snap.partitions_aggregated,
        snap.total_partitions,
        snap.elapsed_secs,
        is_stalled
    );
}
