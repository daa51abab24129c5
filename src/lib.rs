//! # Chunkjob Library Root
//!
//! ## Role
//! The crate root that declares all public modules and re-exports common types.
//! The binary is a thin shell over this library, so the control loop can be
//! driven from tests with any `SchedulerClient`.
//!
//! ## Module Structure
//! ```text
//! chunkjob
//! ├── data        # Partitions, shard records and the registry
//! ├── io          # Reference scanning, output layout, run logs
//! ├── scheduler   # Scheduler trait, LSF adapter, status table, tool command
//! ├── pipelines   # Discovery, the control loop, aggregation
//! └── utils       # Thread pool, backoff, telemetry heartbeat
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod io;
pub mod pipelines;
pub mod scheduler;
pub mod utils;

pub use config::Config;
pub use data::{Partition, Registry, ShardKey, ShardRecord, ShardState};
pub use error::{ChunkjobError, Result};
pub use pipelines::{Aggregator, Orchestrator, OrchestratorSettings, Partitioner, RunReport};
pub use scheduler::{SchedulerClient, StatusTable};
