//! # Pipeline Module
//!
//! High-level orchestration of a chunked run.
//! Coordinates discovery, scheduling and aggregation.

pub mod aggregator;
pub mod orchestrator;
pub mod partitioner;

pub use aggregator::{Aggregator, Completeness};
pub use orchestrator::{
    Orchestrator, OrchestratorSettings, PartitionReport, PartitionStatus, RunReport, StopReason,
    SweepSummary,
};
pub use partitioner::{PartitionSpec, Partitioner};
