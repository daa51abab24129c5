//! # Utilities Module
//!
//! ## Role
//! Cross-cutting helpers that don't belong in domain-specific modules.
//!
//! ## Sub-modules
//! - `backoff`: Exponential retry delays for scheduler queries
//! - `telemetry`: Atomic progress blackboard and heartbeat thread
//! - `threading`: Rayon thread pool configuration

pub mod backoff;
pub mod telemetry;
pub mod threading;
