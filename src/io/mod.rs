//! # I/O Module
//!
//! File reading/writing boundaries: reference scanning for partition
//! discovery, the output naming convention, and the append-only run logs.

pub mod layout;
pub mod reference;
pub mod runlog;

pub use layout::OutputLayout;
pub use reference::{scan_max_coordinate, ReferenceExtent};
pub use runlog::{ErrorLog, ProgressLog};
