//! # Partition Discovery
//!
//! ## Role
//! Sizes every partition once at startup: scan its reference for the largest
//! coordinate and derive `shard_count = ceil(max_coordinate / chunk_length)`.
//!
//! Any failure here aborts the run before a single job is submitted; without
//! shard counts nothing can be scheduled. An empty reference is an error
//! rather than a zero-shard partition.

use std::path::PathBuf;

use rayon::prelude::*;
use tracing::{info, info_span};

use crate::data::partition::checked_shard_count;
use crate::data::{Partition, PartitionIdx};
use crate::error::{ChunkjobError, Result};
use crate::io::reference::scan_max_coordinate;

/// A configured partition before discovery
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionSpec {
    pub name: String,
    pub reference: PathBuf,
}

impl PartitionSpec {
    pub fn new(name: impl Into<String>, reference: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            reference: reference.into(),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Partitioner {
    chunk_length: u64,
    position_column: usize,
}

impl Partitioner {
    pub fn new(chunk_length: u64, position_column: usize) -> Self {
        assert!(chunk_length > 0, "chunk length must be positive");
        assert!(position_column >= 1, "position column is 1-based");
        Self {
            chunk_length,
            position_column,
        }
    }

    pub fn chunk_length(&self) -> u64 {
        self.chunk_length
    }

    /// Size one partition
    pub fn discover_one(&self, idx: PartitionIdx, spec: &PartitionSpec) -> Result<Partition> {
        let extent = scan_max_coordinate(&spec.reference, self.position_column)?;
        if extent.n_records == 0 {
            return Err(ChunkjobError::EmptyPartition {
                partition: spec.name.clone(),
                path: spec.reference.clone(),
            });
        }
        if checked_shard_count(extent.max_coordinate, self.chunk_length).is_none() {
            return Err(ChunkjobError::config(format!(
                "partition {}: max coordinate {} needs more than {} shards of length {}",
                spec.name,
                extent.max_coordinate,
                u32::MAX,
                self.chunk_length
            )));
        }
        let partition = Partition::new(
            idx,
            &spec.name,
            &spec.reference,
            extent.max_coordinate,
            self.chunk_length,
        );
        info!(
            partition = %partition.name,
            records = extent.n_records,
            max_coordinate = partition.max_coordinate,
            shards = partition.shard_count,
            "discovered partition"
        );
        Ok(partition)
    }

    /// Size all partitions (in parallel); result order matches `specs`.
    pub fn discover(&self, specs: &[PartitionSpec]) -> Result<Vec<Partition>> {
        info_span!("discover_partitions", n = specs.len()).in_scope(|| {
            if specs.len() > usize::from(u16::MAX) + 1 {
                return Err(ChunkjobError::config(format!(
                    "too many partitions: {}",
                    specs.len()
                )));
            }
            specs
                .par_iter()
                .enumerate()
                .map(|(i, spec)| self.discover_one(PartitionIdx::new(i as u16), spec))
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    use flate2::write::GzEncoder;
    use flate2::Compression;

    fn legend(dir: &std::path::Path, name: &str, positions: &[u64]) -> PathBuf {
        let path = dir.join(name);
        let mut enc = GzEncoder::new(File::create(&path).unwrap(), Compression::fast());
        writeln!(enc, "id position a0 a1").unwrap();
        for (i, p) in positions.iter().enumerate() {
            writeln!(enc, "rs{} {} A G", i, p).unwrap();
        }
        enc.finish().unwrap();
        path
    }

    #[test]
    fn test_chr1_scenario_has_three_shards() {
        let dir = tempfile::tempdir().unwrap();
        let path = legend(dir.path(), "chr1.legend.gz", &[10_177, 4_000_000, 12_300_000]);
        let p = Partitioner::new(5_000_000, 2)
            .discover_one(PartitionIdx::new(0), &PartitionSpec::new("chr1", path))
            .unwrap();
        assert_eq!(p.max_coordinate, 12_300_000);
        assert_eq!(p.shard_count, 3);
    }

    #[test]
    fn test_discover_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let specs: Vec<PartitionSpec> = (1..=5)
            .map(|c| {
                let name = format!("chr{}", c);
                let path = legend(dir.path(), &format!("{}.legend.gz", name), &[c * 1_000_000]);
                PartitionSpec::new(name, path)
            })
            .collect();
        let parts = Partitioner::new(2_000_000, 2).discover(&specs).unwrap();
        let names: Vec<&str> = parts.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["chr1", "chr2", "chr3", "chr4", "chr5"]);
        let counts: Vec<u32> = parts.iter().map(|p| p.shard_count).collect();
        assert_eq!(counts, vec![1, 1, 2, 2, 3]);
        assert!(parts.iter().enumerate().all(|(i, p)| p.idx.as_usize() == i));
    }

    #[test]
    fn test_empty_reference_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = legend(dir.path(), "chrY.legend.gz", &[]);
        let err = Partitioner::new(5_000_000, 2)
            .discover(&[PartitionSpec::new("chrY", path)])
            .unwrap_err();
        assert!(matches!(err, ChunkjobError::EmptyPartition { ref partition, .. } if partition == "chrY"));
        assert!(err.is_discovery());
    }

    #[test]
    fn test_shard_count_overflow_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = legend(dir.path(), "chr1.legend.gz", &[5_000_000_000]);
        let err = Partitioner::new(1, 2)
            .discover_one(PartitionIdx::new(0), &PartitionSpec::new("chr1", path))
            .unwrap_err();
        assert!(matches!(err, ChunkjobError::Config { .. }));
    }

    #[test]
    fn test_one_unreadable_partition_fails_discovery() {
        let dir = tempfile::tempdir().unwrap();
        let good = legend(dir.path(), "chr1.legend.gz", &[100]);
        let specs = vec![
            PartitionSpec::new("chr1", good),
            PartitionSpec::new("chr2", dir.path().join("missing.legend.gz")),
        ];
        let err = Partitioner::new(5_000_000, 2).discover(&specs).unwrap_err();
        assert!(matches!(err, ChunkjobError::DataAccess { .. }));
    }
}
