//! # Aggregation
//!
//! Concatenates a partition's shard outputs, in ascending shard order, into
//! one partition-level file. Only fully `Done` partitions are aggregated; a
//! merged output silently missing an interval is worse than none, so any
//! failed shard withholds the whole partition.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{info, info_span, warn};

use crate::data::{Partition, PartitionIdx, Registry, ShardIdx, ShardState};
use crate::error::{ChunkjobError, Result};
use crate::io::OutputLayout;

/// Partition completeness as seen in the registry
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Completeness {
    /// Every shard is Done
    Complete,
    /// Some shards still have work outstanding and none has failed
    InProgress { remaining: usize },
    /// At least one shard Failed; `settled` is true once no shard is still active
    Failed { shards: Vec<ShardIdx>, settled: bool },
}

/// Read-only completeness check for one partition
pub fn completeness(registry: &Registry, partition: PartitionIdx) -> Completeness {
    let records = registry.partition_records(partition);
    let failed: Vec<ShardIdx> = records
        .iter()
        .filter(|r| r.state == ShardState::Failed)
        .map(|r| r.key.shard)
        .collect();
    let remaining = records.iter().filter(|r| !r.state.is_terminal()).count();

    if !failed.is_empty() {
        Completeness::Failed {
            shards: failed,
            settled: remaining == 0,
        }
    } else if remaining > 0 {
        Completeness::InProgress { remaining }
    } else {
        Completeness::Complete
    }
}

#[derive(Clone, Debug)]
pub struct Aggregator {
    layout: OutputLayout,
    remove_shard_outputs: bool,
}

impl Aggregator {
    pub fn new(layout: OutputLayout) -> Self {
        Self {
            layout,
            remove_shard_outputs: false,
        }
    }

    /// Delete shard files after a successful aggregation
    pub fn remove_shard_outputs(mut self, remove: bool) -> Self {
        self.remove_shard_outputs = remove;
        self
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    /// Aggregate a partition if, and only if, every shard is Done.
    ///
    /// Returns `Ok(None)` when the partition is not complete.
    pub fn aggregate_if_complete(
        &self,
        registry: &Registry,
        partition: &Partition,
    ) -> Result<Option<PathBuf>> {
        match completeness(registry, partition.idx) {
            Completeness::Complete => self.aggregate(partition).map(Some),
            _ => Ok(None),
        }
    }

    /// Concatenate shard outputs `1..=shard_count` into `{partition}.{ext}`.
    ///
    /// Writes to a temporary file and renames it into place, so the aggregate
    /// either appears whole or not at all.
    pub fn aggregate(&self, partition: &Partition) -> Result<PathBuf> {
        info_span!("aggregate", partition = %partition.name).in_scope(|| {
            let inputs: Vec<PathBuf> = partition
                .shards()
                .map(|s| self.layout.shard_output(&partition.name, s))
                .collect();
            if let Some(missing) = inputs.iter().find(|p| !p.is_file()) {
                return Err(ChunkjobError::MissingShardOutput {
                    path: missing.clone(),
                });
            }

            let dest = self.layout.partition_output(&partition.name);
            let partial = self
                .layout
                .dir()
                .join(format!(".{}.{}.partial", partition.name, self.layout.ext()));

            let written = match concatenate(&inputs, &partial) {
                Ok(n) => n,
                Err(e) => {
                    let _ = fs::remove_file(&partial);
                    return Err(e.into());
                }
            };
            fs::rename(&partial, &dest)?;
            info!(shards = inputs.len(), bytes = written, path = ?dest, "aggregated");

            if self.remove_shard_outputs {
                for input in &inputs {
                    if let Err(e) = fs::remove_file(input) {
                        warn!(path = ?input, error = %e, "could not remove shard output");
                    }
                }
            }
            Ok(dest)
        })
    }

    /// Remove a partition aggregate left over from an earlier run.
    ///
    /// Returns true if a file was removed.
    pub fn discard(&self, partition: &Partition) -> Result<bool> {
        let dest = self.layout.partition_output(&partition.name);
        match fs::remove_file(&dest) {
            Ok(()) => {
                warn!(partition = %partition.name, path = ?dest, "removed stale aggregate");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn concatenate(inputs: &[PathBuf], dest: &Path) -> io::Result<u64> {
    let mut out = BufWriter::new(File::create(dest)?);
    let mut written = 0;
    for input in inputs {
        let mut reader = BufReader::new(File::open(input)?);
        written += io::copy(&mut reader, &mut out)?;
    }
    out.flush()?;
    out.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{JobHandle, RawStatus, ShardKey};

    fn setup(n_shards: u64) -> (tempfile::TempDir, Registry, Aggregator) {
        let dir = tempfile::tempdir().unwrap();
        let partitions = vec![Partition::new(
            PartitionIdx::new(0),
            "chrX",
            "chrX.legend.gz",
            n_shards * 100,
            100,
        )];
        let registry = Registry::initialize(partitions, 1000);
        let aggregator = Aggregator::new(OutputLayout::new(dir.path(), "gen"));
        (dir, registry, aggregator)
    }

    fn finish(registry: &Registry, shard: u32, ok: bool) {
        let key = ShardKey::new(PartitionIdx::new(0), ShardIdx::new(shard));
        registry.update(key, |r| {
            r.mark_submitted(JobHandle(shard as u64));
            if ok {
                r.mark_done(RawStatus::new("DONE", Some(0)));
            } else {
                r.mark_failed(crate::data::FailureReason::JobFailed {
                    status: RawStatus::new("EXIT", Some(1)),
                });
            }
        });
    }

    #[test]
    fn test_concatenates_in_shard_order() {
        let (dir, registry, agg) = setup(3);
        for s in [3u32, 1, 2] {
            std::fs::write(dir.path().join(format!("chrX.{}.gen", s)), format!("shard{}\n", s)).unwrap();
            finish(&registry, s, true);
        }
        let partition = &registry.partitions()[0];
        let path = agg.aggregate_if_complete(&registry, partition).unwrap().unwrap();
        assert_eq!(path, dir.path().join("chrX.gen"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "shard1\nshard2\nshard3\n");
    }

    #[test]
    fn test_incomplete_partition_is_not_aggregated() {
        let (dir, registry, agg) = setup(2);
        std::fs::write(dir.path().join("chrX.1.gen"), "a").unwrap();
        finish(&registry, 1, true);
        let partition = &registry.partitions()[0];
        assert_eq!(
            completeness(&registry, partition.idx),
            Completeness::InProgress { remaining: 1 }
        );
        assert!(agg.aggregate_if_complete(&registry, partition).unwrap().is_none());
        assert!(!dir.path().join("chrX.gen").exists());
    }

    #[test]
    fn test_failed_shard_withholds_partition() {
        let (dir, registry, agg) = setup(2);
        std::fs::write(dir.path().join("chrX.1.gen"), "a").unwrap();
        finish(&registry, 1, true);
        finish(&registry, 2, false);
        let partition = &registry.partitions()[0];
        assert_eq!(
            completeness(&registry, partition.idx),
            Completeness::Failed {
                shards: vec![ShardIdx::new(2)],
                settled: true
            }
        );
        assert!(agg.aggregate_if_complete(&registry, partition).unwrap().is_none());
        assert!(!dir.path().join("chrX.gen").exists());
    }

    #[test]
    fn test_discard_removes_stale_aggregate() {
        let (dir, registry, agg) = setup(1);
        let partition = &registry.partitions()[0];
        assert!(!agg.discard(partition).unwrap());
        std::fs::write(dir.path().join("chrX.gen"), "OLD RUN\n").unwrap();
        assert!(agg.discard(partition).unwrap());
        assert!(!dir.path().join("chrX.gen").exists());
    }

    #[test]
    fn test_missing_shard_file_is_reported() {
        let (dir, registry, agg) = setup(2);
        std::fs::write(dir.path().join("chrX.1.gen"), "a").unwrap();
        finish(&registry, 1, true);
        finish(&registry, 2, true);
        let partition = &registry.partitions()[0];
        let err = agg.aggregate_if_complete(&registry, partition).unwrap_err();
        assert!(matches!(err, ChunkjobError::MissingShardOutput { .. }));
        assert!(!dir.path().join("chrX.gen").exists());
    }

    #[test]
    fn test_shard_outputs_removed_on_request() {
        let (dir, registry, agg) = setup(1);
        let agg = agg.remove_shard_outputs(true);
        std::fs::write(dir.path().join("chrX.1.gen"), "only").unwrap();
        finish(&registry, 1, true);
        let partition = &registry.partitions()[0];
        agg.aggregate(partition).unwrap();
        assert!(!dir.path().join("chrX.1.gen").exists());
        assert_eq!(std::fs::read_to_string(dir.path().join("chrX.gen")).unwrap(), "only");
    }
}
