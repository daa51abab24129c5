//! # Shard Registry
//!
//! Authoritative store of shard records, keyed by the flat `ShardKey`.
//!
//! The key set is fixed by `initialize` and never changes during a run;
//! records are retained after they reach a terminal state. Each record sits
//! behind its own lock, so concurrent sweeps serialize per shard and never
//! across shards.

use std::collections::BTreeMap;

use parking_lot::Mutex;
use serde::Serialize;

use crate::data::shard::{ShardRecord, ShardState};
use crate::data::{Partition, PartitionIdx, ShardIdx, ShardKey};

/// Per-state shard tallies
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub pending: usize,
    pub submitted: usize,
    pub running: usize,
    pub done: usize,
    pub failed: usize,
}

impl StateCounts {
    pub fn total(&self) -> usize {
        self.pending + self.submitted + self.running + self.done + self.failed
    }

    pub fn terminal(&self) -> usize {
        self.done + self.failed
    }

    pub fn in_flight(&self) -> usize {
        self.submitted + self.running
    }

    fn add(&mut self, state: ShardState) {
        match state {
            ShardState::Pending => self.pending += 1,
            ShardState::Submitted => self.submitted += 1,
            ShardState::Running => self.running += 1,
            ShardState::Done => self.done += 1,
            ShardState::Failed => self.failed += 1,
        }
    }
}

/// Store of every shard in the run
pub struct Registry {
    partitions: Vec<Partition>,
    shards: BTreeMap<ShardKey, Mutex<ShardRecord>>,
}

impl Registry {
    /// Populate every shard of every partition as `Pending` with the default budget.
    ///
    /// Partitions must be supplied in index order (`partitions[i].idx == i`).
    pub fn initialize(partitions: Vec<Partition>, default_memory_mb: u32) -> Self {
        let mut shards = BTreeMap::new();
        for (i, partition) in partitions.iter().enumerate() {
            assert_eq!(partition.idx.as_usize(), i, "partitions out of order");
            for shard in partition.shards() {
                let key = ShardKey::new(partition.idx, shard);
                shards.insert(key, Mutex::new(ShardRecord::new(key, default_memory_mb)));
            }
        }
        Self { partitions, shards }
    }

    pub fn partitions(&self) -> &[Partition] {
        &self.partitions
    }

    pub fn partition(&self, idx: PartitionIdx) -> Option<&Partition> {
        self.partitions.get(idx.as_usize())
    }

    /// Number of shards
    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }

    /// All keys in deterministic order (ascending partition, ascending shard)
    pub fn keys(&self) -> Vec<ShardKey> {
        self.shards.keys().copied().collect()
    }

    /// Snapshot of one record
    pub fn get(&self, key: ShardKey) -> Option<ShardRecord> {
        self.shards.get(&key).map(|r| r.lock().clone())
    }

    /// Apply one mutation to a record while holding its lock.
    pub fn update<R>(&self, key: ShardKey, mutator: impl FnOnce(&mut ShardRecord) -> R) -> Option<R> {
        self.shards.get(&key).map(|r| {
            let mut guard = r.lock();
            mutator(&mut guard)
        })
    }

    /// Visit every record in deterministic order
    pub fn for_each_in_order(&self, mut f: impl FnMut(&ShardRecord)) {
        for record in self.shards.values() {
            f(&*record.lock());
        }
    }

    /// Snapshots of one partition's records, ascending by shard index
    pub fn partition_records(&self, idx: PartitionIdx) -> Vec<ShardRecord> {
        let lo = ShardKey::new(idx, ShardIdx(0));
        let hi = ShardKey::new(idx, ShardIdx(u32::MAX));
        self.shards
            .range(lo..=hi)
            .map(|(_, r)| r.lock().clone())
            .collect()
    }

    /// Snapshots of all records in order
    pub fn snapshot(&self) -> Vec<ShardRecord> {
        let mut out = Vec::with_capacity(self.len());
        self.for_each_in_order(|r| out.push(r.clone()));
        out
    }

    pub fn counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        self.for_each_in_order(|r| counts.add(r.state));
        counts
    }

    pub fn partition_counts(&self, idx: PartitionIdx) -> StateCounts {
        let mut counts = StateCounts::default();
        for r in self.partition_records(idx) {
            counts.add(r.state);
        }
        counts
    }

    /// True once every shard is Done or Failed
    pub fn all_terminal(&self) -> bool {
        self.shards.values().all(|r| r.lock().state.is_terminal())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::JobHandle;

    fn registry() -> Registry {
        let partitions = vec![
            Partition::new(PartitionIdx::new(0), "chr1", "chr1.legend.gz", 12_300_000, 5_000_000),
            Partition::new(PartitionIdx::new(1), "chr2", "chr2.legend.gz", 4_000_000, 5_000_000),
        ];
        Registry::initialize(partitions, 6000)
    }

    #[test]
    fn test_initialize_creates_pending_shards() {
        let reg = registry();
        assert_eq!(reg.len(), 4);
        reg.for_each_in_order(|r| {
            assert_eq!(r.state, ShardState::Pending);
            assert_eq!(r.memory_mb, 6000);
            assert_eq!(r.attempts, 1);
        });
    }

    #[test]
    fn test_iteration_order_is_deterministic() {
        let reg = registry();
        let mut seen = Vec::new();
        reg.for_each_in_order(|r| seen.push((r.key.partition.0, r.key.shard.0)));
        assert_eq!(seen, vec![(0, 1), (0, 2), (0, 3), (1, 1)]);
    }

    #[test]
    fn test_update_applies_to_single_record() {
        let reg = registry();
        let key = ShardKey::new(PartitionIdx::new(0), ShardIdx::new(2));
        reg.update(key, |r| r.mark_submitted(JobHandle(42)));

        assert_eq!(reg.get(key).map(|r| r.state), Some(ShardState::Submitted));
        let counts = reg.counts();
        assert_eq!(counts.submitted, 1);
        assert_eq!(counts.pending, 3);
        assert_eq!(counts.total(), 4);
    }

    #[test]
    fn test_unknown_key_is_none() {
        let reg = registry();
        let key = ShardKey::new(PartitionIdx::new(1), ShardIdx::new(2));
        assert!(reg.get(key).is_none());
        assert!(reg.update(key, |_| ()).is_none());
    }

    #[test]
    fn test_partition_records_are_scoped() {
        let reg = registry();
        let recs = reg.partition_records(PartitionIdx::new(0));
        assert_eq!(recs.len(), 3);
        assert!(recs.iter().all(|r| r.key.partition == PartitionIdx::new(0)));
        assert!(!reg.all_terminal());
    }
}
