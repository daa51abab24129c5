//! # Threading Configuration
//!
//! Rayon pools for partition discovery and for dispatching per-shard
//! scheduler calls during a sweep.

use crate::error::{ChunkjobError, Result};

/// Create a configured thread pool.
pub fn build_thread_pool(n_threads: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(n_threads.max(1))
        .thread_name(|i| format!("chunkjob-worker-{}", i))
        .build()
        .map_err(|e| ChunkjobError::config(format!("Failed to create thread pool: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn test_pool_runs_parallel_map_in_order() {
        let pool = build_thread_pool(4).unwrap();
        assert_eq!(pool.current_num_threads(), 4);
        let out: Vec<u32> = pool.install(|| (0..100u32).into_par_iter().map(|i| i * 2).collect());
        assert_eq!(out, (0..100u32).map(|i| i * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_zero_threads_means_one() {
        let pool = build_thread_pool(0).unwrap();
        assert_eq!(pool.current_num_threads(), 1);
    }
}
