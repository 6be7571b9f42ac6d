//! Configuration management for RaStore
//!
//! Provides worker-pool presets for different hardware classes.
//! The worker count fixes both the number of per-worker blob segments a
//! column builder carries and the number of hash shards used by index builds.

use crate::error::{StoreError, StoreResult};

/// Engine configuration with hardware presets
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of fork/join workers (and hash shards)
    pub worker_threads: usize,
    /// Sync persisted segment files to stable storage before `save` returns
    pub durable_writes: bool,
    /// Verify CRC32C of segment files when loading from disk
    pub verify_checksums: bool,
    /// Maximum number of memoized indices kept by the engine
    pub index_cache_capacity: usize,
}

impl EngineConfig {
    /// Server-class: one worker per available core
    pub fn server() -> Self {
        Self {
            worker_threads: num_cpus::get().max(1),
            durable_writes: true,
            verify_checksums: true,
            index_cache_capacity: 1024,
        }
    }

    /// Laptop-class: at most four workers, no fsync on save
    pub fn laptop() -> Self {
        Self {
            worker_threads: num_cpus::get().clamp(1, 4),
            durable_writes: false,
            verify_checksums: true,
            index_cache_capacity: 256,
        }
    }

    /// One worker. Group member order equals source row order.
    pub fn single_threaded() -> Self {
        Self {
            worker_threads: 1,
            durable_writes: false,
            verify_checksums: true,
            index_cache_capacity: 64,
        }
    }

    /// Override the worker count.
    pub fn with_workers(mut self, worker_threads: usize) -> Self {
        self.worker_threads = worker_threads;
        self
    }

    /// Validate all configuration parameters
    pub fn validate(&self) -> StoreResult<()> {
        if self.worker_threads == 0 || self.worker_threads > 1024 {
            return Err(StoreError::InvalidConfig(
                "worker_threads must be in [1, 1024]".into(),
            ));
        }
        if self.index_cache_capacity == 0 {
            return Err(StoreError::InvalidConfig(
                "index_cache_capacity must be > 0".into(),
            ));
        }
        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self { Self::server() }
}
