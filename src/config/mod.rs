//! # Engine Options
//!
//! Configuration for the engine, grouped by subsystem the way the engine
//! itself is grouped. All knobs are plain integers validated once at
//! `Engine::initialize()`; invalid combinations are rejected up front so
//! that the rest of the engine can assume consistent options.
//!
//! ## Recognized Keys
//!
//! | Key                             | Field                                   |
//! |---------------------------------|-----------------------------------------|
//! | `xct.max_read_set_size`         | `XctOptions::max_read_set_size`         |
//! | `xct.max_write_set_size`        | `XctOptions::max_write_set_size`        |
//! | `memory.page_pool_size_per_node`| `MemoryOptions::page_pool_size_per_node`|
//! | `memory.pages_for_free_pool`    | `MemoryOptions::pages_for_free_pool`    |
//! | `thread.group_count`            | `ThreadOptions::group_count`            |
//! | `thread.thread_count_per_group` | `ThreadOptions::thread_count_per_group` |
//!
//! One thread group maps to one NUMA node; `group_count` therefore also
//! sets the number of page pools.

pub mod constants;

use eyre::{ensure, Result};

use crate::config::constants::{MAX_NUMA_NODES, OFFSETS_PER_FREE_POOL_PAGE, PAGE_SIZE};

/// Transaction-related sizes. Read/write/pointer sets are allocated once
/// per thread at initialize with exactly these capacities.
#[derive(Debug, Clone)]
pub struct XctOptions {
    /// Maximum number of read-set entries per transaction.
    pub max_read_set_size: u32,
    /// Maximum number of write-set entries per transaction.
    pub max_write_set_size: u32,
    /// Maximum number of pointer-set entries per transaction.
    pub max_pointer_set_size: u32,
}

impl Default for XctOptions {
    fn default() -> Self {
        Self {
            max_read_set_size: 4096,
            max_write_set_size: 1024,
            max_pointer_set_size: 1024,
        }
    }
}

/// Memory layout knobs. One page pool is created per thread group (NUMA
/// node), each backed by a single contiguous aligned region.
#[derive(Debug, Clone)]
pub struct MemoryOptions {
    /// Bytes of page-pool memory per NUMA node. Must be a multiple of
    /// `PAGE_SIZE`.
    pub page_pool_size_per_node: u64,
    /// Pages at the start of each pool reserved for the circular free
    /// queue. Also guarantees offset 0 never names a data page.
    pub pages_for_free_pool: u32,
    /// Capacity of each core's free-page offset chunk.
    pub offset_chunk_size: u32,
    /// Ask the kernel for hugepages when mapping pool regions. Falls back
    /// to normal pages with a warning if the request is refused.
    pub use_hugepages: bool,
}

impl Default for MemoryOptions {
    fn default() -> Self {
        Self {
            page_pool_size_per_node: 64 << 20,
            pages_for_free_pool: 128,
            offset_chunk_size: 512,
            use_hugepages: false,
        }
    }
}

/// Worker thread topology: `group_count` NUMA nodes, each with
/// `thread_count_per_group` core-pinned workers.
#[derive(Debug, Clone)]
pub struct ThreadOptions {
    pub group_count: u16,
    pub thread_count_per_group: u16,
}

impl Default for ThreadOptions {
    fn default() -> Self {
        Self {
            group_count: 1,
            thread_count_per_group: 2,
        }
    }
}

/// Per-thread redo-log buffer sizing.
#[derive(Debug, Clone)]
pub struct LogOptions {
    /// Bytes of private log buffer per worker thread.
    pub thread_buffer_size: u32,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            thread_buffer_size: 1 << 20,
        }
    }
}

/// The full option tree handed to [`crate::engine::Engine::new`].
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    pub xct: XctOptions,
    pub memory: MemoryOptions,
    pub thread: ThreadOptions,
    pub log: LogOptions,
}

impl EngineOptions {
    /// Validates cross-field consistency. Called by `Engine::initialize`.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.thread.group_count >= 1,
            "thread.group_count must be at least 1"
        );
        ensure!(
            (self.thread.group_count as usize) <= MAX_NUMA_NODES,
            "thread.group_count {} exceeds supported NUMA nodes {}",
            self.thread.group_count,
            MAX_NUMA_NODES
        );
        ensure!(
            self.thread.thread_count_per_group >= 1,
            "thread.thread_count_per_group must be at least 1"
        );
        ensure!(
            self.memory.page_pool_size_per_node % PAGE_SIZE as u64 == 0,
            "memory.page_pool_size_per_node {} is not a multiple of page size {}",
            self.memory.page_pool_size_per_node,
            PAGE_SIZE
        );

        let total_pages = self.memory.page_pool_size_per_node / PAGE_SIZE as u64;
        ensure!(
            (self.memory.pages_for_free_pool as u64) < total_pages,
            "memory.pages_for_free_pool {} must leave room for data pages (total {})",
            self.memory.pages_for_free_pool,
            total_pages
        );

        // The reserved pages store the free queue; they must be able to
        // name every grabbable page at once.
        let queue_capacity =
            self.memory.pages_for_free_pool as u64 * OFFSETS_PER_FREE_POOL_PAGE as u64;
        let grabbable = total_pages - self.memory.pages_for_free_pool as u64;
        ensure!(
            queue_capacity >= grabbable,
            "free queue capacity {} cannot hold {} grabbable pages; raise \
             memory.pages_for_free_pool",
            queue_capacity,
            grabbable
        );

        ensure!(
            self.memory.offset_chunk_size >= 2,
            "memory.offset_chunk_size must be at least 2"
        );
        ensure!(
            self.xct.max_read_set_size >= 1 && self.xct.max_write_set_size >= 1,
            "read/write set capacities must be at least 1"
        );
        ensure!(
            self.log.thread_buffer_size >= 4096 && self.log.thread_buffer_size % 8 == 0,
            "log.thread_buffer_size must be at least 4096 bytes and 8-byte aligned"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_validate() {
        let options = EngineOptions::default();
        assert!(options.validate().is_ok());
    }

    #[test]
    fn rejects_unaligned_pool_size() {
        let mut options = EngineOptions::default();
        options.memory.page_pool_size_per_node = PAGE_SIZE as u64 * 10 + 1;
        assert!(options.validate().is_err());
    }

    #[test]
    fn rejects_zero_groups() {
        let mut options = EngineOptions::default();
        options.thread.group_count = 0;
        assert!(options.validate().is_err());
    }

    #[test]
    fn rejects_free_pool_swallowing_whole_region() {
        let mut options = EngineOptions::default();
        options.memory.page_pool_size_per_node = PAGE_SIZE as u64 * 64;
        options.memory.pages_for_free_pool = 64;
        assert!(options.validate().is_err());
    }

    #[test]
    fn rejects_undersized_free_queue() {
        let mut options = EngineOptions::default();
        // 1 reserved page can name 1024 pages; 8192 data pages cannot fit.
        options.memory.page_pool_size_per_node = PAGE_SIZE as u64 * 8193;
        options.memory.pages_for_free_pool = 1;
        assert!(options.validate().is_err());
    }
}
