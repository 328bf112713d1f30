//! # Per-Core Memory
//!
//! Every worker thread owns a `NumaCoreMemory`: its private cache of
//! free-page offsets, drawn from and returned to the node's pool in
//! batches. Single-page traffic never touches the pool mutex; only a
//! drained or overflowing chunk does, moving half a chunk at a time.
//!
//! ## Refill / Flush Policy
//!
//! - initialize: grab pages until the chunk is 50% full
//! - `grab_free_page` on an empty chunk: refill `capacity / 2` from the
//!   pool first
//! - `release_free_page` on a full chunk: flush `capacity / 2` to the
//!   pool first
//! - uninitialize: release the entire chunk back to the pool
//!
//! The 50% steady state keeps both directions cheap: a thread that
//! alternates allocation and release never hits the pool at all.
//!
//! A failed flush means the pool's free queue would overflow, which can
//! only happen after a double-release. That is a fatal invariant
//! violation: it is logged and the process aborts.

use std::sync::Arc;

use eyre::WrapErr;
use tracing::{debug, error};

use crate::error::ErrorCode;
use crate::lifecycle::Initializable;
use crate::memory::page_pool::{PagePool, PagePoolOffset, PagePoolOffsetChunk};
use crate::thread::ThreadId;

pub struct NumaCoreMemory {
    core_id: ThreadId,
    pool: Arc<PagePool>,
    chunk: PagePoolOffsetChunk,
    initialized: bool,
}

impl NumaCoreMemory {
    pub fn new(pool: Arc<PagePool>, core_id: ThreadId, chunk_capacity: usize) -> Self {
        Self {
            core_id,
            pool,
            chunk: PagePoolOffsetChunk::new(chunk_capacity),
            initialized: false,
        }
    }

    pub fn core_id(&self) -> ThreadId {
        self.core_id
    }

    pub fn pool(&self) -> &Arc<PagePool> {
        &self.pool
    }

    /// Number of offsets currently cached in the chunk.
    pub fn cached_pages(&self) -> usize {
        self.chunk.size()
    }

    /// Takes one free page from the chunk, refilling from the pool when
    /// the chunk is empty. `NoFreePages` means both the chunk and the
    /// pool are exhausted.
    pub fn grab_free_page(&mut self) -> Result<PagePoolOffset, ErrorCode> {
        if self.chunk.is_empty() {
            let refill = (self.chunk.capacity() / 2) as u32;
            self.pool.grab(refill, &mut self.chunk)?;
        }
        debug_assert!(!self.chunk.is_empty());
        Ok(self.chunk.pop())
    }

    /// Returns one page to the chunk, flushing half to the pool when the
    /// chunk is full.
    pub fn release_free_page(&mut self, offset: PagePoolOffset) {
        if self.chunk.is_full() {
            let flush = (self.chunk.capacity() / 2) as u32;
            if let Err(code) = self.pool.release(flush, &mut self.chunk) {
                // Overflowing the pool queue means pages were released
                // twice; continuing would corrupt the free list.
                error!(
                    core = ?self.core_id,
                    code = code.value(),
                    "free queue overflow on chunk flush; aborting"
                );
                std::process::abort();
            }
        }
        self.chunk.push(offset);
    }
}

impl Initializable for NumaCoreMemory {
    fn initialize(&mut self) -> eyre::Result<()> {
        if self.initialized {
            return Ok(());
        }
        debug!(core = ?self.core_id, "initializing per-core memory");
        let half = (self.chunk.capacity() / 2) as u32;
        self.pool
            .grab(half, &mut self.chunk)
            .wrap_err("seeding the core's free-page chunk")?;
        self.initialized = true;
        Ok(())
    }

    fn uninitialize(&mut self) -> eyre::Result<()> {
        if !self.initialized {
            return Ok(());
        }
        debug!(
            core = ?self.core_id,
            cached = self.chunk.size(),
            "releasing per-core memory"
        );
        let outstanding = self.chunk.size() as u32;
        self.pool
            .release(outstanding, &mut self.chunk)
            .wrap_err("returning the core's free-page chunk")?;
        self.initialized = false;
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::constants::PAGE_SIZE;
    use crate::config::MemoryOptions;

    fn test_pool(total_pages: u64, reserved: u32) -> Arc<PagePool> {
        let options = MemoryOptions {
            page_pool_size_per_node: total_pages * PAGE_SIZE as u64,
            pages_for_free_pool: reserved,
            offset_chunk_size: 64,
            use_hugepages: false,
        };
        Arc::new(PagePool::new(&options, 0).unwrap())
    }

    #[test]
    fn initialize_seeds_half_chunk() {
        let pool = test_pool(256, 16);
        let mut memory = NumaCoreMemory::new(Arc::clone(&pool), ThreadId::new(0, 0), 64);
        memory.initialize().unwrap();

        assert!(memory.is_initialized());
        assert_eq!(memory.cached_pages(), 32);
        assert_eq!(pool.free_count(), 240 - 32);
    }

    #[test]
    fn initialize_is_idempotent() {
        let pool = test_pool(256, 16);
        let mut memory = NumaCoreMemory::new(Arc::clone(&pool), ThreadId::new(0, 0), 64);
        memory.initialize().unwrap();
        memory.initialize().unwrap();
        assert_eq!(memory.cached_pages(), 32);
    }

    #[test]
    fn grab_pops_from_chunk_without_touching_pool() {
        let pool = test_pool(256, 16);
        let mut memory = NumaCoreMemory::new(Arc::clone(&pool), ThreadId::new(0, 0), 64);
        memory.initialize().unwrap();
        let pool_free_before = pool.free_count();

        let offset = memory.grab_free_page().unwrap();
        assert!(offset >= 16 && offset < 256);
        assert_eq!(memory.cached_pages(), 31);
        assert_eq!(pool.free_count(), pool_free_before);
    }

    #[test]
    fn empty_chunk_refills_from_pool() {
        let pool = test_pool(256, 16);
        let mut memory = NumaCoreMemory::new(Arc::clone(&pool), ThreadId::new(0, 0), 64);
        memory.initialize().unwrap();

        for _ in 0..32 {
            memory.grab_free_page().unwrap();
        }
        assert_eq!(memory.cached_pages(), 0);

        // The next grab pulls capacity/2 = 32 more from the pool.
        memory.grab_free_page().unwrap();
        assert_eq!(memory.cached_pages(), 31);
        assert_eq!(pool.free_count(), 240 - 64);
    }

    #[test]
    fn full_chunk_flushes_to_pool() {
        let pool = test_pool(256, 16);
        let mut memory = NumaCoreMemory::new(Arc::clone(&pool), ThreadId::new(0, 0), 64);
        memory.initialize().unwrap();

        // Park 32 extra offsets grabbed straight from the pool, filling
        // the chunk to capacity.
        let mut side = PagePoolOffsetChunk::new(33);
        pool.grab(32, &mut side).unwrap();
        while !side.is_empty() {
            let offset = side.pop();
            memory.release_free_page(offset);
        }
        assert_eq!(memory.cached_pages(), 64);
        assert_eq!(pool.free_count(), 240 - 64);

        // Releasing into a full chunk flushes capacity/2 first.
        pool.grab(1, &mut side).unwrap();
        memory.release_free_page(side.pop());
        assert_eq!(memory.cached_pages(), 33);
        assert_eq!(pool.free_count(), 240 - 33);

        memory.uninitialize().unwrap();
        assert_eq!(pool.free_count(), 240);
    }

    #[test]
    fn exhausted_pool_surfaces_no_free_pages() {
        let pool = test_pool(64, 8);
        let mut memory = NumaCoreMemory::new(Arc::clone(&pool), ThreadId::new(0, 0), 64);
        memory.initialize().unwrap();

        let mut grabbed = 0;
        loop {
            match memory.grab_free_page() {
                Ok(_) => grabbed += 1,
                Err(code) => {
                    assert_eq!(code, ErrorCode::NoFreePages);
                    break;
                }
            }
        }
        assert_eq!(grabbed, 56);
    }

    #[test]
    fn uninitialize_returns_everything() {
        let pool = test_pool(256, 16);
        let mut memory = NumaCoreMemory::new(Arc::clone(&pool), ThreadId::new(0, 0), 64);
        memory.initialize().unwrap();
        memory.grab_free_page().unwrap();
        memory.uninitialize().unwrap();

        assert!(!memory.is_initialized());
        assert_eq!(memory.cached_pages(), 0);
        // One page is still held by the caller of grab_free_page.
        assert_eq!(pool.free_count(), 239);
    }
}
