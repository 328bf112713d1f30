//! # Per-Node Page Pool
//!
//! One pool owns one contiguous region of fixed-size pages on one NUMA
//! node. Free pages are tracked as a circular queue of u32 offsets stored
//! *inside the region itself*: the first `pages_for_free_pool` pages hold
//! the queue, the rest are grabbable data pages.
//!
//! ## Region Layout
//!
//! ```text
//! Offset  0 .. pages_for_free_pool      circular free queue (u32 slots)
//! Offset  pages_for_free_pool .. total  data pages
//! ```
//!
//! Spending the leading pages on bookkeeping has a second purpose: no
//! data page ever has offset 0, so 0 can serve as the null offset
//! throughout the engine. Every offset that leaves the pool satisfies
//! `pages_for_free_pool <= offset < total_pages`.
//!
//! ## Free Queue
//!
//! The queue is circular: consumers eat from `head`, releases append at
//! `(head + count) % capacity`. Offsets are never reordered by queue
//! operations. All queue state is guarded by one mutex; the lock is not
//! contentious in practice because transfers move a chunk of offsets
//! (tens to hundreds) per acquisition, via [`PagePoolOffsetChunk`].
//!
//! ## Failure Modes
//!
//! `grab` fails with `NoFreePages` only when it cannot supply a single
//! page; partial fills are success. `release` fails only if the queue
//! would overflow, which means a double-release bug somewhere: total
//! outstanding pages can never exceed capacity in a correct engine.

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::constants::{OFFSETS_PER_FREE_POOL_PAGE, PAGE_SIZE};
use crate::config::MemoryOptions;
use crate::error::ErrorCode;
use crate::memory::aligned::{AlignedMemory, AllocationKind};
use crate::memory::resolver::LocalPageResolver;
use crate::memory::NumaNodeId;

/// Index of a page within its node's pool. 0 is null.
pub type PagePoolOffset = u32;

/// A small bounded stack of page offsets owned by one core. The unit of
/// transfer between a core and its node's pool.
#[derive(Debug)]
pub struct PagePoolOffsetChunk {
    offsets: Box<[PagePoolOffset]>,
    size: usize,
}

impl PagePoolOffsetChunk {
    pub fn new(capacity: usize) -> Self {
        Self {
            offsets: vec![0; capacity].into_boxed_slice(),
            size: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.offsets.len()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn room(&self) -> usize {
        self.capacity() - self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn is_full(&self) -> bool {
        self.size == self.capacity()
    }

    /// Pushes one offset. Caller checks `is_full` first.
    pub fn push(&mut self, offset: PagePoolOffset) {
        debug_assert!(!self.is_full());
        debug_assert!(offset != 0);
        self.offsets[self.size] = offset;
        self.size += 1;
    }

    /// Pops the most recently pushed offset. Caller checks `is_empty`.
    pub fn pop(&mut self) -> PagePoolOffset {
        debug_assert!(!self.is_empty());
        self.size -= 1;
        self.offsets[self.size]
    }
}

struct FreeQueue {
    /// Inclusive head slot of the circular queue.
    head: u64,
    /// Number of free pages currently queued.
    count: u64,
}

/// A single-node page pool.
pub struct PagePool {
    node: NumaNodeId,
    memory: AlignedMemory,
    total_pages: u32,
    pages_for_free_pool: u32,
    /// Number of u32 slots available for the queue.
    queue_capacity: u64,
    queue: Mutex<FreeQueue>,
}

// SAFETY: queue slots are only read/written under the queue mutex; page
// bodies are handed out by offset and touched only by the offset's
// current owner.
unsafe impl Send for PagePool {}
unsafe impl Sync for PagePool {}

impl PagePool {
    /// Maps the region for `node` and seeds the free queue with every
    /// data-page offset, in ascending order.
    pub fn new(options: &MemoryOptions, node: NumaNodeId) -> Result<Self, ErrorCode> {
        let total_pages = (options.page_pool_size_per_node / PAGE_SIZE as u64) as u32;
        let pages_for_free_pool = options.pages_for_free_pool;
        debug_assert!(pages_for_free_pool < total_pages);

        let kind = if options.use_hugepages {
            AllocationKind::Hugepage
        } else {
            AllocationKind::NumaLocal
        };
        let memory = AlignedMemory::allocate(
            options.page_pool_size_per_node as usize,
            PAGE_SIZE,
            kind,
            node,
        )?;

        let queue_capacity = pages_for_free_pool as u64 * OFFSETS_PER_FREE_POOL_PAGE as u64;
        let grabbable = (total_pages - pages_for_free_pool) as u64;
        debug_assert!(queue_capacity >= grabbable);

        let pool = Self {
            node,
            memory,
            total_pages,
            pages_for_free_pool,
            queue_capacity,
            queue: Mutex::new(FreeQueue {
                head: 0,
                count: grabbable,
            }),
        };
        for index in 0..grabbable {
            // SAFETY: index < queue_capacity; exclusive access before the
            // pool is shared.
            unsafe {
                pool.slot_ptr(index)
                    .write(pages_for_free_pool + index as u32);
            }
        }
        debug!(
            node,
            total_pages, pages_for_free_pool, grabbable, "page pool constructed"
        );
        Ok(pool)
    }

    #[inline]
    unsafe fn slot_ptr(&self, slot: u64) -> *mut PagePoolOffset {
        debug_assert!(slot < self.queue_capacity);
        (self.memory.block() as *mut PagePoolOffset).add(slot as usize)
    }

    pub fn numa_node(&self) -> NumaNodeId {
        self.node
    }

    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    pub fn pages_for_free_pool(&self) -> u32 {
        self.pages_for_free_pool
    }

    /// Number of pages currently in the free queue.
    pub fn free_count(&self) -> u64 {
        self.queue.lock().count
    }

    /// Moves up to `desired` offsets from the free queue into `chunk`,
    /// bounded by the chunk's room. Supplying at least one page is
    /// success; an empty pool is `NoFreePages`.
    pub fn grab(
        &self,
        desired: u32,
        chunk: &mut PagePoolOffsetChunk,
    ) -> Result<(), ErrorCode> {
        let mut queue = self.queue.lock();
        if queue.count == 0 {
            return Err(ErrorCode::NoFreePages);
        }
        let moved = (desired as u64).min(chunk.room() as u64).min(queue.count);
        for i in 0..moved {
            let slot = (queue.head + i) % self.queue_capacity;
            // SAFETY: slot < queue_capacity; protected by the queue mutex.
            let offset = unsafe { self.slot_ptr(slot).read() };
            debug_assert!(offset >= self.pages_for_free_pool && offset < self.total_pages);
            chunk.push(offset);
        }
        queue.head = (queue.head + moved) % self.queue_capacity;
        queue.count -= moved;
        Ok(())
    }

    /// Appends up to `desired` offsets from the top of `chunk` to the
    /// tail of the free queue.
    pub fn release(
        &self,
        desired: u32,
        chunk: &mut PagePoolOffsetChunk,
    ) -> Result<(), ErrorCode> {
        let mut queue = self.queue.lock();
        let moved = (desired as u64).min(chunk.size() as u64);
        if queue.count + moved > self.queue_capacity {
            // Only a double-release can get here.
            return Err(ErrorCode::OutOfMemory);
        }
        for i in 0..moved {
            let offset = chunk.pop();
            debug_assert!(offset >= self.pages_for_free_pool && offset < self.total_pages);
            let slot = (queue.head + queue.count + i) % self.queue_capacity;
            // SAFETY: slot < queue_capacity; protected by the queue mutex.
            unsafe { self.slot_ptr(slot).write(offset) };
        }
        queue.count += moved;
        Ok(())
    }

    /// A resolver bound to this pool's base address.
    pub fn resolver(&self) -> LocalPageResolver {
        LocalPageResolver::new(
            self.memory.block(),
            self.pages_for_free_pool,
            self.total_pages,
        )
    }

    /// Warns if pages are still outstanding; called right before the
    /// region is unmapped.
    pub fn warn_if_leaking(&self) {
        let queue = self.queue.lock();
        let expected = (self.total_pages - self.pages_for_free_pool) as u64;
        if queue.count != expected {
            warn!(
                node = self.node,
                free = queue.count,
                expected,
                "page pool torn down with outstanding pages"
            );
        }
    }
}

impl std::fmt::Debug for PagePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PagePool")
            .field("node", &self.node)
            .field("total_pages", &self.total_pages)
            .field("pages_for_free_pool", &self.pages_for_free_pool)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_options(total_pages: u64, reserved: u32) -> MemoryOptions {
        MemoryOptions {
            page_pool_size_per_node: total_pages * PAGE_SIZE as u64,
            pages_for_free_pool: reserved,
            offset_chunk_size: 64,
            use_hugepages: false,
        }
    }

    #[test]
    fn construction_seeds_all_data_pages() {
        let pool = PagePool::new(&small_options(256, 16), 0).unwrap();
        assert_eq!(pool.total_pages(), 256);
        assert_eq!(pool.pages_for_free_pool(), 16);
        assert_eq!(pool.free_count(), 240);
    }

    #[test]
    fn grab_fills_chunk_and_respects_room() {
        let pool = PagePool::new(&small_options(256, 16), 0).unwrap();
        let mut chunk = PagePoolOffsetChunk::new(64);

        pool.grab(32, &mut chunk).unwrap();
        assert_eq!(chunk.size(), 32);
        assert_eq!(pool.free_count(), 208);

        // Desired larger than room: bounded by the chunk.
        pool.grab(1000, &mut chunk).unwrap();
        assert_eq!(chunk.size(), 64);
        assert_eq!(pool.free_count(), 240 - 64);
    }

    #[test]
    fn grabbed_offsets_are_valid_and_unique() {
        let pool = PagePool::new(&small_options(128, 8), 0).unwrap();
        let mut chunk = PagePoolOffsetChunk::new(128);
        pool.grab(120, &mut chunk).unwrap();
        assert_eq!(chunk.size(), 120);

        let mut seen = std::collections::HashSet::new();
        while !chunk.is_empty() {
            let offset = chunk.pop();
            assert!(offset >= 8 && offset < 128);
            assert!(seen.insert(offset), "offset {} handed out twice", offset);
        }
    }

    #[test]
    fn grab_on_empty_pool_reports_no_free_pages() {
        let pool = PagePool::new(&small_options(64, 8), 0).unwrap();
        let mut chunk = PagePoolOffsetChunk::new(64);
        pool.grab(56, &mut chunk).unwrap();
        assert_eq!(pool.free_count(), 0);

        let mut second = PagePoolOffsetChunk::new(8);
        assert_eq!(
            pool.grab(1, &mut second).unwrap_err(),
            ErrorCode::NoFreePages
        );
    }

    #[test]
    fn release_returns_pages_to_the_tail() {
        let pool = PagePool::new(&small_options(256, 16), 0).unwrap();
        let mut chunk = PagePoolOffsetChunk::new(128);
        pool.grab(100, &mut chunk).unwrap();
        assert_eq!(pool.free_count(), 140);

        pool.release(100, &mut chunk).unwrap();
        assert_eq!(chunk.size(), 0);
        assert_eq!(pool.free_count(), 240);
    }

    #[test]
    fn grab_release_cycles_wrap_the_queue() {
        let pool = PagePool::new(&small_options(64, 8), 0).unwrap();
        let mut chunk = PagePoolOffsetChunk::new(56);
        // More transfers than queue capacity slots to force wraparound.
        for _ in 0..1000 {
            pool.grab(56, &mut chunk).unwrap();
            assert_eq!(pool.free_count(), 0);
            pool.release(56, &mut chunk).unwrap();
            assert_eq!(pool.free_count(), 56);
        }
    }

    #[test]
    fn resolver_is_bound_to_the_region() {
        let pool = PagePool::new(&small_options(64, 8), 0).unwrap();
        let resolver = pool.resolver();
        let mut chunk = PagePoolOffsetChunk::new(8);
        pool.grab(2, &mut chunk).unwrap();
        let a = chunk.pop();
        let b = chunk.pop();
        let distance = (resolver.resolve(a) as isize) - (resolver.resolve(b) as isize);
        assert_eq!(
            distance,
            (a as isize - b as isize) * PAGE_SIZE as isize
        );
        pool.release(0, &mut chunk).unwrap();
    }
}
