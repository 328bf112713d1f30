//! # Array Storage Operations
//!
//! Build, lookup, transactional record access, and teardown for the
//! dense array. The tree is created left-to-right in one pass with a
//! cursor per level, so every page is touched exactly once and pages of
//! the same level are allocated in offset order from the creating core's
//! chunk.
//!
//! ## Build
//!
//! The leftmost page of every level is created first and chained
//! child-to-parent. Each subsequent leaf then bubbles up: the lowest
//! interior with a free slot receives the new child; a full interior is
//! replaced by a fresh one whose first child is the new page, and the
//! replacement itself propagates upward. Ranges are derived from the
//! per-level offset intervals and clamped to the array size at the right
//! edge.
//!
//! ## Transactional Access
//!
//! `get_record` captures the record version in the read set before
//! copying bytes out, then overlays any bytes this same transaction has
//! already written to the record (read-your-writes, served from the
//! write set's log entries). `overwrite_record` never touches the record
//! image: it reserves and populates a redo-log entry and links it into
//! the write set; the actual mutation happens at commit, outside this
//! core.
//!
//! ## Teardown
//!
//! `release_pages` walks the tree post-order, clearing volatile child
//! offsets and pushing every page into one core's chunk. Callers
//! guarantee no live reader references the storage; the walk is not
//! performance-critical.

use eyre::{ensure, WrapErr};
use smallvec::SmallVec;
use tracing::{debug, info};

use crate::assorted::{align8, int_div_ceil};
use crate::config::constants::{DATA_SIZE, INTERIOR_FANOUT, RECORD_OVERHEAD};
use crate::error::ErrorCode;
use crate::memory::{GlobalVolatilePageResolver, NumaCoreMemory, PagePoolOffset};
use crate::storage::array::log_types::{
    calculate_log_length, populate_overwrite_log, OverwriteLogRef,
};
use crate::storage::array::page::ArrayPage;
use crate::storage::array::{ArrayOffset, ArrayRange};
use crate::storage::pointer::{DualPagePointer, VolatilePagePointer};
use crate::storage::record::RecordHeader;
use crate::storage::StorageId;
use crate::thread::Thread;

/// Pages needed per level, index = level (0 = leaf), computed bottom-up
/// until one page remains at the top.
fn calculate_required_pages(array_size: ArrayOffset, records_per_leaf: u64) -> Vec<u64> {
    let leaf_pages = int_div_ceil(array_size, records_per_leaf);
    let mut pages = vec![leaf_pages];
    while *pages.last().unwrap() != 1 {
        let next = int_div_ceil(*pages.last().unwrap(), INTERIOR_FANOUT as u64);
        pages.push(next);
    }
    pages
}

#[derive(Debug)]
pub struct ArrayStorage {
    id: StorageId,
    name: String,
    payload_size: u16,
    payload_size_aligned: u16,
    array_size: ArrayOffset,
    levels: u8,
    pages_per_level: Vec<u64>,
    offset_intervals: Vec<u64>,
    records_per_leaf: u64,
    root_pointer: DualPagePointer,
    resolver: GlobalVolatilePageResolver,
}

impl ArrayStorage {
    /// Builds the whole tree from `context`'s core cache and returns the
    /// ready storage. Registering it is the storage manager's job.
    pub fn create(
        context: &mut Thread,
        id: StorageId,
        name: &str,
        payload_size: u16,
        array_size: ArrayOffset,
    ) -> eyre::Result<Self> {
        ensure!(array_size >= 1, "array '{}' must hold at least one record", name);
        let payload_size_aligned = align8(payload_size as u64) as u16;
        let record_size = payload_size_aligned as u64 + RECORD_OVERHEAD as u64;
        ensure!(
            record_size <= DATA_SIZE as u64,
            "payload size {} does not fit a leaf page",
            payload_size
        );
        let records_per_leaf = DATA_SIZE as u64 / record_size;
        let pages_per_level = calculate_required_pages(array_size, records_per_leaf);
        let levels = pages_per_level.len() as u8;

        let mut offset_intervals = vec![records_per_leaf];
        for level in 1..levels as usize {
            offset_intervals.push(offset_intervals[level - 1] * INTERIOR_FANOUT as u64);
        }

        let epoch = context.current_global_epoch();
        let node = context.thread_id().numa_node();
        let resolver = *context.resolver();
        info!(
            id,
            name,
            payload_size,
            array_size,
            levels,
            total_pages = pages_per_level.iter().sum::<u64>(),
            "creating array storage"
        );
        for (level, pages) in pages_per_level.iter().enumerate() {
            debug!(level, pages, interval = offset_intervals[level], "level shape");
        }

        // Leftmost page of every level, chained child to parent. Arrays
        // deeper than eight levels do not exist (fanout^8 offsets), so
        // the cursors stay on the stack.
        let mut current_pages: SmallVec<[*mut ArrayPage; 8]> = SmallVec::new();
        let mut current_pages_offset: SmallVec<[PagePoolOffset; 8]> = SmallVec::new();
        let mut current_records: SmallVec<[usize; 8]> = SmallVec::new();
        for level in 0..levels {
            let offset = context
                .core_memory_mut()
                .grab_free_page()
                .wrap_err_with(|| format!("allocating leftmost page of level {}", level))?;
            // SAFETY: freshly grabbed page, exclusively ours during build.
            let page = unsafe {
                ArrayPage::from_page_ptr_mut(resolver.local(node).resolve(offset))
            };

            let mut end = offset_intervals[level as usize];
            if end > array_size {
                end = array_size;
            }
            page.initialize_data_page(epoch, id, payload_size, level, ArrayRange::new(0, end));

            if level == 0 {
                current_records.push(0);
            } else {
                current_records.push(1);
                let child_pointer = page.interior_record_mut(0);
                child_pointer.set_snapshot_page_id(0);
                child_pointer.set_volatile(VolatilePagePointer::compose(
                    node,
                    0,
                    current_pages_offset[level as usize - 1],
                ));
            }
            current_pages.push(page as *mut ArrayPage);
            current_pages_offset.push(offset);
        }

        // Sweep the remaining leaves left to right, bubbling up.
        for _leaf in 1..pages_per_level[0] {
            let offset = context
                .core_memory_mut()
                .grab_free_page()
                .wrap_err("allocating leaf page")?;
            // SAFETY: freshly grabbed page, exclusively ours during build.
            let page = unsafe {
                ArrayPage::from_page_ptr_mut(resolver.local(node).resolve(offset))
            };

            // SAFETY: cursor pages stay valid for the whole build.
            let begin = unsafe { (*current_pages[0]).range().end() };
            let mut end = begin + offset_intervals[0];
            if end > array_size {
                end = array_size;
            }
            page.initialize_data_page(epoch, id, payload_size, 0, ArrayRange::new(begin, end));
            current_pages[0] = page as *mut ArrayPage;
            current_pages_offset[0] = offset;

            for level in 1..levels as usize {
                if current_records[level] == INTERIOR_FANOUT {
                    // This interior is full; start its successor with the
                    // new child and keep propagating upward.
                    let interior_offset = context
                        .core_memory_mut()
                        .grab_free_page()
                        .wrap_err_with(|| format!("allocating interior page of level {}", level))?;
                    // SAFETY: freshly grabbed page, exclusively ours.
                    let interior = unsafe {
                        ArrayPage::from_page_ptr_mut(
                            resolver.local(node).resolve(interior_offset),
                        )
                    };
                    // SAFETY: cursor page of this level is valid.
                    let interior_begin = unsafe { (*current_pages[level]).range().end() };
                    let mut interior_end = interior_begin + offset_intervals[level];
                    if interior_end > array_size {
                        interior_end = array_size;
                    }
                    interior.initialize_data_page(
                        epoch,
                        id,
                        payload_size,
                        level as u8,
                        ArrayRange::new(interior_begin, interior_end),
                    );
                    let child_pointer = interior.interior_record_mut(0);
                    child_pointer.set_snapshot_page_id(0);
                    child_pointer.set_volatile(VolatilePagePointer::compose(
                        node,
                        0,
                        current_pages_offset[level - 1],
                    ));
                    current_pages[level] = interior as *mut ArrayPage;
                    current_pages_offset[level] = interior_offset;
                    current_records[level] = 1;
                    // The new interior itself must reach its parent.
                } else {
                    let slot = current_records[level];
                    // SAFETY: cursor page of this level is valid.
                    let parent = unsafe { &mut *current_pages[level] };
                    let child_pointer = parent.interior_record_mut(slot);
                    child_pointer.set_snapshot_page_id(0);
                    child_pointer.set_volatile(VolatilePagePointer::compose(
                        node,
                        0,
                        current_pages_offset[level - 1],
                    ));
                    current_records[level] += 1;
                    break;
                }
            }
        }

        let root_offset = current_pages_offset[levels as usize - 1];
        let root_pointer =
            DualPagePointer::new(0, VolatilePagePointer::compose(node, 0, root_offset));
        info!(id, name, "created array storage");

        Ok(Self {
            id,
            name: name.to_string(),
            payload_size,
            payload_size_aligned,
            array_size,
            levels,
            pages_per_level,
            offset_intervals,
            records_per_leaf,
            root_pointer,
            resolver,
        })
    }

    pub fn id(&self) -> StorageId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload_size(&self) -> u16 {
        self.payload_size
    }

    pub fn array_size(&self) -> ArrayOffset {
        self.array_size
    }

    pub fn levels(&self) -> u8 {
        self.levels
    }

    pub fn pages_per_level(&self) -> &[u64] {
        &self.pages_per_level
    }

    pub fn offset_intervals(&self) -> &[u64] {
        &self.offset_intervals
    }

    pub fn records_per_leaf(&self) -> u64 {
        self.records_per_leaf
    }

    pub fn root_page_pointer(&self) -> &DualPagePointer {
        &self.root_pointer
    }

    pub fn resolver(&self) -> &GlobalVolatilePageResolver {
        &self.resolver
    }

    /// Descends from the root to the leaf covering `offset`.
    ///
    /// A null volatile child means the page lives only in a snapshot;
    /// the snapshot read path is declared but not wired in this slice,
    /// so it surfaces `NotImplemented`.
    pub fn lookup(
        &self,
        context: &mut Thread,
        offset: ArrayOffset,
    ) -> Result<*const ArrayPage, ErrorCode> {
        debug_assert!(offset < self.array_size);
        let root =
            context.follow_page_pointer(None, false, false, false, false, &self.root_pointer)?;
        let mut current = root as *const ArrayPage;
        loop {
            // SAFETY: resolved from a live pool region.
            let page = unsafe { &*current };
            debug_assert!(page.range().contains(offset));
            if page.is_leaf() {
                return Ok(current);
            }
            let diff = offset - page.range().begin();
            let slot =
                (diff / self.offset_intervals[(page.node_height() - 1) as usize]) as usize;
            let pointer = page.interior_record(slot);
            let volatile = pointer.volatile_acquire();
            if volatile.is_null() {
                return Err(ErrorCode::NotImplemented);
            }
            current = self.resolver.resolve(volatile) as *const ArrayPage;
        }
    }

    /// Reads `payload_count` bytes of the record at `offset` into
    /// `payload`, starting at `payload_offset` within the record.
    ///
    /// Adds the record to the running transaction's read set first, then
    /// overlays this transaction's own pending writes so a transaction
    /// reads its own effects.
    pub fn get_record(
        &self,
        context: &mut Thread,
        offset: ArrayOffset,
        payload: &mut [u8],
        payload_offset: u16,
        payload_count: u16,
    ) -> Result<(), ErrorCode> {
        debug_assert!(offset < self.array_size);
        debug_assert!(payload_offset as usize + payload_count as usize <= self.payload_size as usize);
        debug_assert!(payload.len() >= payload_count as usize);
        debug_assert!(context.is_running_xct());

        let page = self.lookup(context, offset)?;
        // SAFETY: leaf resolved from a live pool region.
        let page_ref = unsafe { &*page };
        debug_assert!(page_ref.is_leaf());
        debug_assert!(page_ref.range().contains(offset));
        let index = offset - page_ref.range().begin();
        let record = page_ref.leaf_record(index);
        let record_ptr = record as *const RecordHeader;

        let observed = record.observe_tid();
        context
            .current_xct_mut()
            .add_to_read_set(self.id, record_ptr, observed)?;

        // SAFETY: the requested window is within the record payload per
        // the precondition; source and destination never overlap.
        unsafe {
            std::ptr::copy_nonoverlapping(
                record.payload_ptr().add(payload_offset as usize),
                payload.as_mut_ptr(),
                payload_count as usize,
            );
        }

        // Read-your-writes: overlay pending writes to this record, in
        // write order.
        let request_begin = payload_offset as usize;
        let request_end = request_begin + payload_count as usize;
        let (xct, log_buffer) = context.xct_and_log();
        for write in xct.write_set() {
            if !std::ptr::eq(write.record, record_ptr) {
                continue;
            }
            let entry = log_buffer.log(write.log_position, write.log_length);
            let log = OverwriteLogRef::new(entry);
            let log_begin = log.payload_offset() as usize;
            let log_end = log_begin + log.payload_count() as usize;
            let begin = request_begin.max(log_begin);
            let end = request_end.min(log_end);
            if begin >= end {
                continue;
            }
            payload[begin - request_begin..end - request_begin]
                .copy_from_slice(&log.payload_bytes()[begin - log_begin..end - log_begin]);
        }
        Ok(())
    }

    /// Overwrites `payload_count` bytes of the record at `offset`,
    /// starting at `payload_offset`. The record image is untouched: the
    /// write becomes a redo-log entry plus a write-set entry, applied at
    /// commit.
    pub fn overwrite_record(
        &self,
        context: &mut Thread,
        offset: ArrayOffset,
        payload: &[u8],
        payload_offset: u16,
        payload_count: u16,
    ) -> Result<(), ErrorCode> {
        debug_assert!(offset < self.array_size);
        debug_assert!(payload_offset as usize + payload_count as usize <= self.payload_size as usize);
        debug_assert!(payload.len() >= payload_count as usize);
        debug_assert!(context.is_running_xct());

        let page = self.lookup(context, offset)?;
        // SAFETY: leaf resolved from a live pool region.
        let page_ref = unsafe { &*page };
        debug_assert!(page_ref.is_leaf());
        debug_assert!(page_ref.range().contains(offset));
        let index = offset - page_ref.range().begin();
        let record_ptr = page_ref.leaf_record(index) as *const RecordHeader;

        let log_length = calculate_log_length(payload_count);
        let position = context.log_buffer_mut().reserve_new_log(log_length)?;
        let epoch = context.current_xct().begin_epoch();
        let ordinal = context.current_xct_mut().issue_next_ordinal();
        let entry = context.log_buffer_mut().log_mut(position, log_length);
        populate_overwrite_log(
            entry,
            self.id,
            offset,
            &payload[..payload_count as usize],
            payload_offset,
            epoch,
            ordinal,
        );

        context
            .current_xct_mut()
            .add_to_write_set(self.id, record_ptr, position, log_length)?;
        Ok(())
    }

    /// Releases every page reachable from the root into `memory`'s
    /// chunk, post-order, clearing volatile offsets along the way.
    /// Idempotent: a second call finds a null root and does nothing.
    pub fn release_pages(&self, memory: &mut NumaCoreMemory) {
        let root = self.root_pointer.swap_volatile_null();
        if root.is_null() {
            return;
        }
        info!(id = self.id, name = %self.name, "releasing array storage pages");
        release_pages_recursive(&self.resolver, memory, root);
    }
}

fn release_pages_recursive(
    resolver: &GlobalVolatilePageResolver,
    memory: &mut NumaCoreMemory,
    pointer: VolatilePagePointer,
) {
    // SAFETY: teardown precondition: no concurrent reader; the pointer
    // was non-null and pages are only freed here.
    let page = unsafe { ArrayPage::from_page_ptr_mut(resolver.resolve(pointer)) };
    if !page.is_leaf() {
        for slot in 0..INTERIOR_FANOUT {
            let child_pointer = page.interior_record_mut(slot);
            let child = child_pointer.volatile_acquire();
            if !child.is_null() {
                release_pages_recursive(resolver, memory, child);
                child_pointer.set_volatile(VolatilePagePointer::null());
            }
        }
    }
    memory.release_free_page(pointer.offset());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::constants::PAGE_SIZE;
    use crate::config::EngineOptions;
    use crate::lifecycle::Initializable;
    use crate::memory::PagePool;
    use crate::sync::McsBlockStorage;
    use crate::thread::ThreadId;
    use crate::xct::{IsolationLevel, XctManager};
    use std::sync::Arc;

    fn test_thread(total_pages: u64) -> (Thread, Arc<PagePool>) {
        let mut options = EngineOptions::default();
        options.memory.page_pool_size_per_node = total_pages * PAGE_SIZE as u64;
        options.memory.pages_for_free_pool = (total_pages / 64).max(1) as u32;
        options.memory.offset_chunk_size = 256;
        let options = Arc::new(options);

        let pool = Arc::new(PagePool::new(&options.memory, 0).unwrap());
        let resolver = crate::memory::GlobalVolatilePageResolver::new(&[pool.resolver()]);
        let mcs_storage = Arc::new(McsBlockStorage::new(1));
        let xct_manager = Arc::new(XctManager::new());

        let mut thread = Thread::new(
            &options,
            ThreadId::new(0, 0),
            0,
            Arc::clone(&pool),
            resolver,
            mcs_storage,
            xct_manager,
        )
        .unwrap();
        thread.initialize().unwrap();
        (thread, pool)
    }

    #[test]
    fn required_pages_shrink_by_fanout() {
        // 1,000,000 records, 126 per leaf.
        let pages = calculate_required_pages(1_000_000, 126);
        assert_eq!(pages, vec![7937, 32, 1]);
        // A single-leaf array.
        assert_eq!(calculate_required_pages(100, 126), vec![1]);
        // Exactly one full leaf.
        assert_eq!(calculate_required_pages(126, 126), vec![1]);
        assert_eq!(calculate_required_pages(127, 126), vec![2, 1]);
    }

    #[test]
    fn create_single_leaf_array() {
        let (mut thread, _pool) = test_thread(1024);
        let storage = ArrayStorage::create(&mut thread, 1, "tiny", 16, 100).unwrap();

        assert_eq!(storage.levels(), 1);
        assert_eq!(storage.records_per_leaf(), 126);
        assert_eq!(storage.pages_per_level(), &[1]);

        let root = storage.root_page_pointer().volatile_acquire();
        assert!(!root.is_null());
        // SAFETY: freshly built page.
        let page = unsafe { ArrayPage::from_page_ptr(storage.resolver().resolve(root)) };
        assert!(page.is_leaf());
        assert_eq!(page.range(), ArrayRange::new(0, 100));
        assert_eq!(page.storage_id(), 1);
    }

    #[test]
    fn create_two_level_array_tiles_leaves() {
        let (mut thread, _pool) = test_thread(1024);
        // payload 32 -> 84 records per leaf; 300 records -> 4 leaves.
        let storage = ArrayStorage::create(&mut thread, 1, "two", 32, 300).unwrap();
        assert_eq!(storage.levels(), 2);
        assert_eq!(storage.pages_per_level(), &[4, 1]);

        let root = storage.root_page_pointer().volatile_acquire();
        // SAFETY: freshly built pages.
        let root_page = unsafe { ArrayPage::from_page_ptr(storage.resolver().resolve(root)) };
        assert!(!root_page.is_leaf());
        assert_eq!(root_page.range(), ArrayRange::new(0, 300));

        // Children tile the root range exactly, in order.
        let mut expected_begin = 0;
        for slot in 0..4 {
            let child = root_page.interior_record(slot).volatile_acquire();
            assert!(!child.is_null());
            let child_page =
                unsafe { ArrayPage::from_page_ptr(storage.resolver().resolve(child)) };
            assert!(child_page.is_leaf());
            assert_eq!(child_page.range().begin(), expected_begin);
            assert!(child_page.range().length() <= storage.records_per_leaf());
            expected_begin = child_page.range().end();
        }
        assert_eq!(expected_begin, 300);
        assert!(root_page.interior_record(4).volatile_acquire().is_null());
    }

    #[test]
    fn lookup_finds_covering_leaf() {
        let (mut thread, _pool) = test_thread(2048);
        let storage = ArrayStorage::create(&mut thread, 1, "lookup", 32, 1000).unwrap();
        let records_per_leaf = storage.records_per_leaf();

        for offset in [
            0,
            1,
            records_per_leaf - 1,
            records_per_leaf,
            500,
            999,
        ] {
            let page = storage.lookup(&mut thread, offset).unwrap();
            // SAFETY: page belongs to the storage just built.
            let page_ref = unsafe { &*page };
            assert!(page_ref.is_leaf());
            assert!(page_ref.range().contains(offset));
        }
    }

    #[test]
    fn overwrite_then_get_reads_own_write() {
        let (mut thread, _pool) = test_thread(1024);
        let storage = ArrayStorage::create(&mut thread, 1, "ryw", 32, 100).unwrap();
        thread.begin_xct(IsolationLevel::Snapshot).unwrap();

        let written: Vec<u8> = (0x11..=0x30).collect();
        storage
            .overwrite_record(&mut thread, 42, &written, 0, 32)
            .unwrap();

        let mut read_back = [0u8; 32];
        storage
            .get_record(&mut thread, 42, &mut read_back, 0, 32)
            .unwrap();
        assert_eq!(&read_back[..], &written[..]);

        assert_eq!(thread.current_xct().read_set().len(), 1);
        assert_eq!(thread.current_xct().write_set().len(), 1);
        assert_eq!(
            thread.current_xct().write_set()[0].log_length,
            calculate_log_length(32)
        );
        thread.abort_xct().unwrap();
    }

    #[test]
    fn partial_overwrite_overlays_only_its_window() {
        let (mut thread, _pool) = test_thread(1024);
        let storage = ArrayStorage::create(&mut thread, 1, "window", 32, 100).unwrap();
        thread.begin_xct(IsolationLevel::Snapshot).unwrap();

        storage
            .overwrite_record(&mut thread, 7, &[0xAB; 8], 8, 8)
            .unwrap();

        let mut read_back = [0u8; 32];
        storage
            .get_record(&mut thread, 7, &mut read_back, 0, 32)
            .unwrap();
        assert_eq!(&read_back[..8], &[0u8; 8]);
        assert_eq!(&read_back[8..16], &[0xABu8; 8]);
        assert_eq!(&read_back[16..], &[0u8; 16]);

        // A read window outside the pending write sees the base image.
        let mut head = [0xFFu8; 4];
        storage.get_record(&mut thread, 7, &mut head, 0, 4).unwrap();
        assert_eq!(head, [0u8; 4]);
        thread.abort_xct().unwrap();
    }

    #[test]
    fn later_writes_shadow_earlier_ones() {
        let (mut thread, _pool) = test_thread(1024);
        let storage = ArrayStorage::create(&mut thread, 1, "shadow", 16, 50).unwrap();
        thread.begin_xct(IsolationLevel::Snapshot).unwrap();

        storage
            .overwrite_record(&mut thread, 3, &[0x01; 16], 0, 16)
            .unwrap();
        storage
            .overwrite_record(&mut thread, 3, &[0x02; 4], 4, 4)
            .unwrap();

        let mut read_back = [0u8; 16];
        storage
            .get_record(&mut thread, 3, &mut read_back, 0, 16)
            .unwrap();
        assert_eq!(&read_back[..4], &[0x01; 4]);
        assert_eq!(&read_back[4..8], &[0x02; 4]);
        assert_eq!(&read_back[8..], &[0x01; 8]);
        thread.abort_xct().unwrap();
    }

    #[test]
    fn release_pages_restores_pool_accounting() {
        let (mut thread, pool) = test_thread(2048);
        let free_before_create = pool.free_count() + thread.core_memory().cached_pages() as u64;

        let storage = ArrayStorage::create(&mut thread, 1, "drain", 32, 1000).unwrap();
        let built_pages: u64 = storage.pages_per_level().iter().sum();
        assert_eq!(
            pool.free_count() + thread.core_memory().cached_pages() as u64,
            free_before_create - built_pages
        );

        storage.release_pages(thread.core_memory_mut());
        assert!(storage.root_page_pointer().volatile_acquire().is_null());
        assert_eq!(
            pool.free_count() + thread.core_memory().cached_pages() as u64,
            free_before_create
        );

        // Idempotent.
        storage.release_pages(thread.core_memory_mut());
        thread.uninitialize().unwrap();
        assert_eq!(pool.free_count(), free_before_create);
    }

    #[test]
    fn deep_tree_build_and_lookup() {
        // payload 16 -> 126 per leaf; 100k records -> 794 leaves ->
        // 4 interiors -> 1 root: three levels.
        let (mut thread, _pool) = test_thread(4096);
        let storage = ArrayStorage::create(&mut thread, 9, "deep", 16, 100_000).unwrap();
        assert_eq!(storage.levels(), 3);
        assert_eq!(storage.pages_per_level(), &[794, 4, 1]);
        assert_eq!(storage.offset_intervals(), &[126, 126 * 252, 126 * 252 * 252]);

        for offset in [0u64, 125, 126, 31_751, 31_752, 99_999] {
            let page = storage.lookup(&mut thread, offset).unwrap();
            // SAFETY: page belongs to the storage just built.
            let page_ref = unsafe { &*page };
            assert!(page_ref.range().contains(offset));
        }
    }
}
