//! # Worker Thread Context
//!
//! `Thread` is the per-core execution context: one transaction at a time,
//! one private log buffer, one chunk of cached free pages, one MCS block
//! cursor. Storages receive a `&mut Thread` for every transactional
//! operation and reach all hot-path state through it.
//!
//! ## Page-Pointer Following
//!
//! The heart of this module is [`Thread::follow_page_pointer`], the one
//! place that knows how to dereference a dual page pointer under the
//! commit protocol: follow the volatile side when present, fall back to
//! the snapshot side (installing a volatile copy when the caller will
//! modify), or initialize a brand-new volatile page when both sides are
//! null. Losing an install race is invisible to callers: the loser
//! reclaims its page and adopts the winner's.
//!
//! ## Snapshot Reads
//!
//! The snapshot store and its cache are external collaborators. This
//! slice declares the read-through entry points; without a store behind
//! them they surface `SnapshotReadFailed`, which aborts the calling
//! transaction.

use std::sync::Arc;

use eyre::ensure;
use tracing::debug;

use crate::config::EngineOptions;
use crate::error::ErrorCode;
use crate::lifecycle::Initializable;
use crate::memory::{GlobalVolatilePageResolver, NumaCoreMemory, PagePool};
use crate::storage::{DualPagePointer, SnapshotPagePointer, VolatilePageInitializer,
    VolatilePagePointer};
use crate::sync::mcs::McsBlockCursor;
use crate::sync::{McsBlockIndex, McsBlockStorage, McsLock, McsLockContext};
use crate::thread::log_buffer::ThreadLogBuffer;
use crate::thread::{ThreadGlobalOrdinal, ThreadId};
use crate::xct::{Epoch, IsolationLevel, Xct, XctManager};

pub struct Thread {
    id: ThreadId,
    global_ordinal: ThreadGlobalOrdinal,
    xct_manager: Arc<XctManager>,
    core_memory: NumaCoreMemory,
    log_buffer: ThreadLogBuffer,
    current_xct: Xct,
    resolver: GlobalVolatilePageResolver,
    mcs_storage: Arc<McsBlockStorage>,
    mcs_cursor: McsBlockCursor,
    initialized: bool,
}

impl Thread {
    pub fn new(
        options: &Arc<EngineOptions>,
        id: ThreadId,
        global_ordinal: ThreadGlobalOrdinal,
        node_pool: Arc<PagePool>,
        resolver: GlobalVolatilePageResolver,
        mcs_storage: Arc<McsBlockStorage>,
        xct_manager: Arc<XctManager>,
    ) -> eyre::Result<Self> {
        let core_memory = NumaCoreMemory::new(
            node_pool,
            id,
            options.memory.offset_chunk_size as usize,
        );
        let log_buffer = ThreadLogBuffer::new(options.log.thread_buffer_size as usize)?;
        Ok(Self {
            id,
            global_ordinal,
            xct_manager,
            core_memory,
            log_buffer,
            current_xct: Xct::new(&options.xct),
            resolver,
            mcs_storage,
            mcs_cursor: McsBlockCursor::new(),
            initialized: false,
        })
    }

    pub fn thread_id(&self) -> ThreadId {
        self.id
    }

    pub fn global_ordinal(&self) -> ThreadGlobalOrdinal {
        self.global_ordinal
    }

    pub fn resolver(&self) -> &GlobalVolatilePageResolver {
        &self.resolver
    }

    pub fn core_memory(&self) -> &NumaCoreMemory {
        &self.core_memory
    }

    pub fn core_memory_mut(&mut self) -> &mut NumaCoreMemory {
        &mut self.core_memory
    }

    pub fn log_buffer(&self) -> &ThreadLogBuffer {
        &self.log_buffer
    }

    pub fn log_buffer_mut(&mut self) -> &mut ThreadLogBuffer {
        &mut self.log_buffer
    }

    pub fn current_xct(&self) -> &Xct {
        &self.current_xct
    }

    pub fn current_xct_mut(&mut self) -> &mut Xct {
        &mut self.current_xct
    }

    /// The transaction and log buffer together, for code that correlates
    /// write-set entries with their log entries.
    pub fn xct_and_log(&self) -> (&Xct, &ThreadLogBuffer) {
        (&self.current_xct, &self.log_buffer)
    }

    pub fn is_running_xct(&self) -> bool {
        self.current_xct.is_active()
    }

    pub fn current_global_epoch(&self) -> Epoch {
        self.xct_manager.get_current_global_epoch()
    }

    /// Starts a transaction on this thread at the current global epoch.
    pub fn begin_xct(&mut self, isolation_level: IsolationLevel) -> eyre::Result<()> {
        ensure!(
            !self.current_xct.is_active(),
            "thread {:?} is already running a transaction",
            self.id
        );
        let epoch = self.xct_manager.get_current_global_epoch();
        self.log_buffer.reset();
        self.mcs_cursor.reset();
        self.current_xct.activate(isolation_level, epoch);
        Ok(())
    }

    /// Aborts the running transaction, discarding its log entries and
    /// sets.
    pub fn abort_xct(&mut self) -> eyre::Result<()> {
        ensure!(
            self.current_xct.is_active(),
            "thread {:?} has no running transaction",
            self.id
        );
        self.current_xct.deactivate();
        self.log_buffer.reset();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Snapshot reads (external store; declared here, stubbed in-slice)
    // ------------------------------------------------------------------

    /// Finds `page_id` in the snapshot cache, reading through on miss.
    pub fn find_or_read_a_snapshot_page(
        &mut self,
        page_id: SnapshotPagePointer,
    ) -> Result<*mut u8, ErrorCode> {
        debug_assert!(page_id != 0);
        // No snapshot cache is wired into this slice; a hit is
        // impossible, so this is always a read-through.
        Err(ErrorCode::SnapshotReadFailed)
    }

    /// Reads `page_id` from the snapshot files into `buffer`,
    /// unconditionally.
    pub fn read_a_snapshot_page(
        &mut self,
        page_id: SnapshotPagePointer,
        _buffer: *mut u8,
    ) -> Result<(), ErrorCode> {
        debug_assert!(page_id != 0);
        debug!(page_id, "snapshot read requested without a snapshot store");
        Err(ErrorCode::SnapshotReadFailed)
    }

    // ------------------------------------------------------------------
    // Volatile page installation
    // ------------------------------------------------------------------

    /// Installs a volatile copy of `pointer`'s snapshot page.
    ///
    /// Preconditions: `snapshot_page_id != 0`; the volatile side is
    /// expected null (advisory: a concurrent thread may install first).
    /// Returns the installed page, which may be a concurrent winner's.
    pub fn install_a_volatile_page(
        &mut self,
        pointer: &DualPagePointer,
    ) -> Result<*mut u8, ErrorCode> {
        debug_assert!(pointer.snapshot_page_id() != 0);
        let offset = self.core_memory.grab_free_page()?;
        let node = self.id.numa_node();
        let page = self.resolver.local(node).resolve(offset);

        if let Err(code) = self.read_a_snapshot_page(pointer.snapshot_page_id(), page) {
            self.core_memory.release_free_page(offset);
            return Err(code);
        }

        loop {
            let observed = pointer.volatile_acquire();
            if !observed.is_null() {
                // Lost the race; adopt the winner's page.
                self.core_memory.release_free_page(offset);
                return Ok(self.resolver.resolve(observed));
            }
            let new_pointer =
                VolatilePagePointer::compose(node, observed.mod_count().wrapping_add(1), offset);
            if pointer.try_install_volatile(observed, new_pointer).is_ok() {
                return Ok(page);
            }
            // CAS failure means the pointer moved; re-observe and retry.
        }
    }

    // ------------------------------------------------------------------
    // General pointer dereference
    // ------------------------------------------------------------------

    /// Follows (reads) a dual page pointer under the commit protocol.
    ///
    /// Precondition: `!tolerate_null_pointer || !will_modify` (modifying
    /// a page and tolerating its absence are contradictory).
    ///
    /// Returns a null pointer only when both sides are null and
    /// `tolerate_null_pointer` is set. The `take_ptr_set_*` flags are
    /// ignored below serializable isolation.
    #[allow(clippy::too_many_arguments)]
    pub fn follow_page_pointer(
        &mut self,
        page_initializer: Option<&dyn VolatilePageInitializer>,
        tolerate_null_pointer: bool,
        will_modify: bool,
        take_ptr_set_snapshot: bool,
        take_ptr_set_volatile: bool,
        pointer: &DualPagePointer,
    ) -> Result<*mut u8, ErrorCode> {
        debug_assert!(!tolerate_null_pointer || !will_modify);
        let serializable = self.current_xct.is_active()
            && self.current_xct.isolation_level() == IsolationLevel::Serializable;

        let observed = pointer.volatile_acquire();
        if !observed.is_null() {
            if serializable && take_ptr_set_volatile {
                self.current_xct
                    .add_to_pointer_set(pointer as *const DualPagePointer, observed)?;
            }
            return Ok(self.resolver.resolve(observed));
        }

        if pointer.snapshot_page_id() != 0 {
            let page = if will_modify {
                self.install_a_volatile_page(pointer)?
            } else {
                self.find_or_read_a_snapshot_page(pointer.snapshot_page_id())?
            };
            if serializable && take_ptr_set_snapshot {
                self.current_xct
                    .add_to_pointer_set(pointer as *const DualPagePointer, observed)?;
            }
            return Ok(page);
        }

        // Both sides null.
        if tolerate_null_pointer {
            if serializable && take_ptr_set_snapshot {
                self.current_xct
                    .add_to_pointer_set(pointer as *const DualPagePointer, observed)?;
            }
            return Ok(std::ptr::null_mut());
        }

        let initializer = page_initializer.expect(
            "follow_page_pointer without tolerate_null requires a page initializer",
        );
        let offset = self.core_memory.grab_free_page()?;
        let node = self.id.numa_node();
        let page = self.resolver.local(node).resolve(offset);
        // Pool pages are recycled; hand the initializer a clean slate.
        // SAFETY: `page` addresses a full page we exclusively own until
        // the install below publishes it.
        unsafe { std::ptr::write_bytes(page, 0, crate::config::constants::PAGE_SIZE) };
        initializer.initialize_volatile_page(page);

        loop {
            let current = pointer.volatile_acquire();
            if !current.is_null() {
                // A concurrent thread initialized the page first.
                self.core_memory.release_free_page(offset);
                let adopted = self.resolver.resolve(current);
                if serializable && take_ptr_set_snapshot {
                    self.current_xct
                        .add_to_pointer_set(pointer as *const DualPagePointer, current)?;
                }
                return Ok(adopted);
            }
            let new_pointer =
                VolatilePagePointer::compose(node, current.mod_count().wrapping_add(1), offset);
            if pointer.try_install_volatile(current, new_pointer).is_ok() {
                if serializable && take_ptr_set_snapshot {
                    self.current_xct
                        .add_to_pointer_set(pointer as *const DualPagePointer, new_pointer)?;
                }
                return Ok(page);
            }
        }
    }

    // ------------------------------------------------------------------
    // MCS lock helpers
    // ------------------------------------------------------------------

    /// Unconditionally takes `mcs_lock`.
    pub fn mcs_acquire_lock(&mut self, mcs_lock: &McsLock) -> Result<McsBlockIndex, ErrorCode> {
        let mut context =
            McsLockContext::new(&self.mcs_storage, self.global_ordinal, &mut self.mcs_cursor);
        context.acquire(mcs_lock)
    }

    /// Unconditionally takes multiple locks in array order, returning the
    /// block index of the first; the rest follow consecutively.
    pub fn mcs_acquire_lock_batch(
        &mut self,
        mcs_locks: &[&McsLock],
    ) -> Result<McsBlockIndex, ErrorCode> {
        let mut context =
            McsLockContext::new(&self.mcs_storage, self.global_ordinal, &mut self.mcs_cursor);
        context.acquire_batch(mcs_locks)
    }

    /// Non-atomic lock path; only valid when no contender can exist.
    pub fn mcs_initial_lock(&mut self, mcs_lock: &McsLock) -> Result<McsBlockIndex, ErrorCode> {
        let mut context =
            McsLockContext::new(&self.mcs_storage, self.global_ordinal, &mut self.mcs_cursor);
        context.initial_lock(mcs_lock)
    }

    /// Unlocks a lock this thread acquired with `block_index`.
    pub fn mcs_release_lock(&mut self, mcs_lock: &McsLock, block_index: McsBlockIndex) {
        let context =
            McsLockContext::new(&self.mcs_storage, self.global_ordinal, &mut self.mcs_cursor);
        context.release(mcs_lock, block_index);
    }

    /// Releases a batch taken with
    /// [`mcs_acquire_lock_batch`](Self::mcs_acquire_lock_batch).
    pub fn mcs_release_lock_batch(
        &mut self,
        mcs_locks: &[&McsLock],
        head_block: McsBlockIndex,
    ) {
        let context =
            McsLockContext::new(&self.mcs_storage, self.global_ordinal, &mut self.mcs_cursor);
        context.release_batch(mcs_locks, head_block);
    }
}

impl Initializable for Thread {
    fn initialize(&mut self) -> eyre::Result<()> {
        if self.initialized {
            return Ok(());
        }
        debug!(id = ?self.id, ordinal = self.global_ordinal, "initializing thread");
        self.core_memory.initialize()?;
        self.initialized = true;
        Ok(())
    }

    fn uninitialize(&mut self) -> eyre::Result<()> {
        if !self.initialized {
            return Ok(());
        }
        debug!(id = ?self.id, ordinal = self.global_ordinal, "uninitializing thread");
        if self.current_xct.is_active() {
            self.current_xct.deactivate();
        }
        self.core_memory.uninitialize()?;
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

    fn test_thread() -> (Thread, Arc<PagePool>) {
        let mut options = EngineOptions::default();
        options.memory.page_pool_size_per_node = 256 * PAGE_SIZE as u64;
        options.memory.pages_for_free_pool = 16;
        options.memory.offset_chunk_size = 32;
        let options = Arc::new(options);

        let pool = Arc::new(PagePool::new(&options.memory, 0).unwrap());
        let resolver = GlobalVolatilePageResolver::new(&[pool.resolver()]);
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

    struct MagicInitializer;
    impl VolatilePageInitializer for MagicInitializer {
        fn initialize_volatile_page(&self, page: *mut u8) {
            // SAFETY: handed a zeroed page we own.
            unsafe { *page = 0xAB };
        }
    }

    #[test]
    fn xct_lifecycle_on_thread() {
        let (mut thread, _pool) = test_thread();
        assert!(!thread.is_running_xct());
        thread.begin_xct(IsolationLevel::Snapshot).unwrap();
        assert!(thread.is_running_xct());
        assert!(thread.begin_xct(IsolationLevel::Snapshot).is_err());
        thread.abort_xct().unwrap();
        assert!(!thread.is_running_xct());
    }

    #[test]
    fn follow_tolerates_double_null() {
        let (mut thread, _pool) = test_thread();
        let pointer = DualPagePointer::null();
        let page = thread
            .follow_page_pointer(None, true, false, false, false, &pointer)
            .unwrap();
        assert!(page.is_null());
    }

    #[test]
    fn follow_initializes_new_volatile_page() {
        let (mut thread, _pool) = test_thread();
        let pointer = DualPagePointer::null();
        let cached_before = thread.core_memory().cached_pages();

        let page = thread
            .follow_page_pointer(Some(&MagicInitializer), false, true, false, false, &pointer)
            .unwrap();
        assert!(!page.is_null());
        // SAFETY: the page was just installed by this thread.
        assert_eq!(unsafe { *page }, 0xAB);

        let installed = pointer.volatile_acquire();
        assert!(!installed.is_null());
        assert_eq!(installed.numa_node(), 0);
        assert_eq!(installed.mod_count(), 1);
        assert_eq!(thread.core_memory().cached_pages(), cached_before - 1);

        // Following again returns the same page without consuming pages.
        let again = thread
            .follow_page_pointer(None, false, false, false, false, &pointer)
            .unwrap();
        assert_eq!(again, page);
        assert_eq!(thread.core_memory().cached_pages(), cached_before - 1);
    }

    #[test]
    fn follow_snapshot_side_without_store_fails_and_reclaims() {
        let (mut thread, _pool) = test_thread();
        let mut pointer = DualPagePointer::null();
        pointer.set_snapshot_page_id(0x1234);
        let cached_before = thread.core_memory().cached_pages();

        // Read path.
        let read = thread.follow_page_pointer(None, false, false, false, false, &pointer);
        assert_eq!(read.unwrap_err(), ErrorCode::SnapshotReadFailed);

        // Install path grabs a page and must put it back on failure.
        let install = thread.follow_page_pointer(None, false, true, false, false, &pointer);
        assert_eq!(install.unwrap_err(), ErrorCode::SnapshotReadFailed);
        assert_eq!(thread.core_memory().cached_pages(), cached_before);
        assert!(pointer.volatile_acquire().is_null());
    }

    #[test]
    fn serializable_follow_records_pointer_set() {
        let (mut thread, _pool) = test_thread();
        thread.begin_xct(IsolationLevel::Serializable).unwrap();

        let mut pointer = DualPagePointer::null();
        pointer.set_volatile(VolatilePagePointer::compose(0, 0, 20));
        thread
            .follow_page_pointer(None, false, false, false, true, &pointer)
            .unwrap();
        assert_eq!(thread.current_xct().pointer_set().len(), 1);

        // Below serializable the flag is ignored.
        thread.abort_xct().unwrap();
        thread.begin_xct(IsolationLevel::Snapshot).unwrap();
        thread
            .follow_page_pointer(None, false, false, false, true, &pointer)
            .unwrap();
        assert_eq!(thread.current_xct().pointer_set().len(), 0);
        thread.abort_xct().unwrap();
    }

    #[test]
    fn mcs_helpers_acquire_and_release() {
        let (mut thread, _pool) = test_thread();
        let lock = McsLock::new();
        let block = thread.mcs_acquire_lock(&lock).unwrap();
        assert!(lock.is_locked());
        thread.mcs_release_lock(&lock, block);
        assert!(!lock.is_locked());

        let lock_b = McsLock::new();
        let locks = [&lock, &lock_b];
        let head = thread.mcs_acquire_lock_batch(&locks).unwrap();
        thread.mcs_release_lock_batch(&locks, head);
        assert!(!lock.is_locked() && !lock_b.is_locked());
    }

    #[test]
    fn uninitialize_returns_cached_pages() {
        let (mut thread, pool) = test_thread();
        thread.uninitialize().unwrap();
        assert_eq!(pool.free_count(), 240);
    }
}
