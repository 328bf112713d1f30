//! # MCS Queue Locks
//!
//! A simple CAS spin lock causes a cache invalidation storm on big
//! multi-socket machines: every waiter hammers the same line. The MCS
//! lock fixes this by queueing waiters, each spinning on a flag in its
//! own block. The lock word itself is touched only to join the queue and
//! to hand off.
//!
//! ## Layout
//!
//! The lock is a single `AtomicU32` tail packing
//! `(thread ordinal << 16) | block index`; zero means free. Blocks live
//! in a fixed per-thread arena inside [`McsBlockStorage`], addressable by
//! `(ordinal, block index)` from any thread, so a releasing thread can
//! reach its successor's spin flag directly. Block index 0 is reserved as
//! "none", which is what makes the packed zero word unambiguous.
//!
//! ## Block Lifecycle
//!
//! Acquires consume block indices sequentially from a per-thread cursor;
//! releases do not return them. The cursor resets at transaction
//! boundaries, when the thread provably holds no locks. This is what lets
//! a batch acquire hand back only its first index: the rest are
//! consecutive.
//!
//! ## Protocol
//!
//! Acquire: initialize own block (locked, no successor), swap self into
//! the tail (acq-rel). A null previous tail means immediate ownership;
//! otherwise link into the predecessor's successor field (release) and
//! spin locally (acquire).
//!
//! Release: with a visible successor, clear its flag (release). With
//! none, CAS the tail from self to null; if that fails a newcomer is
//! mid-enqueue, so spin until the successor link appears, then hand off.
//!
//! FIFO ordering follows from the order of successful tail exchanges.
//! There is no try-acquire and no timeout at this layer.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::config::constants::MCS_BLOCKS_PER_THREAD;
use crate::error::ErrorCode;
use crate::sync::fences::memory_fence_acquire;
use crate::thread::ThreadGlobalOrdinal;

/// 1-based index of a block in a thread's arena. 0 means "none".
pub type McsBlockIndex = u16;

#[inline]
fn compose_word(ordinal: ThreadGlobalOrdinal, block: McsBlockIndex) -> u32 {
    ((ordinal as u32) << 16) | block as u32
}

#[inline]
fn decompose_word(word: u32) -> (ThreadGlobalOrdinal, McsBlockIndex) {
    ((word >> 16) as u16, word as u16)
}

/// The lock word. Embed one of these in any structure that needs a
/// per-core-local-spin critical section.
#[derive(Debug)]
pub struct McsLock {
    tail: AtomicU32,
}

impl McsLock {
    pub const fn new() -> Self {
        Self {
            tail: AtomicU32::new(0),
        }
    }

    /// Whether some thread currently holds or waits for this lock.
    /// Seq-cst so independent observers agree; use only off the hot path.
    pub fn is_locked(&self) -> bool {
        self.tail.load(Ordering::SeqCst) != 0
    }
}

impl Default for McsLock {
    fn default() -> Self {
        Self::new()
    }
}

/// One waiter slot. `locked` is the local spin flag; `successor` is the
/// packed identity of the next waiter, written by that waiter itself.
#[derive(Debug)]
pub struct McsBlock {
    locked: AtomicBool,
    successor: AtomicU32,
}

impl McsBlock {
    fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
            successor: AtomicU32::new(0),
        }
    }
}

/// Engine-wide table of MCS blocks: one fixed arena per worker thread,
/// indexed by the thread's global ordinal. Sized once at engine
/// initialize; never grows.
pub struct McsBlockStorage {
    arenas: Vec<Box<[McsBlock]>>,
}

impl McsBlockStorage {
    pub fn new(thread_count: usize) -> Self {
        let arenas = (0..thread_count)
            .map(|_| {
                (0..MCS_BLOCKS_PER_THREAD)
                    .map(|_| McsBlock::new())
                    .collect::<Vec<_>>()
                    .into_boxed_slice()
            })
            .collect();
        Self { arenas }
    }

    pub fn thread_count(&self) -> usize {
        self.arenas.len()
    }

    #[inline]
    fn block(&self, ordinal: ThreadGlobalOrdinal, index: McsBlockIndex) -> &McsBlock {
        debug_assert!(index != 0, "block index 0 is the none sentinel");
        &self.arenas[ordinal as usize][index as usize]
    }
}

/// Cursor over a thread's block arena. Owned by the thread; reset at
/// transaction boundaries when no locks are held.
#[derive(Debug, Default)]
pub struct McsBlockCursor(McsBlockIndex);

impl McsBlockCursor {
    pub fn new() -> Self {
        Self(0)
    }

    /// Forgets all consumed blocks. Caller must hold no locks.
    pub fn reset(&mut self) {
        self.0 = 0;
    }

    pub fn consumed(&self) -> McsBlockIndex {
        self.0
    }

    fn allocate(&mut self) -> Result<McsBlockIndex, ErrorCode> {
        if self.0 as usize + 1 >= MCS_BLOCKS_PER_THREAD {
            return Err(ErrorCode::TooManyMcsBlocks);
        }
        self.0 += 1;
        Ok(self.0)
    }
}

/// A thread's view of the MCS machinery: its identity, its block cursor,
/// and the shared block table. Constructed on the fly by the owning
/// thread; never shared.
pub struct McsLockContext<'a> {
    storage: &'a McsBlockStorage,
    ordinal: ThreadGlobalOrdinal,
    cursor: &'a mut McsBlockCursor,
}

impl<'a> McsLockContext<'a> {
    pub fn new(
        storage: &'a McsBlockStorage,
        ordinal: ThreadGlobalOrdinal,
        cursor: &'a mut McsBlockCursor,
    ) -> Self {
        debug_assert!((ordinal as usize) < storage.thread_count());
        Self {
            storage,
            ordinal,
            cursor,
        }
    }

    /// Unconditionally acquires `lock`, spinning locally while a
    /// predecessor holds it. Returns the consumed block index, needed for
    /// release.
    pub fn acquire(&mut self, lock: &McsLock) -> Result<McsBlockIndex, ErrorCode> {
        let block_index = self.cursor.allocate()?;
        let me = compose_word(self.ordinal, block_index);
        let block = self.storage.block(self.ordinal, block_index);
        block.locked.store(true, Ordering::Relaxed);
        block.successor.store(0, Ordering::Relaxed);

        let prev = lock.tail.swap(me, Ordering::AcqRel);
        if prev == 0 {
            memory_fence_acquire();
            return Ok(block_index);
        }

        let (prev_ordinal, prev_block) = decompose_word(prev);
        self.storage
            .block(prev_ordinal, prev_block)
            .successor
            .store(me, Ordering::Release);

        while block.locked.load(Ordering::Acquire) {
            std::hint::spin_loop();
        }
        Ok(block_index)
    }

    /// Acquires every lock in `locks` in array order. Returns the block
    /// index of the first; the rest occupy consecutive indices. Callers
    /// are responsible for a deadlock-free global order; the lock itself
    /// is oblivious.
    pub fn acquire_batch(&mut self, locks: &[&McsLock]) -> Result<McsBlockIndex, ErrorCode> {
        debug_assert!(!locks.is_empty());
        let head = self.acquire(locks[0])?;
        for lock in &locks[1..] {
            self.acquire(lock)?;
        }
        Ok(head)
    }

    /// Non-atomic fast path for a lock no other thread can possibly be
    /// contending, such as one inside a page still being built. Still
    /// consumes a block index so release stays uniform.
    pub fn initial_lock(&mut self, lock: &McsLock) -> Result<McsBlockIndex, ErrorCode> {
        debug_assert!(!lock.is_locked());
        let block_index = self.cursor.allocate()?;
        let block = self.storage.block(self.ordinal, block_index);
        block.locked.store(true, Ordering::Relaxed);
        block.successor.store(0, Ordering::Relaxed);
        lock.tail
            .store(compose_word(self.ordinal, block_index), Ordering::Relaxed);
        Ok(block_index)
    }

    /// Releases a lock acquired by this thread with `block_index`.
    pub fn release(&self, lock: &McsLock, block_index: McsBlockIndex) {
        let me = compose_word(self.ordinal, block_index);
        let block = self.storage.block(self.ordinal, block_index);

        let mut successor = block.successor.load(Ordering::Acquire);
        if successor == 0 {
            if lock
                .tail
                .compare_exchange(me, 0, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
            // A newcomer swapped itself into the tail but has not linked
            // yet; its successor store is imminent.
            loop {
                successor = block.successor.load(Ordering::Acquire);
                if successor != 0 {
                    break;
                }
                std::hint::spin_loop();
            }
        }

        let (succ_ordinal, succ_block) = decompose_word(successor);
        self.storage
            .block(succ_ordinal, succ_block)
            .locked
            .store(false, Ordering::Release);
    }

    /// Releases a batch taken with [`acquire_batch`](Self::acquire_batch),
    /// walking in reverse of the acquisition order.
    pub fn release_batch(&self, locks: &[&McsLock], head_block: McsBlockIndex) {
        for (position, lock) in locks.iter().enumerate().rev() {
            self.release(lock, head_block + position as McsBlockIndex);
        }
    }
}
