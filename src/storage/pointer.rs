//! # Page Pointers
//!
//! Every reference between pages is a value, never a raw address. A
//! volatile pointer packs `(node, mod_count, offset)` into one word so a
//! single CAS can swing it; a snapshot pointer names a page image in a
//! durable snapshot (opaque to this core); a dual pointer carries both.
//!
//! ## Volatile Pointer Word Layout
//!
//! ```text
//! Bits 63..56   unused
//! Bits 55..48   NUMA node
//! Bits 47..32   mod_count (bumped on every install, detects swings)
//! Bits 31..0    offset into the node's pool (0 = null)
//! ```
//!
//! A pointer is null iff its offset is 0, regardless of the other fields.
//!
//! ## Dual Pointer Invariants
//!
//! - At least one side is non-null for any live page.
//! - Installing a volatile copy of a snapshot page preserves the snapshot
//!   pointer.
//! - A null volatile side means "fetch from snapshot on demand".
//!
//! Dual pointers live inside page bodies and storage roots, where
//! concurrent threads race to install volatile copies; the volatile word
//! is therefore accessed through an atomic view.

use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of a storage, assigned by the storage manager.
pub type StorageId = u32;

/// 64-bit identifier of a page in a durable snapshot. 0 is null. Opaque
/// to this core.
pub type SnapshotPagePointer = u64;

/// Packed `(node, mod_count, offset)` reference to an in-memory page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolatilePagePointer(u64);

impl VolatilePagePointer {
    const NODE_SHIFT: u32 = 48;
    const MOD_COUNT_SHIFT: u32 = 32;

    #[inline]
    pub fn null() -> Self {
        Self(0)
    }

    #[inline]
    pub fn compose(node: u8, mod_count: u16, offset: u32) -> Self {
        Self(
            ((node as u64) << Self::NODE_SHIFT)
                | ((mod_count as u64) << Self::MOD_COUNT_SHIFT)
                | offset as u64,
        )
    }

    #[inline]
    pub fn from_word(word: u64) -> Self {
        Self(word)
    }

    #[inline]
    pub fn word(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn numa_node(self) -> u8 {
        (self.0 >> Self::NODE_SHIFT) as u8
    }

    #[inline]
    pub fn mod_count(self) -> u16 {
        (self.0 >> Self::MOD_COUNT_SHIFT) as u16
    }

    #[inline]
    pub fn offset(self) -> u32 {
        self.0 as u32
    }

    #[inline]
    pub fn is_null(self) -> bool {
        self.offset() == 0
    }
}

/// A pair of snapshot and volatile references to the same logical page.
#[repr(C)]
#[derive(Debug)]
pub struct DualPagePointer {
    snapshot_page_id: SnapshotPagePointer,
    volatile_word: u64,
}

impl DualPagePointer {
    pub fn new(snapshot_page_id: SnapshotPagePointer, volatile: VolatilePagePointer) -> Self {
        Self {
            snapshot_page_id,
            volatile_word: volatile.word(),
        }
    }

    pub fn null() -> Self {
        Self {
            snapshot_page_id: 0,
            volatile_word: 0,
        }
    }

    #[inline]
    pub fn snapshot_page_id(&self) -> SnapshotPagePointer {
        self.snapshot_page_id
    }

    pub fn set_snapshot_page_id(&mut self, id: SnapshotPagePointer) {
        self.snapshot_page_id = id;
    }

    /// Atomic view of the volatile word.
    ///
    /// SAFETY of the cast: `volatile_word` is an 8-byte-aligned u64
    /// (repr(C) with a u64 sibling), and every concurrent access anywhere
    /// in the engine goes through this same atomic view.
    #[inline]
    pub fn volatile_atomic(&self) -> &AtomicU64 {
        unsafe { &*(&self.volatile_word as *const u64 as *const AtomicU64) }
    }

    /// Current volatile pointer with acquire ordering: the page contents
    /// published before the install are visible after this load.
    #[inline]
    pub fn volatile_acquire(&self) -> VolatilePagePointer {
        VolatilePagePointer::from_word(self.volatile_atomic().load(Ordering::Acquire))
    }

    /// Non-atomic write, for pages still private to their builder.
    pub fn set_volatile(&mut self, pointer: VolatilePagePointer) {
        self.volatile_word = pointer.word();
    }

    /// CAS the volatile side from `expected` to `new` (acq-rel). On
    /// failure returns the pointer that is actually installed.
    #[inline]
    pub fn try_install_volatile(
        &self,
        expected: VolatilePagePointer,
        new: VolatilePagePointer,
    ) -> Result<(), VolatilePagePointer> {
        self.volatile_atomic()
            .compare_exchange(
                expected.word(),
                new.word(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(VolatilePagePointer::from_word)
    }

    /// Atomically nulls the volatile side, returning the previous value.
    /// Used by storage teardown.
    pub fn swap_volatile_null(&self) -> VolatilePagePointer {
        VolatilePagePointer::from_word(self.volatile_atomic().swap(0, Ordering::AcqRel))
    }

    pub fn is_both_null(&self) -> bool {
        self.snapshot_page_id == 0 && self.volatile_acquire().is_null()
    }
}

/// Callback that fills a freshly grabbed volatile page when a dual
/// pointer with both sides null is followed with `will_modify`.
///
/// The page handed in is zeroed; the initializer writes the header and
/// whatever body the storage type needs.
pub trait VolatilePageInitializer {
    fn initialize_volatile_page(&self, page: *mut u8);
}
