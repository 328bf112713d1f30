//! # Engine Configuration Constants
//!
//! This module centralizes the layout constants of the engine, grouping
//! interdependent values together. Constants that depend on each other are
//! co-located to prevent mismatch bugs.
//!
//! ## Dependency Graph
//!
//! ```text
//! PAGE_SIZE (4096 bytes)
//!       |
//!       +-> PAGE_HEADER_SIZE (64 bytes, fixed)
//!       |
//!       +-> DATA_SIZE (derived: PAGE_SIZE - PAGE_HEADER_SIZE)
//!             |
//!             +-> INTERIOR_FANOUT (derived: DATA_SIZE / interior entry)
//!             |     Each interior entry is one 16-byte dual page pointer.
//!             |
//!             +-> records per leaf (runtime: DATA_SIZE /
//!                   (align8(payload) + RECORD_OVERHEAD))
//!
//! PAGE_POOL_OFFSET (u32)
//!       |
//!       +-> OFFSETS_PER_FREE_POOL_PAGE (PAGE_SIZE / 4)
//!             The first pages of each pool region store the circular
//!             free queue as packed u32 offsets.
//! ```
//!
//! ## Critical Invariants
//!
//! 1. `DATA_SIZE == PAGE_SIZE - PAGE_HEADER_SIZE` (derived correctly)
//! 2. `INTERIOR_FANOUT * INTERIOR_RECORD_SIZE <= DATA_SIZE` (entries fit)
//! 3. `PAGE_HEADER_SIZE % 8 == 0` (record area stays 8-byte aligned)

/// Size of each in-memory page in bytes (4KB).
/// This is the fundamental unit of pool allocation and identity.
pub const PAGE_SIZE: usize = 4096;

/// Size of the page header in bytes.
/// Every page begins with this header containing storage id, height,
/// range, and epoch metadata.
pub const PAGE_HEADER_SIZE: usize = 64;

/// Usable space in a page after the header.
pub const DATA_SIZE: usize = PAGE_SIZE - PAGE_HEADER_SIZE;

/// Per-record overhead in a leaf page: the record header that carries the
/// owner transaction id and lock word ahead of the payload.
pub const RECORD_OVERHEAD: usize = 16;

/// Size of one interior entry: a dual page pointer
/// (snapshot id + volatile pointer word).
pub const INTERIOR_RECORD_SIZE: usize = 16;

/// Number of child pointers in an interior page.
pub const INTERIOR_FANOUT: usize = DATA_SIZE / INTERIOR_RECORD_SIZE;

/// Offsets packed into one free-pool bookkeeping page.
pub const OFFSETS_PER_FREE_POOL_PAGE: usize = PAGE_SIZE / 4;

const _: () = assert!(
    DATA_SIZE == PAGE_SIZE - PAGE_HEADER_SIZE,
    "DATA_SIZE derivation mismatch"
);

const _: () = assert!(
    INTERIOR_FANOUT * INTERIOR_RECORD_SIZE <= DATA_SIZE,
    "interior entries must fit in the page body"
);

const _: () = assert!(
    PAGE_HEADER_SIZE % 8 == 0,
    "record area must stay 8-byte aligned"
);

// ============================================================================
// CONCURRENCY LIMITS
// ============================================================================

/// Maximum NUMA nodes a single engine can span. Bounds the fixed pointer
/// table inside the global page resolver so it stays a Copy value type.
pub const MAX_NUMA_NODES: usize = 16;

/// MCS queue-lock blocks available to each thread per transaction.
/// Block index 0 is reserved as "none", so usable indices are 1..=4095.
pub const MCS_BLOCKS_PER_THREAD: usize = 4096;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interior_fanout_is_252() {
        assert_eq!(INTERIOR_FANOUT, 252);
    }

    #[test]
    fn data_size_is_4032() {
        assert_eq!(DATA_SIZE, 4032);
    }

    #[test]
    fn free_pool_page_holds_1024_offsets() {
        assert_eq!(OFFSETS_PER_FREE_POOL_PAGE, 1024);
    }
}
