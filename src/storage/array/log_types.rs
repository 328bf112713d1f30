//! # Array Redo-Log Entries
//!
//! The array storage writes one log type: the record overwrite. An entry
//! is the redo image of a byte-range write into one record's payload.
//!
//! ## Entry Layout
//!
//! ```text
//! Offset  Size  Field           Description
//! ------  ----  --------------  -----------------------------------
//! 0       16    LogHeader       type, length, storage, epoch, ordinal
//! 16      8     offset          Array offset of the record
//! 24      2     payload_offset  First payload byte written
//! 26      2     payload_count   Bytes written
//! 28      4     reserved
//! 32      N     bytes           The written bytes (N = payload_count)
//! ...           padding         Zeroes up to 8-byte alignment
//! ```
//!
//! Entries are populated in place inside the owning thread's log buffer
//! right after reservation; together with the write-set entry that
//! points back at them they form the redo record the commit protocol
//! applies.

use zerocopy::little_endian::{U16, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::assorted::align8;
use crate::storage::array::ArrayOffset;
use crate::storage::{LogHeader, StorageId, LOG_HEADER_SIZE};
use crate::xct::Epoch;

/// Log type code of an array record overwrite.
pub const LOG_TYPE_ARRAY_OVERWRITE: u16 = 0x0021;

/// Fixed (pre-payload) portion of an overwrite entry.
pub const OVERWRITE_LOG_FIXED_SIZE: usize = 32;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct OverwriteLogHeader {
    common: LogHeader,
    offset: U64,
    payload_offset: U16,
    payload_count: U16,
    reserved: [u8; 4],
}

const _: () = assert!(
    std::mem::size_of::<OverwriteLogHeader>() == OVERWRITE_LOG_FIXED_SIZE,
    "overwrite log layout drifted"
);

/// Total entry length for a write of `payload_count` bytes, 8-byte
/// aligned.
#[inline]
pub fn calculate_log_length(payload_count: u16) -> u16 {
    align8(OVERWRITE_LOG_FIXED_SIZE as u64 + payload_count as u64) as u16
}

/// Fills a reserved log entry in place. `entry` must be exactly
/// `calculate_log_length(payload.len())` bytes.
#[allow(clippy::too_many_arguments)]
pub fn populate_overwrite_log(
    entry: &mut [u8],
    storage_id: StorageId,
    offset: ArrayOffset,
    payload: &[u8],
    payload_offset: u16,
    epoch: Epoch,
    in_epoch_ordinal: u32,
) {
    let payload_count = payload.len() as u16;
    debug_assert_eq!(entry.len(), calculate_log_length(payload_count) as usize);

    let header = OverwriteLogHeader {
        common: LogHeader::new(
            LOG_TYPE_ARRAY_OVERWRITE,
            entry.len() as u16,
            storage_id,
            epoch,
            in_epoch_ordinal,
        ),
        offset: U64::new(offset),
        payload_offset: U16::new(payload_offset),
        payload_count: U16::new(payload_count),
        reserved: [0; 4],
    };
    entry[..OVERWRITE_LOG_FIXED_SIZE].copy_from_slice(header.as_bytes());
    entry[OVERWRITE_LOG_FIXED_SIZE..OVERWRITE_LOG_FIXED_SIZE + payload.len()]
        .copy_from_slice(payload);
    // Zero the alignment tail so entries are deterministic byte-for-byte.
    entry[OVERWRITE_LOG_FIXED_SIZE + payload.len()..].fill(0);
}

/// Read view over a populated overwrite entry.
#[derive(Debug, Clone, Copy)]
pub struct OverwriteLogRef<'a> {
    entry: &'a [u8],
}

impl<'a> OverwriteLogRef<'a> {
    pub fn new(entry: &'a [u8]) -> Self {
        debug_assert!(entry.len() >= OVERWRITE_LOG_FIXED_SIZE);
        Self { entry }
    }

    #[inline]
    fn read_u16(&self, at: usize) -> u16 {
        u16::from_le_bytes(self.entry[at..at + 2].try_into().unwrap())
    }

    #[inline]
    fn read_u32(&self, at: usize) -> u32 {
        u32::from_le_bytes(self.entry[at..at + 4].try_into().unwrap())
    }

    #[inline]
    fn read_u64(&self, at: usize) -> u64 {
        u64::from_le_bytes(self.entry[at..at + 8].try_into().unwrap())
    }

    #[inline]
    pub fn log_type(&self) -> u16 {
        self.read_u16(0)
    }

    #[inline]
    pub fn log_length(&self) -> u16 {
        self.read_u16(2)
    }

    #[inline]
    pub fn storage_id(&self) -> StorageId {
        self.read_u32(4)
    }

    #[inline]
    pub fn epoch(&self) -> Epoch {
        self.read_u32(8)
    }

    #[inline]
    pub fn in_epoch_ordinal(&self) -> u32 {
        self.read_u32(12)
    }

    #[inline]
    pub fn offset(&self) -> ArrayOffset {
        self.read_u64(LOG_HEADER_SIZE)
    }

    #[inline]
    pub fn payload_offset(&self) -> u16 {
        self.read_u16(LOG_HEADER_SIZE + 8)
    }

    #[inline]
    pub fn payload_count(&self) -> u16 {
        self.read_u16(LOG_HEADER_SIZE + 10)
    }

    /// The written bytes.
    #[inline]
    pub fn payload_bytes(&self) -> &'a [u8] {
        let count = self.payload_count() as usize;
        &self.entry[OVERWRITE_LOG_FIXED_SIZE..OVERWRITE_LOG_FIXED_SIZE + count]
    }

    /// Applies this entry's bytes to a record payload. Commit-side redo.
    ///
    /// # Safety
    /// `record_payload` must point at a payload area of at least
    /// `payload_offset + payload_count` bytes with no concurrent access.
    pub unsafe fn apply_record(&self, record_payload: *mut u8) {
        let bytes = self.payload_bytes();
        std::ptr::copy_nonoverlapping(
            bytes.as_ptr(),
            record_payload.add(self.payload_offset() as usize),
            bytes.len(),
        );
    }
}
