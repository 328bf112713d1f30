//! # Array Page Layout
//!
//! Every array page is `PAGE_SIZE` bytes: a 64-byte header followed by a
//! body whose meaning depends on the page's height.
//!
//! ## Page Header Layout (64 bytes)
//!
//! ```text
//! Offset  Size  Field        Description
//! ------  ----  -----------  ----------------------------------------
//! 0       4     storage_id   Owning storage
//! 4       2     payload_size Record payload bytes (unaligned)
//! 6       1     node_height  0 = leaf, root is the highest
//! 7       1     reserved
//! 8       4     epoch        Epoch the page was initialized in
//! 12      4     reserved
//! 16      8     range_begin  First array offset covered (inclusive)
//! 24      8     range_end    One past the last offset covered
//! 32      32    reserved     Future checksum / statistics
//! ```
//!
//! ## Body
//!
//! - **Leaf** (height 0): packed records of
//!   `RECORD_OVERHEAD + align8(payload_size)` bytes each, record `i` at
//!   body offset `i * record_size`.
//! - **Interior**: `INTERIOR_FANOUT` dual page pointers of 16 bytes each;
//!   slot `i` covers `[range_begin + i * child_interval,
//!   range_begin + (i+1) * child_interval)`, clamped to the page range.
//!
//! The header uses `zerocopy` little-endian fields so a page can be
//! inspected from raw bytes; records and interior slots are reached by
//! pointer arithmetic from the page address, which the 8-byte-aligned
//! header offset and record sizes keep well-aligned.

use zerocopy::little_endian::{U16, U32, U64};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::assorted::align8;
use crate::config::constants::{DATA_SIZE, INTERIOR_FANOUT, INTERIOR_RECORD_SIZE, PAGE_SIZE};
use crate::storage::array::ArrayRange;
use crate::storage::pointer::DualPagePointer;
use crate::storage::record::RecordHeader;
use crate::storage::StorageId;
use crate::xct::Epoch;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct ArrayPageHeader {
    storage_id: U32,
    payload_size: U16,
    node_height: u8,
    reserved0: u8,
    epoch: U32,
    reserved1: U32,
    range_begin: U64,
    range_end: U64,
    reserved2: [u8; 32],
}

const _: () = assert!(
    std::mem::size_of::<ArrayPageHeader>() == crate::config::constants::PAGE_HEADER_SIZE,
    "array page header must match PAGE_HEADER_SIZE"
);

impl ArrayPageHeader {
    zerocopy_accessors! {
        storage_id: u32,
        payload_size: u16,
        epoch: u32,
        range_begin: u64,
        range_end: u64,
    }

    #[inline]
    pub fn node_height(&self) -> u8 {
        self.node_height
    }

    pub fn set_node_height(&mut self, height: u8) {
        self.node_height = height;
    }
}

#[repr(C)]
pub struct ArrayPage {
    header: ArrayPageHeader,
    data: [u8; DATA_SIZE],
}

const _: () = assert!(
    std::mem::size_of::<ArrayPage>() == PAGE_SIZE,
    "array page must be exactly one page"
);

impl ArrayPage {
    /// Reinterprets a resolved page address.
    ///
    /// # Safety
    /// `ptr` must point at a live, page-aligned page in a pool region
    /// that outlives the returned reference.
    #[inline]
    pub unsafe fn from_page_ptr<'a>(ptr: *const u8) -> &'a ArrayPage {
        debug_assert!(!ptr.is_null());
        &*(ptr as *const ArrayPage)
    }

    /// Mutable variant of [`from_page_ptr`](Self::from_page_ptr).
    ///
    /// # Safety
    /// As `from_page_ptr`, plus the caller must have exclusive access to
    /// the page (build or teardown paths).
    #[inline]
    pub unsafe fn from_page_ptr_mut<'a>(ptr: *mut u8) -> &'a mut ArrayPage {
        debug_assert!(!ptr.is_null());
        &mut *(ptr as *mut ArrayPage)
    }

    /// Zeroes the page and writes a fresh header. Pool pages are
    /// recycled, so stale bytes must not leak into record payloads.
    pub fn initialize_data_page(
        &mut self,
        epoch: Epoch,
        storage_id: StorageId,
        payload_size: u16,
        level: u8,
        range: ArrayRange,
    ) {
        self.data.fill(0);
        self.header = ArrayPageHeader {
            storage_id: U32::new(storage_id),
            payload_size: U16::new(payload_size),
            node_height: level,
            reserved0: 0,
            epoch: U32::new(epoch),
            reserved1: U32::new(0),
            range_begin: U64::new(range.begin()),
            range_end: U64::new(range.end()),
            reserved2: [0; 32],
        };
    }

    #[inline]
    pub fn header(&self) -> &ArrayPageHeader {
        &self.header
    }

    #[inline]
    pub fn storage_id(&self) -> StorageId {
        self.header.storage_id()
    }

    #[inline]
    pub fn payload_size(&self) -> u16 {
        self.header.payload_size()
    }

    #[inline]
    pub fn node_height(&self) -> u8 {
        self.header.node_height()
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.header.node_height() == 0
    }

    #[inline]
    pub fn epoch(&self) -> Epoch {
        self.header.epoch()
    }

    #[inline]
    pub fn range(&self) -> ArrayRange {
        ArrayRange::new(self.header.range_begin(), self.header.range_end())
    }

    /// Bytes one leaf record occupies, header included.
    #[inline]
    pub fn leaf_record_size(&self) -> usize {
        align8(self.header.payload_size() as u64) as usize + std::mem::size_of::<RecordHeader>()
    }

    /// The `index`-th record of this leaf page.
    #[inline]
    pub fn leaf_record(&self, index: u64) -> &RecordHeader {
        debug_assert!(self.is_leaf());
        let record_size = self.leaf_record_size();
        let offset = index as usize * record_size;
        debug_assert!(offset + record_size <= DATA_SIZE);
        // SAFETY: in-bounds per the assertion; records start at 8-byte
        // multiples inside an 8-byte-aligned body.
        unsafe { &*(self.data.as_ptr().add(offset) as *const RecordHeader) }
    }

    /// Mutable access to a leaf record; build/commit paths only.
    #[inline]
    pub fn leaf_record_mut(&mut self, index: u64) -> &mut RecordHeader {
        debug_assert!(self.is_leaf());
        let record_size = self.leaf_record_size();
        let offset = index as usize * record_size;
        debug_assert!(offset + record_size <= DATA_SIZE);
        // SAFETY: as in leaf_record, with exclusive access via &mut self.
        unsafe { &mut *(self.data.as_mut_ptr().add(offset) as *mut RecordHeader) }
    }

    /// The `index`-th child pointer of this interior page.
    #[inline]
    pub fn interior_record(&self, index: usize) -> &DualPagePointer {
        debug_assert!(!self.is_leaf());
        debug_assert!(index < INTERIOR_FANOUT);
        // SAFETY: in-bounds; dual pointers are 16 bytes at 16-byte steps
        // in an 8-byte-aligned body.
        unsafe {
            &*(self.data.as_ptr().add(index * INTERIOR_RECORD_SIZE) as *const DualPagePointer)
        }
    }

    /// Mutable access to a child pointer; build/teardown paths only.
    #[inline]
    pub fn interior_record_mut(&mut self, index: usize) -> &mut DualPagePointer {
        debug_assert!(!self.is_leaf());
        debug_assert!(index < INTERIOR_FANOUT);
        // SAFETY: as in interior_record, with exclusive access.
        unsafe {
            &mut *(self.data.as_mut_ptr().add(index * INTERIOR_RECORD_SIZE)
                as *mut DualPagePointer)
        }
    }

    /// How many records fit in a leaf for the given payload size.
    pub fn records_per_leaf(payload_size: u16) -> u64 {
        DATA_SIZE as u64
            / (align8(payload_size as u64) + std::mem::size_of::<RecordHeader>() as u64)
    }
}
