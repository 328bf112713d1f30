//! # Records
//!
//! A record is an opaque 16-byte header followed by the storage's payload
//! bytes. The header carries the owner transaction id (the version other
//! transactions validate against) and a flags word reserved for record
//! locking.
//!
//! Records are never moved: they live at fixed positions inside leaf
//! pages, so a `*const RecordHeader` taken during a transaction stays
//! valid for the life of the page. Payload mutation happens only at
//! commit time, applied from the redo log; during the transaction the
//! write set and log entry jointly describe the pending change.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::constants::RECORD_OVERHEAD;
use crate::xct::XctId;

#[repr(C)]
#[derive(Debug)]
pub struct RecordHeader {
    owner_tid: u64,
    flags: u32,
    reserved: u32,
}

const _: () = assert!(
    std::mem::size_of::<RecordHeader>() == RECORD_OVERHEAD,
    "record header must match RECORD_OVERHEAD"
);

impl RecordHeader {
    /// Atomic view of the owner TID.
    ///
    /// SAFETY of the cast: `owner_tid` is an 8-byte-aligned u64 (records
    /// sit at 8-byte-aligned offsets in the page body) and all concurrent
    /// access goes through this view.
    #[inline]
    pub fn tid_atomic(&self) -> &AtomicU64 {
        unsafe { &*(&self.owner_tid as *const u64 as *const AtomicU64) }
    }

    /// Reads the owner TID with acquire ordering; the version a read-set
    /// entry captures.
    #[inline]
    pub fn observe_tid(&self) -> XctId {
        XctId::from_word(self.tid_atomic().load(Ordering::Acquire))
    }

    /// Non-atomic TID write for records in pages still private to their
    /// builder.
    pub fn set_tid(&mut self, tid: XctId) {
        self.owner_tid = tid.word();
    }

    /// Start of the payload bytes that follow this header.
    #[inline]
    pub fn payload_ptr(&self) -> *const u8 {
        // SAFETY: the payload is laid out immediately after the header
        // within the same leaf page.
        unsafe { (self as *const Self).add(1) as *const u8 }
    }

    #[inline]
    pub fn payload_ptr_mut(&mut self) -> *mut u8 {
        unsafe { (self as *mut Self).add(1) as *mut u8 }
    }
}
