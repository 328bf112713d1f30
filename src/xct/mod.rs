//! # Transactions
//!
//! Per-thread transaction state: the read set, write set and pointer set
//! that the commit protocol validates, plus the epoch/ordinal identity of
//! log entries. The commit protocol itself (precommit, validation, TID
//! installation) lives outside this core; this module records the
//! contract it consumes.
//!
//! ## Sets
//!
//! All three sets are bounded arenas allocated once at thread initialize
//! with capacities from [`crate::config::XctOptions`]. Overflow is
//! reported to the caller as an error code; transactions treat it as
//! abort-and-retry at a higher level. Entries reference records and page
//! pointers by address; pages never move, and the pool regions outlive
//! every transaction.
//!
//! ## Identity
//!
//! A record's version is an [`XctId`]: the epoch the owning transaction
//! committed in plus an in-epoch ordinal. Log entries carry the same
//! pair, which is also the tie-breaking sort key for the partitioner's
//! batch sorter.
//!
//! ## Epochs
//!
//! The engine-global current epoch is a coarse logical clock advanced by
//! an external policy (group commit, recovery). This core only reads it
//! at transaction begin and offers a manual advance hook.

use std::sync::atomic::{AtomicU32, Ordering};

use crate::config::XctOptions;
use crate::error::ErrorCode;
use crate::storage::{DualPagePointer, RecordHeader, StorageId, VolatilePagePointer};

/// Coarse logical timestamp defining commit boundaries.
pub type Epoch = u32;

/// A record version: `(epoch << 32) | in-epoch ordinal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct XctId(u64);

impl XctId {
    #[inline]
    pub fn compose(epoch: Epoch, ordinal: u32) -> Self {
        Self(((epoch as u64) << 32) | ordinal as u64)
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
    pub fn epoch(self) -> Epoch {
        (self.0 >> 32) as Epoch
    }

    #[inline]
    pub fn ordinal(self) -> u32 {
        self.0 as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    /// Reads see a consistent snapshot; no read-set validation at commit.
    Snapshot,
    /// Full serializability; read and pointer sets are validated.
    Serializable,
}

/// One read-set entry: the record and the version observed when it was
/// read.
#[derive(Debug, Clone, Copy)]
pub struct ReadAccess {
    pub storage_id: StorageId,
    pub record: *const RecordHeader,
    pub observed_tid: XctId,
}

/// One write-set entry: the record and the redo-log entry reserved for
/// it in the owning thread's log buffer.
#[derive(Debug, Clone, Copy)]
pub struct WriteAccess {
    pub storage_id: StorageId,
    pub record: *const RecordHeader,
    pub log_position: u32,
    pub log_length: u16,
}

/// One pointer-set entry: a dual page pointer whose volatile side was
/// observed at the given value. The commit protocol re-checks these under
/// serializable isolation.
#[derive(Debug, Clone, Copy)]
pub struct PointerAccess {
    pub address: *const DualPagePointer,
    pub observed: VolatilePagePointer,
}

/// Per-thread transaction state. Owned by exactly one thread; never
/// shared.
pub struct Xct {
    active: bool,
    isolation_level: IsolationLevel,
    begin_epoch: Epoch,
    next_in_epoch_ordinal: u32,
    read_set: Vec<ReadAccess>,
    write_set: Vec<WriteAccess>,
    pointer_set: Vec<PointerAccess>,
    max_read_set: usize,
    max_write_set: usize,
    max_pointer_set: usize,
}

impl Xct {
    pub fn new(options: &XctOptions) -> Self {
        Self {
            active: false,
            isolation_level: IsolationLevel::Snapshot,
            begin_epoch: 0,
            next_in_epoch_ordinal: 0,
            read_set: Vec::with_capacity(options.max_read_set_size as usize),
            write_set: Vec::with_capacity(options.max_write_set_size as usize),
            pointer_set: Vec::with_capacity(options.max_pointer_set_size as usize),
            max_read_set: options.max_read_set_size as usize,
            max_write_set: options.max_write_set_size as usize,
            max_pointer_set: options.max_pointer_set_size as usize,
        }
    }

    /// Starts a transaction at `epoch`. Clears every set.
    pub fn activate(&mut self, isolation_level: IsolationLevel, epoch: Epoch) {
        debug_assert!(!self.active);
        self.active = true;
        self.isolation_level = isolation_level;
        self.begin_epoch = epoch;
        self.next_in_epoch_ordinal = 0;
        self.read_set.clear();
        self.write_set.clear();
        self.pointer_set.clear();
    }

    pub fn deactivate(&mut self) {
        debug_assert!(self.active);
        self.active = false;
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[inline]
    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation_level
    }

    #[inline]
    pub fn begin_epoch(&self) -> Epoch {
        self.begin_epoch
    }

    /// Ordinal for the next log entry this transaction writes.
    pub fn issue_next_ordinal(&mut self) -> u32 {
        let ordinal = self.next_in_epoch_ordinal;
        self.next_in_epoch_ordinal += 1;
        ordinal
    }

    pub fn read_set(&self) -> &[ReadAccess] {
        &self.read_set
    }

    pub fn write_set(&self) -> &[WriteAccess] {
        &self.write_set
    }

    pub fn pointer_set(&self) -> &[PointerAccess] {
        &self.pointer_set
    }

    pub fn add_to_read_set(
        &mut self,
        storage_id: StorageId,
        record: *const RecordHeader,
        observed_tid: XctId,
    ) -> Result<(), ErrorCode> {
        debug_assert!(self.active);
        if self.read_set.len() >= self.max_read_set {
            return Err(ErrorCode::ReadSetOverflow);
        }
        self.read_set.push(ReadAccess {
            storage_id,
            record,
            observed_tid,
        });
        Ok(())
    }

    pub fn add_to_write_set(
        &mut self,
        storage_id: StorageId,
        record: *const RecordHeader,
        log_position: u32,
        log_length: u16,
    ) -> Result<(), ErrorCode> {
        debug_assert!(self.active);
        if self.write_set.len() >= self.max_write_set {
            return Err(ErrorCode::WriteSetOverflow);
        }
        self.write_set.push(WriteAccess {
            storage_id,
            record,
            log_position,
            log_length,
        });
        Ok(())
    }

    pub fn add_to_pointer_set(
        &mut self,
        address: *const DualPagePointer,
        observed: VolatilePagePointer,
    ) -> Result<(), ErrorCode> {
        debug_assert!(self.active);
        if self.pointer_set.len() >= self.max_pointer_set {
            return Err(ErrorCode::PointerSetOverflow);
        }
        self.pointer_set.push(PointerAccess { address, observed });
        Ok(())
    }
}

/// Engine-global transaction bookkeeping: just the current epoch in this
/// core. Commit/advance policy is an external collaborator.
pub struct XctManager {
    current_global_epoch: AtomicU32,
}

impl XctManager {
    pub fn new() -> Self {
        Self {
            // Epoch 0 is reserved so a zeroed TID reads as "before any
            // commit".
            current_global_epoch: AtomicU32::new(1),
        }
    }

    #[inline]
    pub fn get_current_global_epoch(&self) -> Epoch {
        self.current_global_epoch.load(Ordering::Acquire)
    }

    /// Manual epoch advance for external policies and tests.
    pub fn advance_current_global_epoch(&self) -> Epoch {
        self.current_global_epoch.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl Default for XctManager {
    fn default() -> Self {
        Self::new()
    }
}
