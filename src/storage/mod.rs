//! # Storage Layer
//!
//! Storages interpret pages. This slice ships one storage type (the
//! dense array) plus everything storages share: page pointers, record
//! headers, the common log-entry header, and the manager that owns every
//! storage between `create` and engine shutdown.
//!
//! ## Page Format
//!
//! Every page is `PAGE_SIZE` bytes: a 64-byte header (storage id, node
//! height, array range, epoch) followed by the body the storage type
//! defines. Leaf bodies are packed records (16-byte header + payload);
//! interior bodies are `INTERIOR_FANOUT` dual page pointers with range
//! metadata derived positionally. Clients never see page layout; they go
//! through storage operations.
//!
//! ## Log Entries
//!
//! Redo log entries start with the 16-byte [`LogHeader`] carrying the
//! entry's type, total length, owning storage, and `(epoch, in-epoch
//! ordinal)` identity. Entries are 8-byte aligned in the thread log
//! buffer. The partitioner's batch interfaces parse only this common
//! header plus the storage-specific body.
//!
//! ## Module Organization
//!
//! - `pointer`: volatile/snapshot/dual page pointers
//! - `record`: record headers (owner TID + payload)
//! - `array`: the dense array storage and its partitioner
//! - `partitioner`: the storage-polymorphic partitioner seam

pub mod array;
pub mod partitioner;
pub mod pointer;
pub mod record;

pub use pointer::{
    DualPagePointer, SnapshotPagePointer, StorageId, VolatilePageInitializer, VolatilePagePointer,
};
pub use record::RecordHeader;

use std::sync::Arc;

use eyre::ensure;
use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::info;
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::ErrorCode;
use crate::storage::array::{ArrayOffset, ArrayStorage};
use crate::thread::Thread;

/// Parses a zerocopy struct from a byte slice with size validation.
#[inline]
pub fn parse_zerocopy<'a, T: FromBytes + KnownLayout + Immutable>(
    bytes: &'a [u8],
    type_name: &str,
) -> eyre::Result<&'a T> {
    let size = std::mem::size_of::<T>();
    ensure!(
        bytes.len() >= size,
        "buffer too small for {}: {} < {}",
        type_name,
        bytes.len(),
        size
    );
    T::ref_from_bytes(&bytes[..size])
        .map_err(|e| eyre::eyre!("failed to parse {}: {:?}", type_name, e))
}

/// Common header at the start of every redo log entry.
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct LogHeader {
    log_type: U16,
    log_length: U16,
    storage_id: U32,
    epoch: U32,
    in_epoch_ordinal: U32,
}

pub const LOG_HEADER_SIZE: usize = 16;

const _: () = assert!(
    std::mem::size_of::<LogHeader>() == LOG_HEADER_SIZE,
    "log header layout drifted"
);

impl LogHeader {
    pub fn new(
        log_type: u16,
        log_length: u16,
        storage_id: StorageId,
        epoch: u32,
        in_epoch_ordinal: u32,
    ) -> Self {
        Self {
            log_type: U16::new(log_type),
            log_length: U16::new(log_length),
            storage_id: U32::new(storage_id),
            epoch: U32::new(epoch),
            in_epoch_ordinal: U32::new(in_epoch_ordinal),
        }
    }

    zerocopy_accessors! {
        log_type: u16,
        log_length: u16,
        storage_id: u32,
        epoch: u32,
        in_epoch_ordinal: u32,
    }
}

/// Registry of every storage in the engine. Storages are created through
/// here and live until engine shutdown, when their pages are drained back
/// into a worker's chunk.
pub struct StorageManager {
    storages: RwLock<HashMap<StorageId, Arc<ArrayStorage>>>,
    names: RwLock<HashMap<String, StorageId>>,
    next_id: std::sync::atomic::AtomicU32,
}

impl StorageManager {
    pub fn new() -> Self {
        Self {
            storages: RwLock::new(HashMap::new()),
            names: RwLock::new(HashMap::new()),
            // Storage id 0 is reserved as "no storage".
            next_id: std::sync::atomic::AtomicU32::new(1),
        }
    }

    pub fn storage_count(&self) -> usize {
        self.storages.read().len()
    }

    pub fn get_array(&self, id: StorageId) -> Option<Arc<ArrayStorage>> {
        self.storages.read().get(&id).cloned()
    }

    pub fn get_array_by_name(&self, name: &str) -> Option<Arc<ArrayStorage>> {
        let id = *self.names.read().get(name)?;
        self.get_array(id)
    }

    /// Creates a new array storage on `context`'s core and registers it.
    pub fn create_array(
        &self,
        context: &mut Thread,
        name: &str,
        payload_size: u16,
        array_size: ArrayOffset,
    ) -> eyre::Result<Arc<ArrayStorage>> {
        if self.names.read().contains_key(name) {
            return Err(eyre::Report::new(ErrorCode::StrAlreadyExists)
                .wrap_err(format!("storage '{}' already exists", name)));
        }
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let storage = Arc::new(ArrayStorage::create(
            context,
            id,
            name,
            payload_size,
            array_size,
        )?);
        self.names.write().insert(name.to_string(), id);
        self.storages.write().insert(id, Arc::clone(&storage));
        Ok(storage)
    }

    /// Drops every storage, returning its pages to `context`'s chunk.
    /// Precondition (enforced by the engine's shutdown order): no live
    /// reader references any page being freed.
    pub fn release_all(&self, context: &mut Thread) {
        let drained: Vec<Arc<ArrayStorage>> = {
            let mut storages = self.storages.write();
            self.names.write().clear();
            storages.drain().map(|(_, storage)| storage).collect()
        };
        if !drained.is_empty() {
            info!(count = drained.len(), "releasing all storages");
        }
        for storage in drained {
            storage.release_pages(context.core_memory_mut());
        }
    }
}

impl Default for StorageManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_header_round_trips_through_bytes() {
        let header = LogHeader::new(0x21, 40, 7, 3, 12);
        let mut bytes = [0u8; LOG_HEADER_SIZE];
        bytes.copy_from_slice(header.as_bytes());

        let parsed: &LogHeader = parse_zerocopy(&bytes, "LogHeader").unwrap();
        assert_eq!(parsed.log_type(), 0x21);
        assert_eq!(parsed.log_length(), 40);
        assert_eq!(parsed.storage_id(), 7);
        assert_eq!(parsed.epoch(), 3);
        assert_eq!(parsed.in_epoch_ordinal(), 12);
    }

    #[test]
    fn parse_zerocopy_rejects_short_buffers() {
        let bytes = [0u8; 4];
        let result: eyre::Result<&LogHeader> = parse_zerocopy(&bytes, "LogHeader");
        assert!(result.unwrap_err().to_string().contains("buffer too small"));
    }

    #[test]
    fn manager_starts_empty() {
        let manager = StorageManager::new();
        assert_eq!(manager.storage_count(), 0);
        assert!(manager.get_array(1).is_none());
        assert!(manager.get_array_by_name("missing").is_none());
    }
}
