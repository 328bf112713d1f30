//! # Storage-Polymorphic Partitioning
//!
//! Batch log processing needs to ask, per storage, "which partition owns
//! this log entry" and "in what order should these entries apply". Each
//! storage type answers differently; the [`Partitioner`] enum is the
//! seam: a tagged variant over the known storage kinds exposing the
//! capability set (`describe`, `is_partitionable`, `partition_batch`,
//! `sort_batch`, clone).
//!
//! This slice knows one storage kind (array); masstree and hash
//! partitioners slot in as further variants without touching callers.
//!
//! ## Log Buffer View
//!
//! The batch interfaces reference log entries by [`BufferPosition`]
//! (byte offset, 8-aligned) into a flat byte buffer, typically a
//! mapped dump of thread log buffers. [`LogBufferRef`] wraps the bytes
//! and slices out whole entries by reading the common header's length
//! field.

use crate::storage::array::partitioner::ArrayPartitioner;
use crate::storage::StorageId;
use crate::xct::Epoch;

/// Identifier of one partition (a NUMA node) in batch processing.
pub type PartitionId = u8;

/// Byte position of a log entry in a [`LogBufferRef`]. 8-byte aligned.
pub type BufferPosition = u32;

/// Read-only view over a buffer of contiguous log entries.
#[derive(Debug, Clone, Copy)]
pub struct LogBufferRef<'a> {
    data: &'a [u8],
}

impl<'a> LogBufferRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The whole entry starting at `position`, header included. The
    /// entry's length comes from its own header.
    pub fn entry(&self, position: BufferPosition) -> &'a [u8] {
        let at = position as usize;
        debug_assert!(at + 4 <= self.data.len());
        let length =
            u16::from_le_bytes(self.data[at + 2..at + 4].try_into().unwrap()) as usize;
        debug_assert!(length >= 4 && at + length <= self.data.len());
        &self.data[at..at + length]
    }
}

/// The partitioner capability set over every known storage kind.
#[derive(Clone)]
pub enum Partitioner {
    Array(ArrayPartitioner),
}

impl Partitioner {
    pub fn storage_id(&self) -> StorageId {
        match self {
            Partitioner::Array(inner) => inner.storage_id(),
        }
    }

    /// False when the storage is too small to spread across partitions.
    pub fn is_partitionable(&self) -> bool {
        match self {
            Partitioner::Array(inner) => inner.is_partitionable(),
        }
    }

    /// Human-readable summary for logs and debugging.
    pub fn describe(&self) -> String {
        match self {
            Partitioner::Array(inner) => inner.describe(),
        }
    }

    /// Assigns each referenced log entry to its owning partition.
    /// `results[i]` receives the partition of `log_positions[i]`.
    pub fn partition_batch(
        &self,
        local_partition: PartitionId,
        log_buffer: &LogBufferRef<'_>,
        log_positions: &[BufferPosition],
        results: &mut [PartitionId],
    ) {
        match self {
            Partitioner::Array(inner) => {
                inner.partition_batch(local_partition, log_buffer, log_positions, results)
            }
        }
    }

    /// Stable-sorts the referenced entries into apply order and writes
    /// the permuted positions to `output_buffer`. Returns how many
    /// positions were written; always the full count at this layer,
    /// since duplicates are not collapsed here.
    pub fn sort_batch(
        &self,
        log_buffer: &LogBufferRef<'_>,
        log_positions: &[BufferPosition],
        base_epoch: Epoch,
        output_buffer: &mut [BufferPosition],
    ) -> u32 {
        match self {
            Partitioner::Array(inner) => {
                inner.sort_batch(log_buffer, log_positions, base_epoch, output_buffer)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LogHeader;
    use zerocopy::IntoBytes;

    #[test]
    fn buffer_slices_entries_by_header_length() {
        let mut data = Vec::new();
        let first = LogHeader::new(1, 24, 10, 1, 0);
        data.extend_from_slice(first.as_bytes());
        data.extend_from_slice(&[0xAA; 8]);
        let second = LogHeader::new(1, 16, 11, 1, 1);
        data.extend_from_slice(second.as_bytes());

        let buffer = LogBufferRef::new(&data);
        assert_eq!(buffer.len(), 40);

        let entry = buffer.entry(0);
        assert_eq!(entry.len(), 24);
        assert_eq!(&entry[16..], &[0xAA; 8]);

        let entry = buffer.entry(24);
        assert_eq!(entry.len(), 16);
        assert_eq!(
            u32::from_le_bytes(entry[4..8].try_into().unwrap()),
            11
        );
    }
}
