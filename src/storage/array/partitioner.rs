//! # Array Partitioner
//!
//! Assigns the array's top-level buckets to partitions and orders log
//! batches for apply. The whole array range is split into
//! `INTERIOR_FANOUT` buckets, one per root child, and each bucket's
//! owner is simply the NUMA node currently holding that child's volatile
//! page. Reading one root page at construction is the entire policy;
//! cheap, and accurate whenever pages live where they were built.
//!
//! ## Balancing
//!
//! Raw ownership can be lopsided (a freshly built array lives entirely
//! on its creator's node), so assignments are rebalanced: no partition
//! keeps more than `floor(avg * 1.2)` buckets where
//! `avg = INTERIOR_FANOUT / partitions`. Overfull partitions surrender
//! their highest-index buckets first; receivers are chosen
//! fewest-buckets-first with lowest-id tie-break, so the result is
//! deterministic. A partition can still end up empty when the root has
//! fewer children than there are partitions; that case is warned, not
//! fixed.
//!
//! ## Batch Interfaces
//!
//! `partition_batch` maps each log entry's array offset to
//! `bucket_owners[offset / bucket_size]`; the division runs through a
//! precomputed [`ConstDiv`] since it executes once per entry.
//! `sort_batch` stable-sorts entries by
//! `(offset, epoch - base_epoch, in-epoch ordinal)`: within one
//! storage, the apply order of the redo stream.

use tracing::warn;

use crate::assorted::ConstDiv;
use crate::config::constants::INTERIOR_FANOUT;
use crate::storage::array::log_types::{OverwriteLogRef, LOG_TYPE_ARRAY_OVERWRITE};
use crate::storage::array::page::ArrayPage;
use crate::storage::array::{ArrayOffset, ArrayStorage};
use crate::storage::partitioner::{BufferPosition, LogBufferRef, PartitionId};
use crate::storage::StorageId;
use crate::xct::Epoch;

#[derive(Clone)]
pub struct ArrayPartitioner {
    array_id: StorageId,
    /// A one-page array has no interior level and nothing to partition.
    array_single_page: bool,
    array_size: ArrayOffset,
    /// `bucket = offset / bucket_size`.
    bucket_size: ArrayOffset,
    bucket_size_div: ConstDiv,
    bucket_owners: [PartitionId; INTERIOR_FANOUT],
}

impl ArrayPartitioner {
    /// Captures ownership from `storage`'s root page and balances it
    /// across `num_partitions`.
    pub fn new(storage: &ArrayStorage, num_partitions: u16) -> Self {
        debug_assert!(num_partitions >= 1);
        let levels = storage.levels();
        let array_single_page = levels == 1;
        let bucket_size = if array_single_page {
            storage.records_per_leaf()
        } else {
            storage.offset_intervals()[(levels - 2) as usize]
        };

        let mut bucket_owners = [0 as PartitionId; INTERIOR_FANOUT];
        if !array_single_page {
            let root_pointer = storage.root_page_pointer().volatile_acquire();
            debug_assert!(!root_pointer.is_null());
            // SAFETY: the root page lives until the storage is released.
            let root = unsafe {
                ArrayPage::from_page_ptr(storage.resolver().resolve(root_pointer))
            };
            for (slot, owner) in bucket_owners.iter_mut().enumerate() {
                let child = root.interior_record(slot).volatile_acquire();
                *owner = if child.is_null() {
                    0
                } else {
                    child.numa_node()
                };
            }
            balance_bucket_owners(&mut bucket_owners, num_partitions, storage.id());
        }

        Self {
            array_id: storage.id(),
            array_single_page,
            array_size: storage.array_size(),
            bucket_size,
            bucket_size_div: ConstDiv::new(bucket_size),
            bucket_owners,
        }
    }

    pub fn storage_id(&self) -> StorageId {
        self.array_id
    }

    pub fn is_partitionable(&self) -> bool {
        !self.array_single_page
    }

    pub fn bucket_size(&self) -> ArrayOffset {
        self.bucket_size
    }

    pub fn bucket_owners(&self) -> &[PartitionId; INTERIOR_FANOUT] {
        &self.bucket_owners
    }

    pub fn describe(&self) -> String {
        format!(
            "ArrayPartitioner(storage={}, size={}, bucket_size={}, partitionable={})",
            self.array_id, self.array_size, self.bucket_size, !self.array_single_page
        )
    }

    pub fn partition_batch(
        &self,
        local_partition: PartitionId,
        log_buffer: &LogBufferRef<'_>,
        log_positions: &[BufferPosition],
        results: &mut [PartitionId],
    ) {
        debug_assert!(results.len() >= log_positions.len());
        if self.array_single_page {
            // Nothing to split; everything stays where it is.
            results[..log_positions.len()].fill(local_partition);
            return;
        }
        for (index, position) in log_positions.iter().enumerate() {
            let log = OverwriteLogRef::new(log_buffer.entry(*position));
            debug_assert_eq!(log.log_type(), LOG_TYPE_ARRAY_OVERWRITE);
            debug_assert_eq!(log.storage_id(), self.array_id);
            debug_assert!(log.offset() < self.array_size);
            let bucket = self.bucket_size_div.divide(log.offset()) as usize;
            debug_assert!(bucket < INTERIOR_FANOUT);
            results[index] = self.bucket_owners[bucket];
        }
    }

    pub fn sort_batch(
        &self,
        log_buffer: &LogBufferRef<'_>,
        log_positions: &[BufferPosition],
        base_epoch: Epoch,
        output_buffer: &mut [BufferPosition],
    ) -> u32 {
        debug_assert!(output_buffer.len() >= log_positions.len());

        let mut keyed: Vec<(ArrayOffset, u32, u32, BufferPosition)> = log_positions
            .iter()
            .map(|&position| {
                let log = OverwriteLogRef::new(log_buffer.entry(position));
                debug_assert_eq!(log.storage_id(), self.array_id);
                (
                    log.offset(),
                    log.epoch().wrapping_sub(base_epoch),
                    log.in_epoch_ordinal(),
                    position,
                )
            })
            .collect();
        // Stable: entries equal on the full key keep buffer order.
        keyed.sort_by_key(|&(offset, epoch_diff, ordinal, _)| (offset, epoch_diff, ordinal));

        for (index, &(_, _, _, position)) in keyed.iter().enumerate() {
            output_buffer[index] = position;
        }
        // Duplicates are not collapsed at this layer.
        log_positions.len() as u32
    }
}

/// Caps every partition at `floor(avg * 1.2)` buckets, handing the
/// excess (highest bucket index first) to the neediest partitions.
fn balance_bucket_owners(
    owners: &mut [PartitionId; INTERIOR_FANOUT],
    num_partitions: u16,
    storage_id: StorageId,
) {
    let partitions = num_partitions as usize;
    let average = INTERIOR_FANOUT as f64 / partitions as f64;
    let cap = (average * 1.2).floor() as usize;

    let mut counts = vec![0usize; partitions];
    for &owner in owners.iter() {
        debug_assert!((owner as usize) < partitions);
        counts[owner as usize] += 1;
    }

    for donor in 0..partitions {
        while counts[donor] > cap {
            // Fewest buckets first, ties to the lowest id.
            let receiver = (0..partitions)
                .min_by_key(|&p| (counts[p], p))
                .unwrap();
            if counts[receiver] + 1 > cap {
                // No partition can take more without itself going over.
                break;
            }
            // The donor's highest-index bucket moves.
            let bucket = owners
                .iter()
                .rposition(|&o| o as usize == donor)
                .unwrap();
            owners[bucket] = receiver as PartitionId;
            counts[donor] -= 1;
            counts[receiver] += 1;
        }
    }

    for (partition, &count) in counts.iter().enumerate() {
        if count == 0 {
            warn!(
                storage_id,
                partition, "partition received zero buckets; root has too few children"
            );
        }
    }
}
