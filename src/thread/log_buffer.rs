//! # Per-Thread Log Buffer
//!
//! Every worker owns a private buffer where its transactions build redo
//! log entries. Reservation is a bump of a single offset: no lock, no
//! allocation, because only the owning thread ever touches its buffer.
//!
//! In the full engine a log writer drains the buffer to durable storage
//! behind an epoch watermark; in this core the buffer is reset at every
//! transaction begin, which is all the commit-free slice needs. Entries
//! are 8-byte aligned so zerocopy views of their headers are always
//! well-placed.

use crate::error::ErrorCode;
use crate::memory::aligned::{AlignedMemory, AllocationKind};

/// Byte position of a log entry within its thread's buffer.
pub type LogPosition = u32;

pub struct ThreadLogBuffer {
    memory: AlignedMemory,
    capacity: usize,
    written: usize,
}

impl ThreadLogBuffer {
    pub fn new(capacity: usize) -> Result<Self, ErrorCode> {
        debug_assert!(capacity % 8 == 0);
        let memory = AlignedMemory::allocate(capacity, 4096, AllocationKind::Aligned, 0)?;
        Ok(Self {
            memory,
            capacity,
            written: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn written(&self) -> usize {
        self.written
    }

    /// Discards everything; called at transaction begin.
    pub fn reset(&mut self) {
        self.written = 0;
    }

    /// Reserves `length` bytes (8-byte aligned) and returns the entry's
    /// position.
    pub fn reserve_new_log(&mut self, length: u16) -> Result<LogPosition, ErrorCode> {
        debug_assert!(length as usize % 8 == 0);
        if self.written + length as usize > self.capacity {
            return Err(ErrorCode::LogBufferFull);
        }
        let position = self.written as LogPosition;
        self.written += length as usize;
        Ok(position)
    }

    /// The reserved entry at `position`, for population.
    pub fn log_mut(&mut self, position: LogPosition, length: u16) -> &mut [u8] {
        debug_assert!(position as usize + length as usize <= self.written);
        // SAFETY: within the owned region; only the owning thread holds
        // references into the buffer.
        unsafe {
            std::slice::from_raw_parts_mut(
                self.memory.block().add(position as usize),
                length as usize,
            )
        }
    }

    /// Read view of the entry at `position`.
    pub fn log(&self, position: LogPosition, length: u16) -> &[u8] {
        debug_assert!(position as usize + length as usize <= self.written);
        // SAFETY: within the owned region.
        unsafe {
            std::slice::from_raw_parts(self.memory.block().add(position as usize), length as usize)
        }
    }

    /// Everything written so far, in order. Input to the partitioner's
    /// batch interfaces.
    pub fn as_bytes(&self) -> &[u8] {
        // SAFETY: within the owned region.
        unsafe { std::slice::from_raw_parts(self.memory.block(), self.written) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserve_bumps_positions() {
        let mut buffer = ThreadLogBuffer::new(4096).unwrap();
        assert_eq!(buffer.reserve_new_log(32).unwrap(), 0);
        assert_eq!(buffer.reserve_new_log(48).unwrap(), 32);
        assert_eq!(buffer.written(), 80);
    }

    #[test]
    fn full_buffer_is_reported() {
        let mut buffer = ThreadLogBuffer::new(64).unwrap();
        buffer.reserve_new_log(40).unwrap();
        assert_eq!(buffer.reserve_new_log(32), Err(ErrorCode::LogBufferFull));
        // A smaller entry still fits.
        assert_eq!(buffer.reserve_new_log(24).unwrap(), 40);
    }

    #[test]
    fn reset_reclaims_everything() {
        let mut buffer = ThreadLogBuffer::new(64).unwrap();
        buffer.reserve_new_log(64).unwrap();
        buffer.reset();
        assert_eq!(buffer.written(), 0);
        assert_eq!(buffer.reserve_new_log(64).unwrap(), 0);
    }

    #[test]
    fn written_bytes_round_trip() {
        let mut buffer = ThreadLogBuffer::new(4096).unwrap();
        let position = buffer.reserve_new_log(16).unwrap();
        buffer.log_mut(position, 16).copy_from_slice(&[7u8; 16]);
        assert_eq!(buffer.log(position, 16), &[7u8; 16]);
        assert_eq!(&buffer.as_bytes()[..16], &[7u8; 16]);
    }
}
