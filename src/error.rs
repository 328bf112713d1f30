//! # Error Codes and Batched Aggregation
//!
//! Two error channels coexist in the engine:
//!
//! - Heavyweight, rarely-failing paths (engine assembly, storage creation,
//!   lifecycle transitions) return `eyre::Result` and attach context as
//!   the error climbs out, forming a source-site chain.
//! - Hot paths (record access, pool grab/release, pointer following)
//!   return a bare [`ErrorCode`] so the failure costs one integer, no
//!   allocation.
//!
//! An `ErrorCode` converts into an `eyre::Report` at the boundary where a
//! hot path surfaces into a heavyweight one, so `?` works across the seam.
//!
//! ## Stable Codes
//!
//! The numeric values are part of the engine's external contract (they
//! appear in logs and cross-process status words) and must never be
//! renumbered.
//!
//! ## Batched Aggregation
//!
//! Uninitialization must keep going when one component fails so that the
//! rest still release their resources. [`ErrorBatch`] collects every
//! failure and summarizes them into a single report at the end.

use thiserror::Error;

/// Stable, integer-valued error codes for hot-path operations.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ErrorCode {
    #[error("storage with this id already exists")]
    StrAlreadyExists = 1,
    #[error("functionality not implemented in this slice")]
    NotImplemented = 2,
    #[error("memory allocation failed")]
    OutOfMemory = 3,
    #[error("page pool has no free pages")]
    NoFreePages = 4,
    #[error("transaction read set is full")]
    ReadSetOverflow = 5,
    #[error("transaction write set is full")]
    WriteSetOverflow = 6,
    #[error("thread log buffer is full")]
    LogBufferFull = 7,
    #[error("snapshot page read failed")]
    SnapshotReadFailed = 8,
    #[error("bad alignment for aligned allocation")]
    BadAlignment = 9,
    #[error("transaction pointer set is full")]
    PointerSetOverflow = 10,
    #[error("thread exhausted its MCS lock blocks")]
    TooManyMcsBlocks = 11,
    #[error("invalid engine options")]
    InvalidOptions = 12,
}

impl ErrorCode {
    /// The stable numeric value of this code.
    #[inline]
    pub fn value(self) -> u16 {
        self as u16
    }
}

/// Collects errors from a multi-step teardown and summarizes them into one
/// result. Components later in the teardown run regardless of earlier
/// failures.
#[derive(Debug, Default)]
pub struct ErrorBatch {
    errors: Vec<eyre::Report>,
}

impl ErrorBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the error of `result`, if any, and keeps going.
    pub fn push_result<T>(&mut self, result: eyre::Result<T>) {
        if let Err(report) = result {
            self.errors.push(report);
        }
    }

    pub fn push(&mut self, report: eyre::Report) {
        self.errors.push(report);
    }

    pub fn is_error(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Consumes the batch. Ok if nothing was recorded, otherwise a single
    /// report naming `context` and listing every collected failure.
    pub fn summarize(self, context: &str) -> eyre::Result<()> {
        if self.errors.is_empty() {
            return Ok(());
        }
        let mut message = format!("{}: {} error(s)", context, self.errors.len());
        for (idx, error) in self.errors.iter().enumerate() {
            message.push_str(&format!("\n  [{}] {:#}", idx, error));
        }
        Err(eyre::eyre!(message))
    }
}
