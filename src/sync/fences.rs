//! # Standalone Memory Fences
//!
//! Thin, always-inline wrappers over [`std::sync::atomic::fence`] so that
//! ordering-sensitive code can name the ordering it needs at the exact
//! point it needs it, independent of any particular atomic variable.
//!
//! On TSO hardware (x86-64) the acquire/release/acq-rel flavors compile
//! to nothing but still pin the compiler: no load/store may be reordered
//! across them. `seq_cst` is the only one that costs a real instruction
//! there.
//!
//! Rust has no consume ordering; `memory_fence_consume` lowers to acquire,
//! which is strictly stronger.

use std::sync::atomic::{fence, Ordering};

/// Equivalent to `fence(Ordering::Acquire)`: prior writes made by the
/// releasing thread become visible to this thread.
#[inline(always)]
pub fn memory_fence_acquire() {
    fence(Ordering::Acquire);
}

/// Equivalent to `fence(Ordering::Release)`: this thread's prior writes
/// become visible to threads that acquire the same location.
#[inline(always)]
pub fn memory_fence_release() {
    fence(Ordering::Release);
}

/// Equivalent to `fence(Ordering::AcqRel)`.
#[inline(always)]
pub fn memory_fence_acq_rel() {
    fence(Ordering::AcqRel);
}

/// Consume ordering does not exist in Rust's memory model; this is an
/// acquire fence, which subsumes it.
#[inline(always)]
pub fn memory_fence_consume() {
    fence(Ordering::Acquire);
}

/// Equivalent to `fence(Ordering::SeqCst)`: acq-rel plus a single total
/// order observed identically by all threads.
#[inline(always)]
pub fn memory_fence_seq_cst() {
    fence(Ordering::SeqCst);
}
