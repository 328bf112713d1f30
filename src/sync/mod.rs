//! # Synchronization Primitives
//!
//! The engine's cross-thread coordination toolkit:
//!
//! - `fences`: standalone memory fences, inlinable and free on TSO
//!   hardware
//! - `mcs`: queue locks where each waiter spins on its own cache line,
//!   with lock blocks drawn from per-thread arenas
//! - `rendezvous`: one-shot events for startup/shutdown gating, usable
//!   from any thread
//!
//! None of these primitives allocate after construction; MCS blocks live
//! in a fixed table sized at engine initialize so that a remote thread can
//! reach its successor's spin flag without any shared heap state.

pub mod fences;
pub mod mcs;
pub mod rendezvous;

pub use fences::{
    memory_fence_acq_rel, memory_fence_acquire, memory_fence_consume, memory_fence_release,
    memory_fence_seq_cst,
};
pub use mcs::{McsBlockIndex, McsBlockStorage, McsLock, McsLockContext};
pub use rendezvous::SharedRendezvous;
