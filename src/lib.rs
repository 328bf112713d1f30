//! # tatamidb - NUMA-Aware In-Memory Transactional Storage Engine
//!
//! tatamidb is the core of an in-memory transactional storage engine for
//! multi-socket machines. Worker threads are pinned to cores, memory is
//! partitioned per NUMA node, and every data structure is laid out so that
//! the common path touches only socket-local memory. This Rust
//! implementation prioritizes:
//!
//! - **Socket locality**: one page pool per NUMA node, per-core caches of
//!   free-page offsets, locks that spin on core-local cache lines
//! - **Offset-based page identity**: pages are named by 32-bit offsets
//!   into their node's pool, never by raw addresses
//! - **Explicit lifecycle**: every long-lived component initializes and
//!   uninitializes in a deterministic order and reports errors instead of
//!   failing silently in destructors
//!
//! ## Architecture
//!
//! ```text
//! +--------------------------------------------------+
//! |                    Engine                        |
//! +--------------------------------------------------+
//! |  StorageManager  |  XctManager  |   ThreadPool   |
//! +------------------+--------------+----------------+
//! |        Array Storage (tree of fixed pages)       |
//! +--------------------------------------------------+
//! |   Xct (read/write/pointer sets) | ThreadLogBuffer|
//! +--------------------------------------------------+
//! |  NumaCoreMemory (offset chunk)  |  MCS locks     |
//! +--------------------------------------------------+
//! |     PagePool per node  |  Page resolvers         |
//! +--------------------------------------------------+
//! |     AlignedMemory (hugepage / NUMA-bound mmap)   |
//! +--------------------------------------------------+
//! ```
//!
//! ## Module Overview
//!
//! - [`memory`]: aligned regions, per-node page pools, offset resolvers,
//!   per-core free-page caches
//! - [`sync`]: memory fences, MCS queue locks, one-shot rendezvous
//! - [`thread`]: core-pinned workers, per-thread log buffers, thread pool
//! - [`xct`]: transaction state, read/write/pointer sets, epochs
//! - [`storage`]: page pointers, the array storage, partitioners
//! - [`engine`]: assembly and two-phase lifecycle of everything above
//!
//! ## Concurrency Model
//!
//! Parallel OS threads, each pinned to one core; no cooperative
//! scheduling. A thread runs one transaction to completion before starting
//! another. Blocking happens only at the pool lock (short, chunked
//! transfers), MCS local spins, rendezvous waits, and snapshot reads.

#[macro_use]
mod macros;

pub mod assorted;
pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod memory;
pub mod storage;
pub mod sync;
pub mod thread;
pub mod xct;

pub use engine::Engine;
pub use error::ErrorCode;
pub use lifecycle::{Initializable, UninitPolicy, UninitializeGuard};
