//! # Memory Management
//!
//! This module provides the hierarchical memory substrate of the engine.
//! All page memory is carved out of a few large aligned regions mapped at
//! engine initialize, one per NUMA node, and never resized afterwards.
//!
//! ## Hierarchy
//!
//! ```text
//! +---------------------------------------------------+
//! |                  EngineMemory                      |
//! |   one PagePool per NUMA node + MCS block table     |
//! +---------------------------------------------------+
//! |  PagePool (node 0)  |  PagePool (node 1)  |  ...   |
//! |  circular free queue of u32 offsets, one mutex     |
//! +---------------------------------------------------+
//! |  NumaCoreMemory (one per worker thread)            |
//! |  chunk of cached offsets, batched grab/release     |
//! +---------------------------------------------------+
//! ```
//!
//! Threads never take single pages from the pool: they pull and push
//! *chunks* of offsets (hundreds at a time) through their own
//! `NumaCoreMemory`, so the pool mutex is held rarely and briefly.
//!
//! ## Page Identity
//!
//! Pages are identified by `(node, offset)` where `offset` is a u32 index
//! into that node's pool region. Offset 0 is reserved as null: the first
//! pages of every region are spent on the free queue itself, so no data
//! page can ever sit at offset 0. Raw addresses exist only transiently,
//! produced by a [`resolver::LocalPageResolver`] at the point of access.
//!
//! ## Module Organization
//!
//! - `aligned`: hugepage-capable, NUMA-bindable contiguous regions
//! - `page_pool`: per-node pool with the circular free queue
//! - `resolver`: offset-to-pointer translation, local and global
//! - `core_memory`: per-core cached offsets backing the pool
//! - `engine_memory`: assembly of the above, one level below the engine

pub mod aligned;
pub mod core_memory;
pub mod engine_memory;
pub mod page_pool;
pub mod resolver;

pub use aligned::{AlignedMemory, AllocationKind};
pub use core_memory::NumaCoreMemory;
pub use engine_memory::EngineMemory;
pub use page_pool::{PagePool, PagePoolOffset, PagePoolOffsetChunk};
pub use resolver::{GlobalVolatilePageResolver, LocalPageResolver};

/// Identifier of one NUMA node (= one thread group).
pub type NumaNodeId = u8;
