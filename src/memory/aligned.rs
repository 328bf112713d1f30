//! # Aligned Memory Regions
//!
//! Large, contiguous, zero-initialized allocations with explicit
//! alignment and NUMA placement. Page-pool regions, log buffers and other
//! long-lived slabs all come from here; nothing in the engine calls the
//! global allocator for page memory.
//!
//! ## Allocation Kinds
//!
//! - `Aligned`: heap allocation through `std::alloc` with an explicit
//!   alignment. For modest buffers and tests.
//! - `Hugepage`: anonymous mapping requesting huge pages. Falls back to
//!   normal pages with a warning when the kernel refuses (no hugepages
//!   reserved, unsupported platform), because a slow start beats a failed
//!   one.
//! - `NumaLocal`: anonymous mapping bound to one node via `mbind`.
//! - `NumaInterleave`: anonymous mapping interleaved across nodes.
//!
//! NUMA binding is advisory: on kernels without NUMA support the binding
//! is skipped with a debug log and the mapping still succeeds.
//!
//! ## Ownership
//!
//! A region is freed by `Drop` through the same allocator family that
//! produced it. Moving an `AlignedMemory` transfers ownership; the
//! explicit [`release`](AlignedMemory::release) empties it in place, and
//! an empty region reports a null block pointer.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

use memmap2::MmapMut;
use tracing::{debug, warn};

use crate::error::ErrorCode;
use crate::memory::NumaNodeId;

/// The OS page size assumed for mmap-family alignment checks.
const OS_PAGE_SIZE: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationKind {
    /// `std::alloc` with explicit alignment.
    Aligned,
    /// Anonymous mapping, huge pages requested.
    Hugepage,
    /// Anonymous mapping bound to the hinted node.
    NumaLocal,
    /// Anonymous mapping interleaved across all nodes.
    NumaInterleave,
}

enum Backing {
    Heap { ptr: NonNull<u8>, layout: Layout },
    Mmap { map: MmapMut, align_offset: usize },
}

/// An owned, aligned, zeroed region of memory.
pub struct AlignedMemory {
    backing: Option<Backing>,
    size: usize,
    alignment: usize,
    kind: AllocationKind,
    node: NumaNodeId,
}

// SAFETY: the region is plain memory owned by this struct; all concurrent
// access to its bytes is coordinated by the components built on top
// (page pool queue under its mutex, page bodies by offset ownership).
unsafe impl Send for AlignedMemory {}
unsafe impl Sync for AlignedMemory {}

impl AlignedMemory {
    /// An empty region: null block, zero size. The state a moved-from or
    /// released region ends in.
    pub fn empty() -> Self {
        Self {
            backing: None,
            size: 0,
            alignment: 0,
            kind: AllocationKind::Aligned,
            node: 0,
        }
    }

    /// Allocates `size` bytes aligned to `alignment`, zero-initialized.
    ///
    /// `alignment` must be a nonzero power of two; the mmap-family kinds
    /// additionally require it to be at least the OS page size.
    pub fn allocate(
        size: usize,
        alignment: usize,
        kind: AllocationKind,
        node: NumaNodeId,
    ) -> Result<Self, ErrorCode> {
        if size == 0 {
            return Ok(Self::empty());
        }
        if alignment == 0 || !alignment.is_power_of_two() {
            return Err(ErrorCode::BadAlignment);
        }

        let backing = match kind {
            AllocationKind::Aligned => {
                let layout =
                    Layout::from_size_align(size, alignment).map_err(|_| ErrorCode::BadAlignment)?;
                // SAFETY: layout has nonzero size, checked above.
                let raw = unsafe { alloc_zeroed(layout) };
                let ptr = NonNull::new(raw).ok_or(ErrorCode::OutOfMemory)?;
                Backing::Heap { ptr, layout }
            }
            AllocationKind::Hugepage | AllocationKind::NumaLocal | AllocationKind::NumaInterleave => {
                if alignment < OS_PAGE_SIZE {
                    return Err(ErrorCode::BadAlignment);
                }
                // Over-map so any alignment above the OS page size can be
                // satisfied by offsetting into the mapping.
                let slack = alignment - OS_PAGE_SIZE;
                let map = Self::map_anonymous(size + slack, kind)?;
                let base = map.as_ptr() as usize;
                let align_offset = base.next_multiple_of(alignment) - base;
                debug_assert!(align_offset <= slack);

                let backing = Backing::Mmap { map, align_offset };
                Self::apply_numa_policy(&backing, size, kind, node);
                backing
            }
        };

        Ok(Self {
            backing: Some(backing),
            size,
            alignment,
            kind,
            node,
        })
    }

    fn map_anonymous(len: usize, kind: AllocationKind) -> Result<MmapMut, ErrorCode> {
        #[cfg(target_os = "linux")]
        if kind == AllocationKind::Hugepage {
            let mut options = memmap2::MmapOptions::new();
            options.len(len).huge(None);
            match options.map_anon() {
                Ok(map) => return Ok(map),
                Err(error) => {
                    warn!(
                        len,
                        %error,
                        "hugepage mapping refused; falling back to normal pages"
                    );
                }
            }
        }
        let _ = kind;
        memmap2::MmapOptions::new()
            .len(len)
            .map_anon()
            .map_err(|_| ErrorCode::OutOfMemory)
    }

    #[cfg(target_os = "linux")]
    fn apply_numa_policy(backing: &Backing, size: usize, kind: AllocationKind, node: NumaNodeId) {
        const MPOL_BIND: libc::c_int = 2;
        const MPOL_INTERLEAVE: libc::c_int = 3;

        let (mode, nodemask): (libc::c_int, libc::c_ulong) = match kind {
            AllocationKind::NumaLocal => (MPOL_BIND, 1 << node),
            AllocationKind::NumaInterleave => (MPOL_INTERLEAVE, libc::c_ulong::MAX),
            _ => return,
        };
        let Backing::Mmap { map, align_offset } = backing else {
            return;
        };
        let addr = unsafe { map.as_ptr().add(*align_offset) } as *mut libc::c_void;
        // SAFETY: addr/size lie within our own anonymous mapping.
        let rc = unsafe {
            libc::syscall(
                libc::SYS_mbind,
                addr,
                size as libc::c_ulong,
                mode,
                &nodemask as *const libc::c_ulong,
                (8 * std::mem::size_of::<libc::c_ulong>()) as libc::c_ulong,
                0u32,
            )
        };
        if rc != 0 {
            debug!(node, ?kind, "mbind unavailable; leaving default placement");
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn apply_numa_policy(_backing: &Backing, _size: usize, kind: AllocationKind, node: NumaNodeId) {
        debug!(node, ?kind, "NUMA binding is a no-op on this platform");
    }

    /// Start of the region, or null when empty.
    pub fn block(&self) -> *mut u8 {
        match &self.backing {
            None => std::ptr::null_mut(),
            Some(Backing::Heap { ptr, .. }) => ptr.as_ptr(),
            Some(Backing::Mmap { map, align_offset }) => {
                // Mutation goes through raw pointers handed out here; the
                // map itself is never borrowed mutably.
                unsafe { map.as_ptr().add(*align_offset) as *mut u8 }
            }
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn alignment(&self) -> usize {
        self.alignment
    }

    pub fn kind(&self) -> AllocationKind {
        self.kind
    }

    pub fn numa_node(&self) -> NumaNodeId {
        self.node
    }

    pub fn is_null(&self) -> bool {
        self.backing.is_none()
    }

    /// Frees the region now and leaves this value empty. Equivalent to
    /// dropping, but explicit for lifecycle code that wants to name the
    /// moment.
    pub fn release(&mut self) {
        if let Some(Backing::Heap { ptr, layout }) = self.backing.take() {
            // SAFETY: ptr/layout came from alloc_zeroed with this layout.
            unsafe { dealloc(ptr.as_ptr(), layout) };
        }
        // Mmap backing unmaps on drop of the take()n value.
        self.size = 0;
        self.alignment = 0;
    }
}

impl Drop for AlignedMemory {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for AlignedMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlignedMemory")
            .field("size", &self.size)
            .field("alignment", &self.alignment)
            .field("kind", &self.kind)
            .field("node", &self.node)
            .field("null", &self.is_null())
            .finish()
    }
}
