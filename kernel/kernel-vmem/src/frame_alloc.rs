//! Physical frame supply.

use kernel_memory_addresses::PhysicalPage;

/// Source of 4 KiB physical frames.
///
/// The implementation decides where frames come from (boot-time memory
/// map, bitmap, free list). This subsystem pulls frames for page tables,
/// for demand commits and for explicit mappings, and returns them on
/// release.
///
/// Implementations must not touch lazily committed virtual memory from
/// inside these calls: the page-fault handler allocates the frame for a
/// first touch, and a nested fault at that point would have nothing left
/// to commit it with.
pub trait FrameAllocator {
    /// Hands out one unused frame, or `None` when physical memory is
    /// exhausted.
    fn allocate_frame(&mut self) -> Option<PhysicalPage>;

    /// Returns `frame` to the pool. The frame must have come from
    /// [`allocate_frame`](Self::allocate_frame) and must no longer be
    /// referenced by any page-map entry.
    fn free_frame(&mut self, frame: PhysicalPage);
}
