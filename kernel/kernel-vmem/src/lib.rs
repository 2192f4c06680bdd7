//! # Virtual Memory
//!
//! Two-level x86 paging with demand-committed reservations.
//!
//! ## What you get
//!
//! - A [`PageMapEntry`] describing one slot of a page directory or page
//!   table, and the [`MapFlags`] callers request mappings with.
//! - The recursive [`window`] that makes the active hierarchy addressable
//!   without scratch mappings.
//! - [`VirtualMemory`]: reservations, releases, demand commits, fresh
//!   address spaces and kernel-image hardening, over an [`Mmu`] and a
//!   [`FrameAllocator`] supplied by the caller.
//! - A page-fault entry point ([`page_fault_entry`]) and the one-time
//!   handler registration ([`install`]).
//!
//! ## Reservation lifecycle
//!
//! Virtual pages move through three states, tracked entirely in their
//! page-map entry:
//!
//! ```text
//!             reserve                    first touch (page fault)
//! unused ───────────────► reserved ───────────────────────────► committed
//!    ▲                    allocated=1, present=0                allocated=1,
//!    │                    no frame assigned                     present=1, frame
//!    └────────────────────────┴───────────────────────────────────┘
//!                           release
//! ```
//!
//! A reservation costs no physical memory. The first access through it
//! faults; the handler recognizes the `allocated`-but-not-`present`
//! entry, commits a frame and returns, and the faulting instruction
//! restarts against a live translation. Faults that match no
//! reservation are unrecoverable and halt the kernel with a diagnostic
//! dump.
//!
//! ## Locking
//!
//! Two spin locks with a fixed order protect the subsystem:
//!
//! | Lock     | Guards                          | Taken by                      |
//! |:---------|:--------------------------------|:------------------------------|
//! | `tables` | every page-map mutation         | mapping calls, never faults   |
//! | `frames` | the frame allocator             | mapping calls (inside `tables`), the fault path |
//!
//! Both are acquired with interrupts masked. The fault path never takes
//! `tables`: its only map write is a single aligned store to an entry in
//! the reserved state, which no mapping call touches concurrently other
//! than to release it, and releasing memory that is still being faulted
//! on is a caller bug no lock could repair.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod address_space;
mod entry;
mod fault;
mod frame_alloc;
mod hardening;
mod mapping;
mod mmu;
pub mod window;

#[cfg(test)]
mod sim;

pub use crate::entry::{MapFlags, PAGE_MAP_LEN, PageMap, PageMapEntry};
pub use crate::fault::{
    FaultCode, FaultContext, InstallError, PageFaultHandler, install, page_fault_entry,
};
pub use crate::frame_alloc::FrameAllocator;
pub use crate::hardening::KernelImage;
pub use crate::mapping::MapError;
#[cfg(target_arch = "x86")]
pub use crate::mmu::KernelMmu;
pub use crate::mmu::Mmu;

use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_sync::SpinLock;

/// The virtual-memory subsystem.
///
/// One instance manages the machine's paging state for the lifetime of
/// the kernel. It owns the frame allocator `A` and drives the paging
/// hardware through `M`; see the [crate docs](crate) for the lifecycle
/// and locking rules.
pub struct VirtualMemory<M, A> {
    mmu: M,

    /// Serializes all page-map mutations. The guarded data lives in the
    /// map frames behind the window, not in this cell.
    tables: SpinLock<()>,

    /// The frame source. Separate from `tables` so the fault path can
    /// commit frames without contending for the mapping lock; when both
    /// are held, `tables` is acquired first.
    frames: SpinLock<A>,

    image: KernelImage,
}

impl<M, A> VirtualMemory<M, A>
where
    M: Mmu,
    A: FrameAllocator,
{
    /// Creates the subsystem over a paging hardware handle, a frame
    /// allocator and the kernel image layout.
    ///
    /// The boot path builds exactly one of these, registers it with
    /// [`install`] and then calls [`harden`](Self::harden).
    pub const fn new(mmu: M, frames: A, image: KernelImage) -> Self {
        Self {
            mmu,
            tables: SpinLock::new(()),
            frames: SpinLock::new(frames),
            image,
        }
    }

    /// The page-map entry translating `address` at `level`, or `None`
    /// when a level above it is not present and the entry thus does not
    /// exist.
    ///
    /// Read-only inspection: no locks are taken and nothing is written.
    ///
    /// # Panics
    ///
    /// Panics if `level >= PAGE_MAP_LEVELS`.
    #[must_use]
    pub fn entry(&self, address: VirtualAddress, level: usize) -> Option<PageMapEntry> {
        let mut current = window::PAGE_MAP_LEVELS - 1;
        while current > level {
            let above = unsafe { self.mmu.read_entry(window::entry_address(address, current)) };
            if !above.present() {
                return None;
            }
            current -= 1;
        }
        Some(unsafe { self.mmu.read_entry(window::entry_address(address, level)) })
    }

    /// Resolves `address` to the physical address it currently maps to,
    /// or `None` if the translation is absent or not yet committed.
    #[must_use]
    pub fn translate(&self, address: VirtualAddress) -> Option<PhysicalAddress> {
        let leaf = self.entry(address, 0)?;
        if !leaf.present() {
            return None;
        }
        Some(PhysicalAddress::new(
            leaf.frame().base().as_u32() | address.offset_in_page(),
        ))
    }
}
