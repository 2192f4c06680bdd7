//! MMU access behind a narrow seam.
//!
//! Everything the mapping layers do to the hardware goes through [`Mmu`]:
//! single-entry loads and stores at window addresses, TLB invalidation
//! and root switches. [`KernelMmu`] is the real thing; host-side tests
//! substitute a simulated machine that decodes window addresses the same
//! way the hardware walk does.

use kernel_memory_addresses::{PhysicalPage, VirtualAddress, VirtualPage};

use crate::entry::{PageMap, PageMapEntry};

/// Paging hardware as seen from ring 0.
pub trait Mmu {
    /// Loads the page-map entry at window address `at`.
    ///
    /// # Safety
    ///
    /// `at` must come from [`entry_address`](crate::window::entry_address)
    /// and every map level above the entry must be present, otherwise the
    /// load itself faults.
    unsafe fn read_entry(&self, at: VirtualAddress) -> PageMapEntry;

    /// Stores `entry` at window address `at` as one aligned 32-bit write.
    ///
    /// The hardware may walk the maps concurrently, so the store must be
    /// a single word, never a read-modify-write of parts.
    ///
    /// # Safety
    ///
    /// Same addressing requirements as [`read_entry`](Self::read_entry).
    /// The caller is changing live translations and is responsible for
    /// the invalidations that follow.
    unsafe fn write_entry(&self, at: VirtualAddress, entry: PageMapEntry);

    /// Drops any cached translation for `page` from the TLB.
    fn invalidate(&self, page: VirtualPage);

    /// The frame holding the top-level map of the active address space.
    fn active_root(&self) -> PhysicalPage;

    /// Makes `root` the active top-level map. Loading the root also drops
    /// every cached non-global translation.
    ///
    /// # Safety
    ///
    /// `root` must hold a valid top-level map whose kernel region covers
    /// the currently executing code and stack.
    unsafe fn load_root(&self, root: PhysicalPage);

    /// Borrows the frame `frame` as a page map.
    ///
    /// The window only reaches maps of the *active* hierarchy; this is
    /// the escape hatch for maps that are not installed anywhere yet.
    ///
    /// # Safety
    ///
    /// `frame` must be accessible to the kernel outside the hierarchy it
    /// will join, must not be reachable through `&` references elsewhere,
    /// and the returned borrow must end before the map goes live.
    unsafe fn page_map_at<'a>(&self, frame: PhysicalPage) -> &'a mut PageMap;
}

impl<M: Mmu + ?Sized> Mmu for &M {
    unsafe fn read_entry(&self, at: VirtualAddress) -> PageMapEntry {
        unsafe { M::read_entry(self, at) }
    }

    unsafe fn write_entry(&self, at: VirtualAddress, entry: PageMapEntry) {
        unsafe { M::write_entry(self, at, entry) }
    }

    fn invalidate(&self, page: VirtualPage) {
        M::invalidate(self, page);
    }

    fn active_root(&self) -> PhysicalPage {
        M::active_root(self)
    }

    unsafe fn load_root(&self, root: PhysicalPage) {
        unsafe { M::load_root(self, root) }
    }

    unsafe fn page_map_at<'a>(&self, frame: PhysicalPage) -> &'a mut PageMap {
        unsafe { M::page_map_at(self, frame) }
    }
}

/// The memory-management unit of the processor this kernel runs on.
#[cfg(target_arch = "x86")]
#[derive(Debug, Default, Copy, Clone)]
pub struct KernelMmu;

#[cfg(target_arch = "x86")]
impl Mmu for KernelMmu {
    unsafe fn read_entry(&self, at: VirtualAddress) -> PageMapEntry {
        let bits = unsafe { core::ptr::read_volatile(at.as_u32() as *const u32) };
        PageMapEntry::from_bits(bits)
    }

    unsafe fn write_entry(&self, at: VirtualAddress, entry: PageMapEntry) {
        unsafe { core::ptr::write_volatile(at.as_u32() as *mut u32, entry.into_bits()) };
    }

    fn invalidate(&self, page: VirtualPage) {
        unsafe {
            core::arch::asm!(
                "invlpg [{0}]",
                in(reg) page.base().as_u32(),
                options(nostack, preserves_flags)
            );
        }
    }

    fn active_root(&self) -> PhysicalPage {
        let cr3: u32;
        unsafe {
            core::arch::asm!(
                "mov {0}, cr3",
                out(reg) cr3,
                options(nomem, nostack, preserves_flags)
            );
        }
        // CR3 carries cache-control bits below the frame number.
        kernel_memory_addresses::PhysicalAddress::new(cr3).frame()
    }

    unsafe fn load_root(&self, root: PhysicalPage) {
        unsafe {
            core::arch::asm!(
                "mov cr3, {0}",
                in(reg) root.base().as_u32(),
                options(nostack, preserves_flags)
            );
        }
    }

    unsafe fn page_map_at<'a>(&self, frame: PhysicalPage) -> &'a mut PageMap {
        let base = frame.base().as_u32();
        // Map frames come from the pool the boot map exposes behind the
        // kernel offset; anything else is unreachable from here.
        debug_assert!(
            base < kernel_info::memory::PAGE_MAP_WINDOW - kernel_info::memory::KERNEL_OFFSET,
            "page-map frame {frame} lies outside the boot-mapped region"
        );
        unsafe { &mut *((base + kernel_info::memory::KERNEL_OFFSET) as *mut PageMap) }
    }
}
