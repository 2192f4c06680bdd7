//! Locking down mappings the boot path left permissive.
//!
//! Early boot maps the kernel image with a broad brush: everything
//! writable, and the first directory slot still holding the identity
//! mapping that got paging off the ground. Once the subsystem is up,
//! [`VirtualMemory::harden`] revokes both: the zero slot is cleared so
//! null-page traffic faults, and the text and read-only-data spans lose
//! their write permission.

use kernel_memory_addresses::VirtualAddress;
use log::info;

use crate::VirtualMemory;
use crate::entry::PageMapEntry;
use crate::frame_alloc::FrameAllocator;
use crate::mmu::Mmu;
use crate::window;

/// Where the kernel's code and read-only data lie in virtual memory.
///
/// The bounds come from linker symbols. Start addresses round down to
/// their page; end addresses are exclusive, the way section bounds are
/// emitted.
#[derive(Debug, Copy, Clone)]
pub struct KernelImage {
    text_start: VirtualAddress,
    text_end: VirtualAddress,
    rodata_start: VirtualAddress,
    rodata_end: VirtualAddress,
}

impl KernelImage {
    /// Describes an image with code in `text_start..text_end` and
    /// read-only data in `rodata_start..rodata_end`.
    ///
    /// # Panics
    ///
    /// Panics if either span has its end before its start.
    #[must_use]
    pub const fn new(
        text_start: VirtualAddress,
        text_end: VirtualAddress,
        rodata_start: VirtualAddress,
        rodata_end: VirtualAddress,
    ) -> Self {
        assert!(text_start.as_u32() <= text_end.as_u32());
        assert!(rodata_start.as_u32() <= rodata_end.as_u32());
        Self {
            text_start,
            text_end,
            rodata_start,
            rodata_end,
        }
    }
}

impl<M, A> VirtualMemory<M, A>
where
    M: Mmu,
    A: FrameAllocator,
{
    /// Revokes the boot-time mappings the running kernel must not keep:
    /// clears the first directory slot and write-protects the image
    /// spans, then reloads the root to drop every stale translation at
    /// once.
    ///
    /// Requires the image spans to be mapped, which the boot path
    /// guarantees. Safe to run again; a second pass changes nothing.
    pub fn harden(&self) {
        let _tables = self.tables.lock_irq();

        // Anything reaching the null page must fault, stray kernel
        // pointers included; the whole first slot goes away.
        let zero_slot = window::entry_address(VirtualAddress::zero(), 1);
        unsafe { self.mmu.write_entry(zero_slot, PageMapEntry::new()) };

        self.write_protect(self.image.text_start, self.image.text_end);
        self.write_protect(self.image.rodata_start, self.image.rodata_end);

        // One root reload instead of an invalidation per touched page.
        unsafe { self.mmu.load_root(self.mmu.active_root()) };

        info!(
            "kernel image hardened: text {}..{}, rodata {}..{}",
            self.image.text_start,
            self.image.text_end,
            self.image.rodata_start,
            self.image.rodata_end
        );
    }

    /// Clears the writable bit on every leaf entry from `start` up to,
    /// not including, `end`. TLB cleanup is the caller's business.
    fn write_protect(&self, start: VirtualAddress, end: VirtualAddress) {
        let mut page = start.page();
        while page.base().as_u32() < end.as_u32() {
            let at = window::entry_address(page.base(), 0);
            let entry = unsafe { self.mmu.read_entry(at) };
            unsafe { self.mmu.write_entry(at, entry.with_writable(false)) };
            let Some(next) = page.checked_next() else {
                break;
            };
            page = next;
        }
    }
}
