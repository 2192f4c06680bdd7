//! Page-map entries and the caller-facing mapping flags.
//!
//! Both levels of the two-level hierarchy use the same 32-bit entry layout:
//!
//! ```text
//! | 31 ‒ 12      | 11 ‒ 10 | 9         | 8 ‒ 0          |
//! | frame number | spare   | allocated | hardware flags |
//! ```
//!
//! Bits 8‒0 are interpreted by the MMU. Bits 11‒9 are ignored by the
//! hardware and available to the OS; bit 9 carries the *allocated* marker
//! that drives demand paging (see [`PageMapEntry::allocated`]).

use bitfield_struct::bitfield;
use kernel_memory_addresses::PhysicalPage;

/// Number of entries in one page-map frame, at either level.
pub const PAGE_MAP_LEN: usize = 1024;

/// One entry of a page directory (level 1) or page table (level 0).
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct PageMapEntry {
    /// Translation is live. An access through a non-present entry faults.
    pub present: bool,

    /// Writes are permitted. Reads are always permitted when present.
    pub writable: bool,

    /// Ring 3 may access the page. Cleared for kernel-only mappings.
    pub user_access: bool,

    /// Write-through caching. Writes propagate to memory immediately.
    pub write_through: bool,

    /// Caching disabled. Used for memory-mapped device regions.
    pub cache_disabled: bool,

    /// Set by the processor on any access through this entry.
    pub accessed: bool,

    /// Set by the processor on the first write through this entry.
    /// Only meaningful in leaf entries.
    pub dirty: bool,

    /// Large-page select in directory entries. This subsystem maps 4 KiB
    /// pages exclusively, so the bit stays clear.
    pub large_page: bool,

    /// Translation survives an address-space switch (with CR4.PGE).
    pub global_translation: bool,

    /// Software reservation marker, held in an OS-available bit.
    ///
    /// An entry with `allocated` set and `present` clear describes a page
    /// that has been promised to its owner but not yet backed by a frame.
    /// The first touch traps to the page-fault handler, which commits a
    /// frame and sets `present`. The hardware never reads this bit.
    pub allocated: bool,

    #[bits(2)]
    __: u8,

    /// Frame number of the referenced frame (address bits 31‒12).
    #[bits(20)]
    frame_number: u32,
}

impl PageMapEntry {
    /// The physical frame this entry refers to.
    ///
    /// For a directory entry that is the next-level table frame; for a
    /// table entry it is the mapped data frame. Only meaningful while
    /// [`present`](Self::present) is set.
    #[must_use]
    pub const fn frame(self) -> PhysicalPage {
        PhysicalPage::from_number(self.frame_number())
    }

    /// Returns a copy of the entry pointing at `frame`.
    #[must_use]
    pub const fn with_frame(self, frame: PhysicalPage) -> Self {
        self.with_frame_number(frame.number())
    }

    /// Points the entry at `frame`, leaving all flag bits untouched.
    pub fn set_frame(&mut self, frame: PhysicalPage) {
        self.set_frame_number(frame.number());
    }

    /// `true` when no reservation and no mapping exists here.
    #[must_use]
    pub const fn is_unused(self) -> bool {
        self.into_bits() == 0
    }

    /// `true` for a reservation that still awaits its first touch.
    #[must_use]
    pub const fn is_reserved_uncommitted(self) -> bool {
        self.allocated() && !self.present()
    }
}

bitflags::bitflags! {
    /// Mapping attributes callers may request for a page.
    ///
    /// The numeric values coincide with the corresponding [`PageMapEntry`]
    /// bits, so applying flags to an entry is a plain bitwise OR. The set
    /// excludes `present`, `allocated` and the frame number: those
    /// describe mapping *state* and only this subsystem writes them.
    #[derive(Copy, Clone, PartialEq, Eq, Debug)]
    pub struct MapFlags: u32 {
        /// Permit writes to the page.
        const WRITABLE = 1 << 1;

        /// Permit ring-3 access. Rejected for pages in the kernel region.
        const USER_ACCESS = 1 << 2;

        /// Write-through caching for the page.
        const WRITE_THROUGH = 1 << 3;

        /// Bypass the cache entirely, for device memory.
        const CACHE_DISABLED = 1 << 4;

        /// Keep the translation across address-space switches.
        const GLOBAL = 1 << 8;
    }
}

impl MapFlags {
    /// The flag bits as an entry with no state bits set.
    #[must_use]
    pub const fn entry(self) -> PageMapEntry {
        PageMapEntry::from_bits(self.bits())
    }
}

impl From<MapFlags> for PageMapEntry {
    fn from(flags: MapFlags) -> Self {
        flags.entry()
    }
}

// MapFlags values must line up with the entry layout bit for bit.
const _: () = {
    assert!(MapFlags::WRITABLE.entry().writable());
    assert!(MapFlags::USER_ACCESS.entry().user_access());
    assert!(MapFlags::WRITE_THROUGH.entry().write_through());
    assert!(MapFlags::CACHE_DISABLED.entry().cache_disabled());
    assert!(MapFlags::GLOBAL.entry().global_translation());
    assert!(MapFlags::all().bits().count_ones() == 5);
};

/// One page-map frame: 1024 entries filling exactly one 4 KiB frame.
///
/// The running kernel reaches the maps of the *active* address space
/// through the recursive window instead (see [`crate::window`]); this
/// type is for maps that are not reachable there, such as a freshly
/// allocated top-level map for another address space.
#[repr(C, align(4096))]
pub struct PageMap {
    entries: [PageMapEntry; PAGE_MAP_LEN],
}

const _: () = assert!(core::mem::size_of::<PageMap>() == 4096);

impl PageMap {
    /// Zeroes every entry. Fresh frames carry whatever the previous owner
    /// left there, so new maps must be cleared before they go live.
    pub fn clear(&mut self) {
        self.entries = [PageMapEntry::new(); PAGE_MAP_LEN];
    }

    /// The entry at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= PAGE_MAP_LEN`.
    #[must_use]
    pub const fn entry(&self, index: usize) -> PageMapEntry {
        self.entries[index]
    }

    /// Replaces the entry at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index >= PAGE_MAP_LEN`.
    pub fn set_entry(&mut self, index: usize, entry: PageMapEntry) {
        self.entries[index] = entry;
    }
}
