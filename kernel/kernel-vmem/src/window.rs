//! The recursive page-map window.
//!
//! The last directory slot points back at the directory frame itself.
//! That single self-reference makes every page-map entry of the *active*
//! address space addressable through the top 4 MiB of virtual memory,
//! without any dedicated scratch mappings:
//!
//! ```text
//! 0xFFC0_0000 ┌──────────────────────────────┐
//!             │ page table for slot 0        │  1023 window pages: one
//!             │ page table for slot 1        │  per directory slot,
//!             │ ...                          │  each showing that
//!             │ page table for slot 1022     │  slot's page table
//! 0xFFFF_F000 ├──────────────────────────────┤
//!             │ the page directory itself    │  the 1024th window page
//! 0xFFFF_FFFF └──────────────────────────────┘
//! ```
//!
//! The trick composes: resolving a window address sends the MMU through
//! the self-referencing slot once more than a normal walk, so the frame
//! it finally lands on is a page *map* rather than a mapped page. Folding
//! an address into the window once per step yields the entry's location:
//!
//! ```text
//! fold(a)   = WINDOW | (a >> 12) << 2
//! level 0:  fold(va)        = WINDOW + slot(va)*4096 + index(va)*4
//! level 1:  fold(fold(va))  = WINDOW + 1023*4096     + slot(va)*4
//! ```
//!
//! Entries obtained this way alias the physical map frames, so a store
//! through the window is immediately visible to the next hardware walk
//! (the TLB still has to be told, see [`Mmu::invalidate`]).
//!
//! [`Mmu::invalidate`]: crate::Mmu::invalidate

use kernel_info::memory::PAGE_MAP_WINDOW;
use kernel_memory_addresses::{PAGE_SHIFT, VirtualAddress};

use crate::entry::PAGE_MAP_LEN;

/// Depth of the map hierarchy: a directory (level 1) over tables (level 0).
pub const PAGE_MAP_LEVELS: usize = 2;

/// Virtual-address bits consumed by one map level.
pub const INDEX_BITS: u32 = 10;

/// The directory slot that refers back to the directory frame.
pub const RECURSIVE_SLOT: usize = PAGE_MAP_LEN - 1;

/// log2 of the entry size (entries are 4 bytes wide).
const ENTRY_SHIFT: u32 = 2;

const _: () = {
    // The window must occupy exactly the recursive slot, and folding any
    // address into it must stay inside that 4 MiB span.
    assert!(PAGE_MAP_WINDOW >> (PAGE_SHIFT + INDEX_BITS) == 1023);
    assert!(RECURSIVE_SLOT == 1023);
    assert!(PAGE_MAP_WINDOW.trailing_zeros() >= PAGE_SHIFT + INDEX_BITS);
    assert!(1usize << INDEX_BITS == PAGE_MAP_LEN);
};

/// Location, inside the window, of the entry that translates `address`
/// at `level`.
///
/// Level 0 is the page-table entry, level 1 the directory entry. Loads
/// and stores at the returned address reach the live map frame of the
/// active address space.
///
/// # Panics
///
/// Panics if `level >= PAGE_MAP_LEVELS`. A request for a deeper
/// hierarchy than the one the MMU walks is a kernel bug, not an error
/// the caller could recover from.
#[must_use]
pub fn entry_address(address: VirtualAddress, level: usize) -> VirtualAddress {
    assert!(
        level < PAGE_MAP_LEVELS,
        "no page-map level {level} in a {PAGE_MAP_LEVELS}-level hierarchy"
    );
    let mut at = address.as_u32();
    for _ in 0..=level {
        at = PAGE_MAP_WINDOW | ((at >> PAGE_SHIFT) << ENTRY_SHIFT);
    }
    VirtualAddress::new(at)
}

/// The index of `address` within its map at `level`.
///
/// # Panics
///
/// Panics if `level >= PAGE_MAP_LEVELS`.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn map_index(address: VirtualAddress, level: usize) -> usize {
    assert!(
        level < PAGE_MAP_LEVELS,
        "no page-map level {level} in a {PAGE_MAP_LEVELS}-level hierarchy"
    );
    let shift = PAGE_SHIFT + INDEX_BITS * level as u32;
    ((address.as_u32() >> shift) as usize) & (PAGE_MAP_LEN - 1)
}

/// `true` for addresses inside the window itself.
///
/// Pages in this span are hierarchy aliases; mapping calls must never
/// target them directly.
#[must_use]
pub const fn in_window(address: VirtualAddress) -> bool {
    address.as_u32() >= PAGE_MAP_WINDOW
}
