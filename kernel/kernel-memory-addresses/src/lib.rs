//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for the raw 32-bit addresses used by the paging
//! and memory-management code.
//!
//! ## Overview
//!
//! All addresses on this machine are 32 bits wide and all pages are 4 KiB,
//! so the types here stay flat: no page-size generics, just a small set
//! of zero-cost `u32` newtypes that keep virtual and physical values
//! from mixing at compile time.
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`VirtualAddress`] | A linear (page-table translated) address. |
//! | [`PhysicalAddress`] | A physical RAM or MMIO address. |
//! | [`VirtualPage`] | A page-aligned base address in virtual space. |
//! | [`PhysicalPage`] | A page-aligned frame base address in physical space. |
//! | [`PageRange`] | The pages covered by a `[start, end]` span, normalized. |
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0x1234_5678);
//! assert_eq!(va.page().base().as_u32(), 0x1234_5000);
//! assert_eq!(va.offset_in_page(), 0x678);
//!
//! // A span normalizes to whole pages; the end boundary is included.
//! let pages: Vec<_> = PageRange::covering(VirtualAddress::new(0x1001), VirtualAddress::new(0x3000))
//!     .map(|p| p.base().as_u32())
//!     .collect();
//! assert_eq!(pages, [0x1000, 0x2000, 0x3000]);
//! ```
//!
//! ## Design Notes
//!
//! - The types are `#[repr(transparent)]` and implement `Copy`, `Eq`, `Ord`,
//!   and `Hash`, making them suitable as map keys or for FFI use.
//! - All alignment and offset calculations are `const fn` and zero-cost in
//!   release builds.
//! - Page bases are enforced by construction: every [`VirtualPage`] and
//!   [`PhysicalPage`] value has its low twelve bits clear.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

use core::fmt;
use core::ops::{Add, AddAssign};

/// Size of one page and one page frame, in bytes.
pub const PAGE_SIZE: u32 = 4096;

/// log2([`PAGE_SIZE`]), i.e. the number of low bits used for the in-page offset.
pub const PAGE_SHIFT: u32 = 12;

const OFFSET_MASK: u32 = PAGE_SIZE - 1;
const PAGE_MASK: u32 = !OFFSET_MASK;

/// Virtual memory address.
///
/// Carries the *kind* of address at the type level so virtual and physical
/// values cannot be mixed accidentally. No alignment is implied; use
/// [`VirtualAddress::page`] to get the containing page base.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(u32);

impl VirtualAddress {
    #[inline]
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// The page containing this address (low bits zeroed).
    #[inline]
    #[must_use]
    pub const fn page(self) -> VirtualPage {
        VirtualPage(self.0 & PAGE_MASK)
    }

    /// The offset of this address within its page (`0..PAGE_SIZE`).
    #[inline]
    #[must_use]
    pub const fn offset_in_page(self) -> u32 {
        self.0 & OFFSET_MASK
    }

    #[inline]
    #[must_use]
    pub const fn is_page_aligned(self) -> bool {
        self.0 & OFFSET_MASK == 0
    }

    /// Whether this address lies in the page at address zero.
    ///
    /// The null page is never a valid target of a data access; the fault
    /// path reports it separately from other bad addresses.
    #[inline]
    #[must_use]
    pub const fn in_null_page(self) -> bool {
        self.0 < PAGE_SIZE
    }

}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA(0x{:08X})", self.0)
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

impl Add<u32> for VirtualAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u32) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u32> for VirtualAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u32) {
        self.0 += rhs;
    }
}

impl From<u32> for VirtualAddress {
    #[inline]
    fn from(v: u32) -> Self {
        Self::new(v)
    }
}

impl From<VirtualAddress> for u32 {
    #[inline]
    fn from(a: VirtualAddress) -> Self {
        a.as_u32()
    }
}

/// Physical memory address (RAM or MMIO).
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(u32);

impl PhysicalAddress {
    #[inline]
    #[must_use]
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// The page frame containing this address (low bits zeroed).
    #[inline]
    #[must_use]
    pub const fn frame(self) -> PhysicalPage {
        PhysicalPage(self.0 & PAGE_MASK)
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA(0x{:08X})", self.0)
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

impl Add<u32> for PhysicalAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u32) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl AddAssign<u32> for PhysicalAddress {
    #[inline]
    fn add_assign(&mut self, rhs: u32) {
        self.0 += rhs;
    }
}

impl From<u32> for PhysicalAddress {
    #[inline]
    fn from(v: u32) -> Self {
        Self::new(v)
    }
}

impl From<PhysicalAddress> for u32 {
    #[inline]
    fn from(a: PhysicalAddress) -> Self {
        a.as_u32()
    }
}

/// A page base address in virtual space (low twelve bits are zero).
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualPage(u32);

impl VirtualPage {
    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        VirtualAddress::new(self.0)
    }

    /// Page number, i.e. the base address shifted down by [`PAGE_SHIFT`].
    #[inline]
    #[must_use]
    pub const fn number(self) -> u32 {
        self.0 >> PAGE_SHIFT
    }

    /// The next page up in the address space, `None` past the top.
    #[inline]
    #[must_use]
    pub const fn checked_next(self) -> Option<Self> {
        match self.0.checked_add(PAGE_SIZE) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Combine with an in-page offset to form a full address.
    #[inline]
    #[must_use]
    pub const fn join(self, offset: u32) -> VirtualAddress {
        VirtualAddress::new(self.0 + (offset & OFFSET_MASK))
    }
}

impl fmt::Debug for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualPage(0x{:08X})", self.0)
    }
}

impl fmt::Display for VirtualPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

impl From<VirtualPage> for VirtualAddress {
    #[inline]
    fn from(p: VirtualPage) -> Self {
        p.base()
    }
}

/// A page frame base address in physical space (low twelve bits are zero).
#[repr(transparent)]
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalPage(u32);

impl PhysicalPage {
    /// Frame whose number (base >> [`PAGE_SHIFT`]) is `number`.
    #[inline]
    #[must_use]
    pub const fn from_number(number: u32) -> Self {
        Self(number << PAGE_SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0)
    }

    /// Frame number, i.e. the base address shifted down by [`PAGE_SHIFT`].
    #[inline]
    #[must_use]
    pub const fn number(self) -> u32 {
        self.0 >> PAGE_SHIFT
    }
}

impl fmt::Debug for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysicalPage(0x{:08X})", self.0)
    }
}

impl fmt::Display for PhysicalPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

impl From<PhysicalPage> for PhysicalAddress {
    #[inline]
    fn from(p: PhysicalPage) -> Self {
        p.base()
    }
}

/// The pages covered by a `[start, end]` span, as an iterator.
///
/// Normalization: `start` rounds down to its page; `end` rounds up to the
/// nearest page boundary (staying put when already aligned), and the page at
/// that boundary is the last one yielded. `covering(0x1001, 0x3000)` walks
/// the pages at `0x1000`, `0x2000` and `0x3000`.
///
/// An `end` whose boundary would lie past the top of the address space
/// clamps to the highest page.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PageRange {
    next: Option<VirtualPage>,
    last: VirtualPage,
}

impl PageRange {
    #[must_use]
    pub fn covering(start: VirtualAddress, end: VirtualAddress) -> Self {
        let first = start.page();
        let last = if end.is_page_aligned() {
            end.page()
        } else {
            // Rounding up from inside the top page has nowhere to go; stay there.
            end.page().checked_next().unwrap_or(end.page())
        };
        Self {
            next: Some(first),
            last,
        }
    }

    /// Number of pages this range will yield.
    #[must_use]
    pub const fn page_count(&self) -> u32 {
        match self.next {
            Some(next) if next.number() <= self.last.number() => {
                self.last.number() - next.number() + 1
            }
            _ => 0,
        }
    }
}

impl Iterator for PageRange {
    type Item = VirtualPage;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        if current > self.last {
            self.next = None;
            return None;
        }
        self.next = current.checked_next();
        Some(current)
    }
}
