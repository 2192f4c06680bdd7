//! Reserving and releasing pages of the active address space.
//!
//! Reservation is the cheap half of demand paging: it writes the
//! requested flags and the `allocated` marker into the leaf entry and
//! stops there. No frame is assigned and the entry stays non-present;
//! the commit happens in the fault path on first touch (see
//! [`crate::fault`]). Releasing undoes either state and hands a
//! committed frame back to the allocator.

use kernel_info::memory::KERNEL_OFFSET;
use kernel_memory_addresses::{PAGE_SIZE, PageRange, PhysicalPage, VirtualAddress, VirtualPage};
use thiserror::Error;

use crate::VirtualMemory;
use crate::entry::{MapFlags, PageMapEntry};
use crate::frame_alloc::FrameAllocator;
use crate::mmu::Mmu;
use crate::window;

/// Failure of a mapping mutation.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum MapError {
    /// The frame allocator has no frame left to hand out.
    #[error("out of physical memory")]
    OutOfMemory,
}

impl<M, A> VirtualMemory<M, A>
where
    M: Mmu,
    A: FrameAllocator,
{
    /// Reserves the page containing `address` with the given flags.
    ///
    /// The page becomes usable immediately but consumes no physical
    /// memory until it is first touched. Reserving a page that is
    /// already committed abandons the committed frame; release it first
    /// if the frame matters.
    ///
    /// # Errors
    ///
    /// [`MapError::OutOfMemory`] if the page's table does not exist yet
    /// and no frame is available to create it.
    ///
    /// # Panics
    ///
    /// Panics if the page lies in the page-map window, or if
    /// [`MapFlags::USER_ACCESS`] is requested for a page at or above the
    /// kernel boundary. Both are kernel bugs.
    pub fn reserve(&self, address: VirtualAddress, flags: MapFlags) -> Result<(), MapError> {
        let page = address.page();
        assert_mappable(page, flags);

        let _tables = self.tables.lock_irq();
        self.ensure_directory(page, flags)?;
        self.set_leaf(page, flags.entry().with_allocated(true));
        Ok(())
    }

    /// Reserves every page of the span from `start` through `end`.
    ///
    /// The span covers the page containing `start` through the page
    /// containing `end`, with an aligned `end` treated as the last
    /// boundary to include (see [`PageRange::covering`]).
    ///
    /// # Errors
    ///
    /// [`MapError::OutOfMemory`] if a table allocation fails part-way;
    /// pages reserved before the failure stay reserved.
    ///
    /// # Panics
    ///
    /// As for [`reserve`](Self::reserve).
    pub fn reserve_range(
        &self,
        start: VirtualAddress,
        end: VirtualAddress,
        flags: MapFlags,
    ) -> Result<(), MapError> {
        // TODO: roll the already-reserved prefix back when a table
        // allocation fails mid-range.
        for page in PageRange::covering(start, end) {
            self.reserve(page.base(), flags)?;
        }
        Ok(())
    }

    /// Releases the page containing `address`.
    ///
    /// A committed frame goes back to the allocator and is returned for
    /// the caller's bookkeeping; a bare reservation is simply erased.
    /// Releasing an untouched page is a no-op, so callers may release a
    /// span wholesale without tracking which pages were ever used.
    ///
    /// # Panics
    ///
    /// Panics if the page lies in the page-map window.
    #[must_use]
    pub fn release(&self, address: VirtualAddress) -> Option<PhysicalPage> {
        let page = address.page();
        assert!(
            !window::in_window(page.base()),
            "released page {page} lies in the page-map window"
        );

        let _tables = self.tables.lock_irq();
        let directory = unsafe { self.mmu.read_entry(window::entry_address(page.base(), 1)) };
        if !directory.present() {
            // No table, so nothing was ever reserved here.
            return None;
        }

        let at = window::entry_address(page.base(), 0);
        let leaf = unsafe { self.mmu.read_entry(at) };
        let freed = if leaf.present() {
            let frame = leaf.frame();
            self.frames.lock_irq().free_frame(frame);
            Some(frame)
        } else {
            None
        };

        self.set_leaf(page, PageMapEntry::new());
        freed
    }

    /// Releases every page of the span from `start` through `end`,
    /// covering pages as [`reserve_range`](Self::reserve_range) does.
    ///
    /// # Panics
    ///
    /// As for [`release`](Self::release).
    pub fn release_range(&self, start: VirtualAddress, end: VirtualAddress) {
        for page in PageRange::covering(start, end) {
            let _ = self.release(page.base());
        }
    }

    /// Makes sure the page table covering `page` exists, allocating and
    /// clearing a fresh one if the directory entry is still empty.
    ///
    /// Caller holds the `tables` lock.
    pub(crate) fn ensure_directory(
        &self,
        page: VirtualPage,
        flags: MapFlags,
    ) -> Result<(), MapError> {
        let directory_at = window::entry_address(page.base(), 1);
        let directory = unsafe { self.mmu.read_entry(directory_at) };
        if directory.present() {
            return Ok(());
        }

        let frame = self.allocate_frame()?;
        let mut entry = PageMapEntry::new()
            .with_present(true)
            .with_writable(true)
            .with_frame(frame);
        if flags.contains(MapFlags::USER_ACCESS) {
            entry.set_user_access(true);
        }
        unsafe { self.mmu.write_entry(directory_at, entry) };
        self.mmu.invalidate(directory_at.page());

        // The window page that now shows the new table may still carry a
        // cached non-present translation from an earlier walk; drop it
        // before the first store goes through.
        let window_table = window::entry_address(page.base(), 0).page();
        self.mmu.invalidate(window_table);

        // Fresh frames hold whatever their previous owner wrote, and an
        // all-zero entry is what "unused" means.
        for offset in (0..PAGE_SIZE).step_by(size_of::<PageMapEntry>()) {
            unsafe { self.mmu.write_entry(window_table.join(offset), PageMapEntry::new()) };
        }
        Ok(())
    }

    /// Stores `entry` as the leaf for `page` and performs the two
    /// invalidations every leaf mutation needs: the window page holding
    /// the entry, then the translated page itself.
    ///
    /// Caller holds the `tables` lock and has ensured the table exists.
    pub(crate) fn set_leaf(&self, page: VirtualPage, entry: PageMapEntry) {
        let at = window::entry_address(page.base(), 0);
        unsafe { self.mmu.write_entry(at, entry) };
        self.mmu.invalidate(at.page());
        self.mmu.invalidate(page);
    }

    /// One frame from the allocator, as a recoverable error when the
    /// pool is dry.
    pub(crate) fn allocate_frame(&self) -> Result<PhysicalPage, MapError> {
        self.frames
            .lock_irq()
            .allocate_frame()
            .ok_or(MapError::OutOfMemory)
    }
}

/// Every mapping mutation starts here: the window is off limits, and
/// nothing at or above the kernel boundary may be user-accessible.
pub(crate) fn assert_mappable(page: VirtualPage, flags: MapFlags) {
    assert!(
        !window::in_window(page.base()),
        "mapped page {page} lies in the page-map window"
    );
    if page.base().as_u32() >= KERNEL_OFFSET {
        assert!(
            !flags.contains(MapFlags::USER_ACCESS),
            "kernel page {page} cannot be user-accessible"
        );
    }
}
