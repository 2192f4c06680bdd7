//! Creating, populating and switching address spaces.
//!
//! Every address space shares the kernel half of the directory: the
//! slots from the kernel boundary up to (but excluding) the recursive
//! slot are copied entry for entry when a new top-level map is built.
//! Copying directory entries aliases the kernel page *tables*, so a
//! later kernel mapping made in any address space is visible in all of
//! them, provided its table existed before the copies were taken. The
//! boot path reserves the kernel region's tables up front for exactly
//! that reason.

use kernel_info::memory::KERNEL_OFFSET;
use kernel_memory_addresses::{PAGE_SHIFT, PhysicalPage, VirtualAddress};
use log::debug;

use crate::VirtualMemory;
use crate::entry::MapFlags;
use crate::frame_alloc::FrameAllocator;
use crate::mapping::{MapError, assert_mappable};
use crate::mmu::Mmu;
use crate::window::{self, INDEX_BITS, RECURSIVE_SLOT};

impl<M, A> VirtualMemory<M, A>
where
    M: Mmu,
    A: FrameAllocator,
{
    /// Builds a fresh top-level map and returns its frame.
    ///
    /// The user half starts empty. The kernel half mirrors the active
    /// address space, and the recursive slot points at the new frame
    /// itself so the window works the moment the map is activated. Of
    /// `flags`, only the cache-control bits apply (to the recursive
    /// slot); the directory is never user-accessible.
    ///
    /// # Errors
    ///
    /// [`MapError::OutOfMemory`] when no frame is available.
    #[allow(clippy::cast_possible_truncation)]
    pub fn new_top_page_map(&self, flags: MapFlags) -> Result<PhysicalPage, MapError> {
        let _tables = self.tables.lock_irq();
        let frame = self.allocate_frame()?;
        let map = unsafe { self.mmu.page_map_at(frame) };
        map.clear();

        let first_kernel_slot = window::map_index(VirtualAddress::new(KERNEL_OFFSET), 1);
        for slot in first_kernel_slot..RECURSIVE_SLOT {
            let covers = VirtualAddress::new((slot as u32) << (PAGE_SHIFT + INDEX_BITS));
            let entry = unsafe { self.mmu.read_entry(window::entry_address(covers, 1)) };
            map.set_entry(slot, entry);
        }

        let cache_control = flags & (MapFlags::WRITE_THROUGH | MapFlags::CACHE_DISABLED);
        map.set_entry(
            RECURSIVE_SLOT,
            cache_control
                .entry()
                .with_present(true)
                .with_writable(true)
                .with_frame(frame),
        );

        debug!("created address space rooted at {frame}");
        Ok(frame)
    }

    /// Maps the page containing `address` to `frame`, present
    /// immediately, in the active address space.
    ///
    /// This is the eager counterpart to [`reserve`](Self::reserve), for
    /// memory that must not demand-commit: device frames, shared pages,
    /// anything whose backing is chosen by the caller. An existing
    /// mapping at the page is overwritten.
    ///
    /// # Errors
    ///
    /// [`MapError::OutOfMemory`] if the page's table does not exist yet
    /// and no frame is available to create it.
    ///
    /// # Panics
    ///
    /// As for [`reserve`](Self::reserve).
    pub fn map_page_at(
        &self,
        frame: PhysicalPage,
        address: VirtualAddress,
        flags: MapFlags,
    ) -> Result<(), MapError> {
        let page = address.page();
        assert_mappable(page, flags);

        let _tables = self.tables.lock_irq();
        self.ensure_directory(page, flags)?;
        self.set_leaf(
            page,
            flags
                .entry()
                .with_allocated(true)
                .with_present(true)
                .with_frame(frame),
        );
        Ok(())
    }

    /// Removes the mapping of the page containing `address`.
    ///
    /// Identical to [`release`](Self::release): a committed frame goes
    /// back to the allocator and is returned to the caller.
    ///
    /// # Panics
    ///
    /// As for [`release`](Self::release).
    #[must_use]
    pub fn unmap_page(&self, address: VirtualAddress) -> Option<PhysicalPage> {
        self.release(address)
    }

    /// Switches translation to the address space rooted at `root`.
    ///
    /// # Safety
    ///
    /// `root` must hold a top-level map built by
    /// [`new_top_page_map`](Self::new_top_page_map) (or be the boot
    /// directory), and the kernel mappings it shares must cover the
    /// currently executing code and stack.
    pub unsafe fn activate(&self, root: PhysicalPage) {
        debug!("activating address space rooted at {root}");
        unsafe { self.mmu.load_root(root) };
    }
}
