//! A simulated machine for host-side tests.
//!
//! [`SimMachine`] stands in for the paging hardware: a small bank of
//! 4 KiB frames, an active root, and an [`Mmu`] implementation that
//! decodes window addresses exactly the way the hardware walk does,
//! recursive slot included. Accesses real hardware would fault on, such
//! as reading a table entry whose directory slot is absent, panic the
//! test instead of silently returning garbage.
//!
//! The machine also keeps the books the tests assert against: every
//! invalidation in call order, full root reloads, and the allocator's
//! hand-out and free history.

#![allow(clippy::cast_possible_truncation)]

use core::cell::{Cell, RefCell, UnsafeCell};

use kernel_info::memory::PAGE_MAP_WINDOW;
use kernel_memory_addresses::{
    PAGE_SHIFT, PAGE_SIZE, PhysicalAddress, PhysicalPage, VirtualAddress, VirtualPage,
};

use crate::VirtualMemory;
use crate::entry::{PAGE_MAP_LEN, PageMap, PageMapEntry};
use crate::fault::{FaultCode, FaultContext};
use crate::frame_alloc::FrameAllocator;
use crate::hardening::KernelImage;
use crate::mmu::Mmu;
use crate::window::RECURSIVE_SLOT;

/// Frame number of the directory the machine boots with.
const BOOT_DIRECTORY: u32 = 1;

/// First frame number the allocator hands out. Frame 0 stays unused so
/// a zero frame field always means "no frame".
const FIRST_FREE: u32 = 2;

#[repr(C, align(4096))]
struct FrameCell(UnsafeCell<[u32; PAGE_MAP_LEN]>);

struct AllocState {
    next: u32,
    limit: u32,
    free_list: Vec<u32>,
    allocations: usize,
    freed: Vec<u32>,
}

pub(crate) struct SimMachine {
    frames: Box<[FrameCell]>,
    root: Cell<u32>,
    invalidations: RefCell<Vec<u32>>,
    full_flushes: Cell<usize>,
    alloc: RefCell<AllocState>,
}

// Tests drive one machine from one thread; the trait surface merely
// requires the marker.
unsafe impl Sync for SimMachine {}

impl SimMachine {
    /// A machine with `frame_count` frames of zeroed memory and a boot
    /// directory whose recursive slot is wired up, mirroring what the
    /// boot path hands the kernel.
    pub(crate) fn new(frame_count: usize) -> Self {
        assert!(frame_count >= FIRST_FREE as usize);
        let frames = (0..frame_count)
            .map(|_| FrameCell(UnsafeCell::new([0; PAGE_MAP_LEN])))
            .collect();
        let machine = Self {
            frames,
            root: Cell::new(BOOT_DIRECTORY << PAGE_SHIFT),
            invalidations: RefCell::new(Vec::new()),
            full_flushes: Cell::new(0),
            alloc: RefCell::new(AllocState {
                next: FIRST_FREE,
                limit: frame_count as u32,
                free_list: Vec::new(),
                allocations: 0,
                freed: Vec::new(),
            }),
        };

        let recursive = PageMapEntry::new()
            .with_present(true)
            .with_writable(true)
            .with_frame(PhysicalPage::from_number(BOOT_DIRECTORY));
        unsafe {
            *machine.frame_word(BOOT_DIRECTORY << PAGE_SHIFT, RECURSIVE_SLOT) =
                recursive.into_bits();
        }
        machine
    }

    /// Fills frame `number` with a recognizable pattern, standing in for
    /// leftover data from a previous owner.
    pub(crate) fn poison_frame(&self, number: u32) {
        for index in 0..PAGE_MAP_LEN {
            unsafe { *self.frame_word(number << PAGE_SHIFT, index) = 0xDEAD_BEEF };
        }
    }

    pub(crate) fn allocations(&self) -> usize {
        self.alloc.borrow().allocations
    }

    pub(crate) fn freed(&self) -> Vec<PhysicalPage> {
        self.alloc
            .borrow()
            .freed
            .iter()
            .map(|&number| PhysicalPage::from_number(number))
            .collect()
    }

    /// Page bases handed to `invalidate`, in call order.
    pub(crate) fn invalidated(&self) -> Vec<u32> {
        self.invalidations.borrow().clone()
    }

    pub(crate) fn clear_invalidations(&self) {
        self.invalidations.borrow_mut().clear();
    }

    pub(crate) fn full_flushes(&self) -> usize {
        self.full_flushes.get()
    }

    fn allocate(&self) -> Option<PhysicalPage> {
        let mut state = self.alloc.borrow_mut();
        let number = if let Some(number) = state.free_list.pop() {
            number
        } else {
            if state.next >= state.limit {
                return None;
            }
            state.next += 1;
            state.next - 1
        };
        state.allocations += 1;
        Some(PhysicalPage::from_number(number))
    }

    fn free(&self, frame: PhysicalPage) {
        let mut state = self.alloc.borrow_mut();
        state.freed.push(frame.number());
        state.free_list.push(frame.number());
    }

    /// Raw pointer to word `index` of the frame based at `frame_base`.
    fn frame_word(&self, frame_base: u32, index: usize) -> *mut u32 {
        assert!(
            frame_base.trailing_zeros() >= PAGE_SHIFT,
            "unaligned frame base {frame_base:#010x}"
        );
        let number = (frame_base >> PAGE_SHIFT) as usize;
        assert!(
            number < self.frames.len(),
            "frame {frame_base:#010x} lies outside simulated memory"
        );
        assert!(index < PAGE_MAP_LEN);
        unsafe { self.frames[number].0.get().cast::<u32>().add(index) }
    }

    /// Decodes a window address to the map word it aliases, the way the
    /// hardware walk resolves it through the recursive slot.
    fn decode(&self, at: VirtualAddress) -> *mut u32 {
        let at = at.as_u32();
        assert!(
            at >= PAGE_MAP_WINDOW,
            "entry access outside the window: {at:#010x}"
        );
        assert!(at % 4 == 0, "misaligned entry access: {at:#010x}");

        let slot = ((at - PAGE_MAP_WINDOW) >> PAGE_SHIFT) as usize;
        let index = ((at & (PAGE_SIZE - 1)) >> 2) as usize;
        let table_base = if slot == RECURSIVE_SLOT {
            // The last window page shows the directory itself.
            self.root.get()
        } else {
            let directory = unsafe { *self.frame_word(self.root.get(), slot) };
            assert!(
                directory & 1 != 0,
                "hardware fault: window access for slot {slot} with no table present"
            );
            directory & !(PAGE_SIZE - 1)
        };
        self.frame_word(table_base, index)
    }
}

impl Mmu for SimMachine {
    unsafe fn read_entry(&self, at: VirtualAddress) -> PageMapEntry {
        PageMapEntry::from_bits(unsafe { *self.decode(at) })
    }

    unsafe fn write_entry(&self, at: VirtualAddress, entry: PageMapEntry) {
        unsafe { *self.decode(at) = entry.into_bits() };
    }

    fn invalidate(&self, page: VirtualPage) {
        self.invalidations.borrow_mut().push(page.base().as_u32());
    }

    fn active_root(&self) -> PhysicalPage {
        PhysicalAddress::new(self.root.get()).frame()
    }

    unsafe fn load_root(&self, root: PhysicalPage) {
        self.root.set(root.base().as_u32());
        self.full_flushes.set(self.full_flushes.get() + 1);
    }

    unsafe fn page_map_at<'a>(&self, frame: PhysicalPage) -> &'a mut PageMap {
        let number = frame.number() as usize;
        assert!(
            number < self.frames.len(),
            "frame {frame} lies outside simulated memory"
        );
        unsafe { &mut *self.frames[number].0.get().cast::<PageMap>() }
    }
}

pub(crate) struct SimAlloc<'m> {
    machine: &'m SimMachine,
}

impl<'m> SimAlloc<'m> {
    pub(crate) fn new(machine: &'m SimMachine) -> Self {
        Self { machine }
    }
}

impl FrameAllocator for SimAlloc<'_> {
    fn allocate_frame(&mut self) -> Option<PhysicalPage> {
        self.machine.allocate()
    }

    fn free_frame(&mut self, frame: PhysicalPage) {
        self.machine.free(frame);
    }
}

/// Image bounds the tests harden against. The text span ends mid-page;
/// the partial page containing the end must be protected too.
pub(crate) const TEXT_START: u32 = 0xC010_0000;
pub(crate) const TEXT_END: u32 = 0xC010_2800;
pub(crate) const RODATA_START: u32 = 0xC010_3000;
pub(crate) const RODATA_END: u32 = 0xC010_5000;

pub(crate) fn test_image() -> KernelImage {
    KernelImage::new(
        VirtualAddress::new(TEXT_START),
        VirtualAddress::new(TEXT_END),
        VirtualAddress::new(RODATA_START),
        VirtualAddress::new(RODATA_END),
    )
}

/// A subsystem instance over `machine`, the shape every test starts
/// from.
pub(crate) fn test_vm<'m>(
    machine: &'m SimMachine,
) -> VirtualMemory<&'m SimMachine, SimAlloc<'m>> {
    VirtualMemory::new(machine, SimAlloc::new(machine), test_image())
}

/// The context a write to `address` traps with.
pub(crate) fn write_fault(address: u32) -> FaultContext {
    FaultContext::new(
        VirtualAddress::new(address),
        FaultCode::new().with_write(true),
        VirtualAddress::new(0xC0AB_CDEF),
    )
}
