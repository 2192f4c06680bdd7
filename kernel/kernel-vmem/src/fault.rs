//! Page-fault handling.
//!
//! A fault is *soft* when it hits a reservation: the leaf entry carries
//! `allocated` without `present`, meaning the page was promised but
//! never backed. The handler commits a frame on the spot and returns,
//! and the faulting instruction restarts against the live translation.
//! Everything else is unrecoverable: the handler dumps what the walk
//! knows about the address and halts the kernel by panicking.
//!
//! The interrupt stub decodes its stack frame into a [`FaultContext`]
//! and calls [`page_fault_entry`]; the subsystem instance behind it is
//! registered once at boot via [`install`].

use core::fmt;

use bitfield_struct::bitfield;
use kernel_memory_addresses::VirtualAddress;
use kernel_sync::SyncOnceCell;
use log::{error, trace};
use thiserror::Error;

use crate::VirtualMemory;
use crate::frame_alloc::FrameAllocator;
use crate::mmu::Mmu;
use crate::window;

/// The error code the processor pushes for a page fault.
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct FaultCode {
    /// Set for a protection violation, clear for a non-present page.
    pub present: bool,

    /// Set when the access was a write, clear for a read.
    pub write: bool,

    /// Set when the access came from ring 3.
    pub user_mode: bool,

    /// Set when a paging structure had a reserved bit set.
    pub reserved_write: bool,

    /// Set when the access was an instruction fetch.
    pub instruction_fetch: bool,

    #[bits(27)]
    __: u32,
}

impl FaultCode {
    /// One-line interpretation of the code, for the fatal dump.
    #[must_use]
    pub const fn explain(self) -> &'static str {
        if self.reserved_write() {
            "malformed paging structure (reserved bit set)"
        } else if !self.present() {
            if self.instruction_fetch() {
                "instruction fetch through a non-present page"
            } else if self.write() {
                "write to a non-present page"
            } else {
                "read from a non-present page"
            }
        } else if self.instruction_fetch() {
            "instruction fetch denied by protection"
        } else if self.write() {
            "write denied by protection"
        } else {
            "read denied by protection"
        }
    }
}

/// Everything the fault handler learns from the trap.
#[derive(Debug, Copy, Clone)]
pub struct FaultContext {
    /// The address whose translation failed (CR2).
    pub address: VirtualAddress,

    /// The error code pushed by the processor.
    pub code: FaultCode,

    /// Where execution will resume if the fault is soft.
    pub instruction_pointer: VirtualAddress,
}

impl FaultContext {
    /// Bundles the raw trap state.
    #[must_use]
    pub const fn new(
        address: VirtualAddress,
        code: FaultCode,
        instruction_pointer: VirtualAddress,
    ) -> Self {
        Self {
            address,
            code,
            instruction_pointer,
        }
    }
}

impl fmt::Display for FaultContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at {} ({})",
            self.code.explain(),
            self.address,
            if self.code.user_mode() { "user" } else { "kernel" }
        )
    }
}

/// Receiver for decoded page faults.
///
/// `Sync` because the processor can trap on any instruction boundary;
/// the handler is shared with every interrupt context.
pub trait PageFaultHandler: Sync {
    /// Resolves `context` or does not return.
    fn handle_page_fault(&self, context: &FaultContext);
}

static HANDLER: SyncOnceCell<&'static dyn PageFaultHandler> = SyncOnceCell::new();

/// Failure to register a fault handler.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Error)]
pub enum InstallError {
    /// Some handler was installed earlier; there is exactly one slot.
    #[error("a page-fault handler is already installed")]
    AlreadyInstalled,
}

/// Registers `handler` as the page-fault receiver for the rest of the
/// kernel's lifetime.
///
/// # Errors
///
/// [`InstallError::AlreadyInstalled`] if a handler was registered
/// before. The first registration stays in effect.
pub fn install(handler: &'static dyn PageFaultHandler) -> Result<(), InstallError> {
    HANDLER
        .set(handler)
        .map_err(|_| InstallError::AlreadyInstalled)
}

/// Entry point for the page-fault interrupt stub.
///
/// # Panics
///
/// Panics if no handler has been installed: a fault this early cannot
/// be resolved, so the kernel halts with the context in the message.
pub fn page_fault_entry(context: &FaultContext) {
    match HANDLER.get() {
        Some(handler) => handler.handle_page_fault(context),
        None => panic!("page fault with no handler installed: {context}"),
    }
}

impl<M, A> PageFaultHandler for VirtualMemory<M, A>
where
    M: Mmu + Sync,
    A: FrameAllocator + Send,
{
    fn handle_page_fault(&self, context: &FaultContext) {
        if self.try_soft_commit(context) {
            return;
        }
        self.fatal_fault(context);
    }
}

impl<M, A> VirtualMemory<M, A>
where
    M: Mmu,
    A: FrameAllocator,
{
    /// Boot-time bring-up: registers this instance as the page-fault
    /// handler, then hardens the kernel mappings.
    ///
    /// # Errors
    ///
    /// [`InstallError::AlreadyInstalled`] if some handler beat us to it;
    /// hardening does not run in that case.
    pub fn initialize(&'static self) -> Result<(), InstallError>
    where
        M: Sync + 'static,
        A: Send + 'static,
    {
        install(self)?;
        self.harden();
        Ok(())
    }

    /// Commits a frame if `context` describes the first touch of a
    /// reserved page. Returns `false` when the fault is not ours.
    ///
    /// Runs without the `tables` lock: the levels above the leaf are
    /// checked before the leaf itself so the window loads cannot fault,
    /// and the commit is a single store to an entry in the reserved
    /// state, which no mapping call writes concurrently.
    fn try_soft_commit(&self, context: &FaultContext) -> bool {
        let address = context.address;
        if address.as_u32() == 0 {
            return false;
        }

        let mut level = window::PAGE_MAP_LEVELS - 1;
        while level > 0 {
            let above = unsafe { self.mmu.read_entry(window::entry_address(address, level)) };
            if !above.present() {
                return false;
            }
            level -= 1;
        }

        let at = window::entry_address(address, 0);
        let reservation = unsafe { self.mmu.read_entry(at) };
        if !reservation.is_reserved_uncommitted() {
            return false;
        }

        // Out of memory on first touch has no caller to report to; the
        // promise made at reservation time cannot be kept, so halt.
        let Some(frame) = self.frames.lock_irq().allocate_frame() else {
            panic!("out of physical memory committing reserved page at {address}");
        };

        let entry = reservation.with_present(true).with_frame(frame);
        unsafe { self.mmu.write_entry(at, entry) };
        self.mmu.invalidate(at.page());
        self.mmu.invalidate(address.page());

        trace!("committed {frame} to reserved page at {address}");
        true
    }

    /// Dumps everything the walk knows about the fault and halts.
    fn fatal_fault(&self, context: &FaultContext) -> ! {
        let address = context.address;
        let code = context.code;

        error!(
            "PAGE FAULT: address={address} code={:#04x} rip={}",
            code.into_bits(),
            context.instruction_pointer
        );
        error!("  {context}");
        if address.in_null_page() {
            error!("  likely null pointer dereference");
        }

        let directory = unsafe { self.mmu.read_entry(window::entry_address(address, 1)) };
        error!("  directory entry: {:#010x}", directory.into_bits());
        if directory.present() {
            let leaf = unsafe { self.mmu.read_entry(window::entry_address(address, 0)) };
            error!("  table entry:     {:#010x}", leaf.into_bits());
        } else {
            error!("  table entry:     unreachable, no table");
        }
        error!("{code:#?}");

        panic!("unrecoverable page fault: {context}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::MapFlags;
    use crate::sim::{SimMachine, test_vm, write_fault};
    use kernel_memory_addresses::PhysicalPage;

    const RESERVED: u32 = 0xC040_0000;
    const TABLE_WINDOW: u32 = 0xFFF0_1000;

    #[test]
    fn first_touch_commits_a_frame_and_preserves_flags() {
        let machine = SimMachine::new(64);
        let vm = test_vm(&machine);
        vm.reserve(
            VirtualAddress::new(RESERVED),
            MapFlags::WRITABLE | MapFlags::GLOBAL,
        )
        .unwrap();
        machine.clear_invalidations();

        vm.handle_page_fault(&write_fault(RESERVED + 0x42));

        let leaf = vm.entry(VirtualAddress::new(RESERVED), 0).unwrap();
        assert!(leaf.present());
        assert!(leaf.allocated());
        assert!(leaf.writable());
        assert!(leaf.global_translation());
        assert_eq!(leaf.frame(), PhysicalPage::from_number(3));

        // A retry of the faulting access now translates.
        let resolved = vm.translate(VirtualAddress::new(RESERVED + 0x42)).unwrap();
        assert_eq!(resolved.as_u32(), 0x3042);

        assert_eq!(machine.invalidated(), vec![TABLE_WINDOW, RESERVED]);
    }

    #[test]
    fn each_reserved_page_gets_its_own_frame() {
        let machine = SimMachine::new(64);
        let vm = test_vm(&machine);
        vm.reserve_range(
            VirtualAddress::new(RESERVED),
            VirtualAddress::new(RESERVED + 0x1000),
            MapFlags::WRITABLE,
        )
        .unwrap();

        vm.handle_page_fault(&write_fault(RESERVED));
        vm.handle_page_fault(&write_fault(RESERVED + 0x1FFF));

        let first = vm.entry(VirtualAddress::new(RESERVED), 0).unwrap();
        let second = vm.entry(VirtualAddress::new(RESERVED + 0x1000), 0).unwrap();
        assert!(first.present());
        assert!(second.present());
        assert_ne!(first.frame(), second.frame());
    }

    #[test]
    #[should_panic(expected = "unrecoverable page fault")]
    fn touching_unreserved_memory_is_fatal() {
        let machine = SimMachine::new(64);
        let vm = test_vm(&machine);
        // The table exists, but the faulting page was never reserved.
        vm.reserve(VirtualAddress::new(RESERVED), MapFlags::WRITABLE)
            .unwrap();

        vm.handle_page_fault(&write_fault(RESERVED + 0x1000));
    }

    #[test]
    #[should_panic(expected = "unrecoverable page fault")]
    fn null_dereference_is_fatal() {
        let machine = SimMachine::new(64);
        let vm = test_vm(&machine);
        vm.handle_page_fault(&write_fault(0));
    }

    #[test]
    #[should_panic(expected = "unrecoverable page fault")]
    fn faults_with_no_table_behind_them_are_fatal() {
        let machine = SimMachine::new(64);
        let vm = test_vm(&machine);
        vm.handle_page_fault(&write_fault(0x4567_8000));
    }

    #[test]
    #[should_panic(expected = "unrecoverable page fault")]
    fn protection_faults_on_committed_pages_are_fatal() {
        let machine = SimMachine::new(64);
        let vm = test_vm(&machine);
        vm.reserve(VirtualAddress::new(RESERVED), MapFlags::empty())
            .unwrap();
        vm.handle_page_fault(&write_fault(RESERVED));

        // Second fault at the same page: a write denied by protection.
        let denied = FaultContext::new(
            VirtualAddress::new(RESERVED + 8),
            FaultCode::new().with_present(true).with_write(true),
            VirtualAddress::new(0xC0AB_CDEF),
        );
        vm.handle_page_fault(&denied);
    }

    #[test]
    #[should_panic(expected = "out of physical memory committing")]
    fn commit_without_free_frames_is_fatal() {
        // One allocatable frame, consumed by the page table.
        let machine = SimMachine::new(3);
        let vm = test_vm(&machine);
        vm.reserve(VirtualAddress::new(RESERVED), MapFlags::WRITABLE)
            .unwrap();

        vm.handle_page_fault(&write_fault(RESERVED));
    }

    #[test]
    fn codes_explain_themselves() {
        assert_eq!(FaultCode::new().explain(), "read from a non-present page");
        assert_eq!(
            FaultCode::new().with_write(true).explain(),
            "write to a non-present page"
        );
        assert_eq!(
            FaultCode::new().with_instruction_fetch(true).explain(),
            "instruction fetch through a non-present page"
        );
        assert_eq!(
            FaultCode::new().with_present(true).with_write(true).explain(),
            "write denied by protection"
        );
        assert_eq!(
            FaultCode::new().with_reserved_write(true).explain(),
            "malformed paging structure (reserved bit set)"
        );
    }

    #[test]
    fn handler_registration_lifecycle() {
        // The registration slot is process-global; every interaction
        // with it stays inside this one test.
        let machine: &'static SimMachine = Box::leak(Box::new(SimMachine::new(64)));
        let vm: &'static VirtualMemory<&'static SimMachine, crate::sim::SimAlloc<'static>> =
            Box::leak(Box::new(test_vm(machine)));

        // Dispatch before any registration halts the kernel.
        let early = std::panic::catch_unwind(|| {
            page_fault_entry(&write_fault(0x1000));
        });
        assert!(early.is_err());

        vm.reserve(VirtualAddress::new(RESERVED), MapFlags::WRITABLE)
            .unwrap();
        install(vm).unwrap();

        // Dispatch now routes to the subsystem, which commits.
        page_fault_entry(&write_fault(RESERVED));
        assert!(vm.entry(VirtualAddress::new(RESERVED), 0).unwrap().present());

        // The slot is single-shot.
        assert_eq!(install(vm), Err(InstallError::AlreadyInstalled));
    }
}
