//! # Memory Layout

/// First virtual address of the kernel half. Everything below is user space,
/// everything at or above is kernel space and must never be user-accessible.
///
/// # Kernel Build
/// This information is sourced in the kernel's `build.rs` to configure
/// the linker; the boot code maps physical address 0 here.
pub const KERNEL_OFFSET: u32 = 0xC000_0000;

/// Base of the recursive page-map window: the top 4 MiB of virtual space,
/// reached through the directory's self-referencing last slot.
///
/// Within the window, the page table for directory slot `n` appears at
/// `PAGE_MAP_WINDOW + n * 4096`, and the directory itself occupies the final
/// page. Nothing else may ever be mapped in this region.
pub const PAGE_MAP_WINDOW: u32 = 0xFFC0_0000;

/// Physical address the kernel image is loaded at before paging starts.
///
/// # Kernel Build
/// This information is sourced in the kernel's `build.rs` to configure
/// the linker.
pub const PHYS_LOAD: u32 = 0x0010_0000; // 1 MiB

const _: () = {
    // Directory slots are 4 MiB apiece; the split and the window must sit
    // exactly on the slot boundaries the paging code assumes (768 and 1023).
    assert!(KERNEL_OFFSET >> 22 == 768);
    assert!(PAGE_MAP_WINDOW >> 22 == 1023);
    assert!(KERNEL_OFFSET % (4096 * 1024) == 0);
    assert!(PAGE_MAP_WINDOW % (4096 * 1024) == 0);
    assert!(PHYS_LOAD % 4096 == 0);
};
