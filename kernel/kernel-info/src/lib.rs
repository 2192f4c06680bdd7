//! # Kernel Memory Layout Configuration
//!
//! The authoritative source for the fixed virtual-address-space layout shared
//! between the boot code, the linker script and the virtual-memory subsystem.
//! Everything here is a compile-time constant; there is no runtime state.
//!
//! ## Virtual Memory Architecture
//!
//! The kernel employs the classic 32-bit higher-half split with a recursive
//! page-map window at the very top of the address space:
//!
//! ```text
//! Virtual Address Space Layout (32-bit):
//!
//!     0x0000_0000 ┌─────────────────────────────────┐
//!                 │                                 │
//!                 │          User Space             │
//!                 │   (Applications & Libraries)    │
//!                 │                                 │
//!   KERNEL_OFFSET ├─────────────────────────────────┤ 0xC000_0000
//!                 │       Kernel Text & Data        │
//!                 │  (physical 0 mapped at offset)  │
//! PAGE_MAP_WINDOW ├─────────────────────────────────┤ 0xFFC0_0000
//!                 │    Recursive Page-Map Window    │
//!                 │  (every page table, then the    │
//!                 │   directory itself at the top)  │
//!     0xFFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! ### Design Principles
//! * **Shared kernel half**: every address space maps the kernel region from
//!   the same tables, so kernel mappings are visible everywhere at once.
//! * **Recursive window**: the directory's last slot points at the directory
//!   itself, which folds the whole table hierarchy into the top 4 MiB.
//! * **Fixed layout**: compile-time constants keep the linker script, the
//!   boot assembly and the paging code in agreement.
//!
//! ## Build Integration
//!
//! The kernel's `build.rs` sources these constants when generating linker
//! symbols, and the boot assembly mirrors them when it builds the initial
//! identity-mapped tables. The compile-time assertions in [`memory`] catch
//! drift between the constants and the directory-slot arithmetic they imply.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod memory;
