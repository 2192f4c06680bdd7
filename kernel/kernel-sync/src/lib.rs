//! # Kernel synchronization primitives
//!
//! A spin lock with an interrupt-masking variant and a one-shot
//! initialization cell. These are the only primitives the kernel needs
//! below the scheduler: nothing here blocks, sleeps or allocates.
//!
//! The machine runs a single core, so "concurrency" means interleaving
//! between ordinary kernel control flow and interrupt handlers. Taking a
//! lock with [`SpinLock::lock_irq`] masks maskable interrupts for the
//! duration of the hold, which is what makes a critical section safe
//! against that interleaving.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod spin_lock;
mod sync_once_cell;

pub use irq::IrqGuard;
pub use spin_lock::{IrqLockGuard, SpinLock, SpinLockGuard};
pub use sync_once_cell::SyncOnceCell;
