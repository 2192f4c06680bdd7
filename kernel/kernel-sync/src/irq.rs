//! Interrupt-flag save/restore for critical sections.
//!
//! # Platform
//!
//! Uses `cli`/`sti` and `pushfd`/`pop` and therefore targets 32-bit x86.
//! When built for any other target (the hosted test builds), there is no
//! interrupt flag to mask and all of this compiles to no-ops.
//!
//! # Safety & Privilege
//!
//! These operations must run in a context where `cli`/`sti` are legal,
//! i.e. ring 0. Calling from user space is invalid.

/// Returns whether maskable interrupts are currently enabled (`IF`, bit 9
/// of `EFLAGS`).
#[cfg(target_arch = "x86")]
#[inline]
#[must_use]
pub fn interrupts_enabled() -> bool {
    let eflags: u32;
    unsafe {
        core::arch::asm!("pushfd; pop {}", out(reg) eflags, options(nostack, preserves_flags));
    }
    eflags & (1 << 9) != 0
}

/// Disables hardware interrupts (`cli`).
#[cfg(target_arch = "x86")]
#[inline]
pub fn disable_interrupts() {
    unsafe { core::arch::asm!("cli", options(nomem, nostack, preserves_flags)) }
}

/// Enables hardware interrupts (`sti`).
#[cfg(target_arch = "x86")]
#[inline]
pub fn enable_interrupts() {
    unsafe { core::arch::asm!("sti", options(nomem, nostack, preserves_flags)) }
}

#[cfg(not(target_arch = "x86"))]
#[inline]
#[must_use]
pub const fn interrupts_enabled() -> bool {
    false
}

#[cfg(not(target_arch = "x86"))]
#[inline]
pub const fn disable_interrupts() {}

#[cfg(not(target_arch = "x86"))]
#[inline]
pub const fn enable_interrupts() {}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// `IrqGuard::new()` snapshots the `IF` bit. If interrupts were enabled, it
/// executes `cli`. On drop, it executes `sti` **only** if they were
/// previously enabled, preserving the original state. Guards nest: an inner
/// guard created while interrupts are already off restores nothing.
///
/// # Examples
///
/// ```no_run
/// use kernel_sync::IrqGuard;
///
/// {
///     let _g = IrqGuard::new();
///     // critical section, safe from interrupt handlers
/// }
/// // IF restored to its prior state here
/// ```
pub struct IrqGuard {
    /// Whether interrupts were enabled (IF=1) when the guard was created.
    were_enabled: bool,
}

impl Default for IrqGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl IrqGuard {
    /// Disables interrupts if they are currently enabled and remembers the state.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        let enabled = interrupts_enabled();
        if enabled {
            disable_interrupts();
        }
        Self {
            were_enabled: enabled,
        }
    }
}

impl Drop for IrqGuard {
    /// Restores interrupts only if they were previously enabled.
    fn drop(&mut self) {
        if self.were_enabled {
            enable_interrupts();
        }
    }
}
