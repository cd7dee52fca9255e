//! # Typed i386 Control Registers
//!
//! The paging code touches exactly three control registers:
//!
//! | Register | Use |
//! |----------|-----|
//! | [`Cr0`] | bit 31 (`PG`) turns paging on |
//! | [`Cr2`] | linear address of the last page fault |
//! | [`Cr3`] | physical frame of the active page directory |
//!
//! Raw accessors come as [`LoadRegisterUnsafe`] / [`StoreRegisterUnsafe`]
//! implementations behind the `asm` feature (`target_arch = "x86"` only).
//! Code that should also run on a development host goes through the
//! [`ControlRegisters`] trait instead, which [`NativeRegisters`] implements on
//! top of the raw accessors.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod cr0;
mod cr2;
mod cr3;
#[cfg(all(feature = "asm", target_arch = "x86"))]
mod native;

pub use crate::cr0::Cr0;
pub use crate::cr2::Cr2;
pub use crate::cr3::Cr3;
#[cfg(all(feature = "asm", target_arch = "x86"))]
pub use crate::native::NativeRegisters;

pub trait LoadRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn load_unsafe() -> Self;
}

pub trait StoreRegisterUnsafe {
    /// # Safety
    /// The caller must uphold the implementation-specific safety requirements.
    /// For example, the register access might be privileged and require kernel mode (Ring 0).
    unsafe fn store_unsafe(self);
}

/// Access to the paging control registers of the executing CPU.
///
/// Reads are safe to call: whoever constructs an implementation vouches that
/// the registers may be read in the current context. Writes change the
/// translation of every subsequent memory access and stay `unsafe`.
pub trait ControlRegisters {
    fn cr0(&self) -> Cr0;

    /// # Safety
    /// Setting `PG` requires the active page directory to map the code that is
    /// currently executing.
    unsafe fn write_cr0(&self, value: Cr0);

    fn cr2(&self) -> Cr2;

    fn cr3(&self) -> Cr3;

    /// # Safety
    /// The new directory must map the code that is currently executing.
    /// Writing CR3 flushes all non-global TLB entries.
    unsafe fn write_cr3(&self, value: Cr3);

    /// Whether `CR0.PG` is set.
    #[inline]
    fn paging_enabled(&self) -> bool {
        self.cr0().pg_paging()
    }
}
