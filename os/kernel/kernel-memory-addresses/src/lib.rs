//! # i386 Physical and Virtual Address Types
//!
//! Strongly typed wrappers for the raw 32-bit values handled by the paging and
//! frame allocation code.
//!
//! ## Overview
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`PhysicalAddress`] | A byte address in physical memory (RAM or MMIO). |
//! | [`VirtualAddress`] | A byte address as seen by the CPU after translation. |
//! | [`FrameNumber`] | The index of a 4 KiB physical frame, i.e. `address >> 12`. |
//!
//! The types are `#[repr(transparent)]` over `u32` and never mix implicitly:
//! going from a frame to its base address or back is always an explicit call.
//!
//! ## Typical Usage
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let pa = PhysicalAddress::new(0x0040_1234);
//! let frame = pa.frame();
//! assert_eq!(frame, FrameNumber::new(0x401));
//! assert_eq!(frame.base().as_u32(), 0x0040_1000);
//! assert_eq!(pa.page_offset(), 0x234);
//!
//! assert_eq!(pages_for(1), 1);
//! assert_eq!(pages_for(PAGE_SIZE + 1), 2);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod frame_number;
mod physical_address;
mod virtual_address;

pub use crate::frame_number::FrameNumber;
pub use crate::physical_address::PhysicalAddress;
pub use crate::virtual_address::VirtualAddress;

/// Size of a page (and of a physical frame) in bytes.
pub const PAGE_SIZE: u32 = 4096;

/// `log2(PAGE_SIZE)`; the number of offset bits in an address.
pub const PAGE_SHIFT: u32 = 12;

const _: () = assert!(1 << PAGE_SHIFT == PAGE_SIZE);

/// Align `x` down to the nearest multiple of `a`.
///
/// `a` must be a non-zero power of two.
///
/// ```rust
/// # use kernel_memory_addresses::align_down;
/// assert_eq!(align_down(0x1FFF, 4096), 0x1000);
/// assert_eq!(align_down(0x2000, 4096), 0x2000);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_down(x: u32, a: u32) -> u32 {
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a`.
///
/// `a` must be a non-zero power of two and `x + (a - 1)` must not overflow.
///
/// ```rust
/// # use kernel_memory_addresses::align_up;
/// assert_eq!(align_up(1, 4096), 4096);
/// assert_eq!(align_up(4096, 4096), 4096);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_up(x: u32, a: u32) -> u32 {
    (x + a - 1) & !(a - 1)
}

/// Whether `x` is a multiple of [`PAGE_SIZE`].
#[inline(always)]
#[must_use]
pub const fn is_page_aligned(x: u32) -> bool {
    x & (PAGE_SIZE - 1) == 0
}

/// Number of pages needed to hold `bytes` bytes (rounded up).
#[inline(always)]
#[must_use]
pub const fn pages_for(bytes: u32) -> u32 {
    bytes.div_ceil(PAGE_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_helpers() {
        assert_eq!(align_down(0x12345, PAGE_SIZE), 0x12000);
        assert_eq!(align_up(0x12345, PAGE_SIZE), 0x13000);
        assert!(is_page_aligned(0x2000_0000));
        assert!(!is_page_aligned(0x2000_0010));
    }

    #[test]
    fn page_counts_round_up() {
        assert_eq!(pages_for(0), 0);
        assert_eq!(pages_for(1), 1);
        assert_eq!(pages_for(PAGE_SIZE), 1);
        assert_eq!(pages_for(8192), 2);
        assert_eq!(pages_for(u32::MAX), 0x10_0000);
    }

    #[test]
    fn frame_and_address_conversions() {
        let pa = PhysicalAddress::new(0x0040_1234);
        assert_eq!(pa.frame(), FrameNumber::new(0x401));
        assert_eq!(pa.frame().base(), PhysicalAddress::new(0x0040_1000));
        assert_eq!(FrameNumber::containing(pa), pa.frame());

        let va = VirtualAddress::new(0x2000_2abc);
        assert_eq!(va.page_base(), VirtualAddress::new(0x2000_2000));
        assert_eq!(va.page_offset(), 0xabc);
    }

    #[test]
    fn formatting() {
        assert_eq!(format!("{:?}", PhysicalAddress::new(0x1000)), "PA(0x00001000)");
        assert_eq!(format!("{}", VirtualAddress::new(0xFFFF_F000)), "0xFFFFF000");
        assert_eq!(format!("{}", FrameNumber::new(1025)), "1025");
    }
}
