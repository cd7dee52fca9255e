use bitfield_struct::bitfield;
use kernel_memory_addresses::{FrameNumber, PhysicalAddress};

/// CR3 — Page-Directory Base Register (32-bit paging, PAE disabled).
///
/// Holds the physical frame of the page directory and cache-control flags
/// for directory walks.
#[bitfield(u32)]
pub struct Cr3 {
    /// Bits 0–2 — Reserved (must be 0).
    #[bits(3)]
    pub reserved0: u8,

    /// Bit 3 — PWT: Page-level Write-Through for the directory.
    pub pwt: bool,

    /// Bit 4 — PCD: Page-level Cache Disable for the directory.
    pub pcd: bool,

    /// Bits 5–11 — Reserved (must be 0 when written).
    #[bits(7)]
    pub reserved1: u8,

    /// Bits 12–31 — page directory physical base >> 12.
    #[bits(20)]
    directory_base_4k: u32,
}

impl Cr3 {
    /// Create a `Cr3` value pointing at the directory stored in `frame`.
    #[must_use]
    pub const fn from_directory(frame: FrameNumber) -> Self {
        Self::new().with_directory_base_4k(frame.as_u32())
    }

    /// Frame holding the page directory.
    #[must_use]
    pub const fn directory_frame(&self) -> FrameNumber {
        FrameNumber::new(self.directory_base_4k())
    }

    /// Physical address of the page directory.
    #[must_use]
    pub const fn directory_phys(&self) -> PhysicalAddress {
        self.directory_frame().base()
    }
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl crate::LoadRegisterUnsafe for Cr3 {
    unsafe fn load_unsafe() -> Self {
        let mut cr3: u32;
        unsafe {
            core::arch::asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
        }
        Self::from_bits(cr3)
    }
}

#[cfg(all(feature = "asm", target_arch = "x86"))]
impl crate::StoreRegisterUnsafe for Cr3 {
    unsafe fn store_unsafe(self) {
        let cr3 = self.into_bits();
        unsafe {
            core::arch::asm!("mov cr3, {}", in(reg) cr3, options(nostack, preserves_flags));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_frame_round_trips_through_bits() {
        let cr3 = Cr3::from_directory(FrameNumber::new(0x200));
        assert_eq!(cr3.into_bits(), 0x0020_0000);
        assert_eq!(cr3.directory_frame(), FrameNumber::new(0x200));
        assert_eq!(cr3.directory_phys(), PhysicalAddress::new(0x0020_0000));
    }
}
