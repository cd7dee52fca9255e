use bitfield_struct::bitfield;
use kernel_memory_addresses::FrameNumber;

/// A single 32-bit i386 paging entry in its raw bitfield form.
///
/// Models the common superset of page directory entries (PDE) and page table
/// entries (PTE) for 32-bit paging without PAE.
///
/// ### Bit layout
///
/// | Bits   | Name / Mnemonic | Meaning |
/// |--------|-----------------|---------|
/// | 0      | `P` (present)   | Valid entry if set |
/// | 1      | `RW`            | Writable if set |
/// | 2      | `US`            | User-mode accessible if set |
/// | 3      | `PWT`           | Write-through caching |
/// | 4      | `PCD`           | Disable caching |
/// | 5      | `A`             | Accessed |
/// | 6      | `D`             | Dirty (PTE only) |
/// | 7      | `PS` / `PAT`    | 4 MiB page in a PDE, PAT in a PTE |
/// | 8      | `G`             | Global (PTE only) |
/// | 9–11   | OS avail        | Reserved for OS use |
/// | 12–31  | frame           | Physical frame number |
///
/// ### Example
/// ```rust
/// # use kernel_memory_addresses::FrameNumber;
/// # use kernel_vmem::PageEntryBits;
/// let mut e = PageEntryBits::new();
/// e.set_present(true);
/// e.set_frame(FrameNumber::new(0x401));
/// assert!(e.present());
/// assert_eq!(e.into_bits(), 0x0040_1001);
/// ```
#[bitfield(u32)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    ///
    /// Clear implies a not-present entry; any access through it faults.
    pub present: bool,

    /// Writable (RW, bit 1).
    ///
    /// Supervisor writes ignore this bit while CR0.WP is clear.
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    pub user_access: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5). Set by the CPU on first access.
    pub accessed: bool,

    /// Dirty (D, bit 6). Set by the CPU on first write through a PTE.
    pub dirty: bool,

    /// Page Size (PS, bit 7).
    ///
    /// In a PDE, set means a 4 MiB leaf (requires CR4.PSE); this crate only
    /// builds 4 KiB mappings and keeps it clear.
    pub large_page: bool,

    /// Global (G, bit 8).
    pub global_translation: bool,

    /// OS-available (bits 9..=11).
    #[bits(3)]
    pub os_available: u8,

    /// Physical frame number (bits 12..=31).
    #[bits(20)]
    frame_bits: u32,
}

impl PageEntryBits {
    #[inline]
    pub const fn set_frame(&mut self, frame: FrameNumber) {
        self.set_frame_bits(frame.as_u32());
    }

    #[inline]
    #[must_use]
    pub const fn frame(&self) -> FrameNumber {
        FrameNumber::new(self.frame_bits())
    }

    /// Present, writable, supervisor only.
    #[inline]
    #[must_use]
    pub const fn new_common_rw() -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user_access(false)
            .with_write_through(false)
            .with_cache_disabled(false)
    }
}
