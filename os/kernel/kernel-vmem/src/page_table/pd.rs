//! # i386 Page Directory (PD)
//!
//! - [`PdIndex`]: index type for virtual-address bits `[31:22]`.
//! - [`PdEntry`]: a directory entry pointing at a page table.
//! - [`PageDirectory`]: a 4 KiB-aligned array of 1024 entries.
//!
//! ## Invariants & Notes
//!
//! - Slot [`PdIndex::SELF_MAP`] of every directory built by this crate points
//!   back at the directory itself (see [`SelfMap`](crate::SelfMap)).
//! - 4 MiB leaves are never created; [`PdEntry::make_table`] forces `PS=0`.
//! - TLB maintenance is the caller's responsibility after mutating active
//!   mappings.

use crate::PageEntryBits;
use crate::page_table::ENTRIES;
use kernel_memory_addresses::{FrameNumber, VirtualAddress};

/// Index into the Page Directory (derived from VA bits `[31:22]`).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PdIndex(u16);

/// A single Page Directory entry (PDE).
#[doc(alias = "PDE")]
#[repr(transparent)]
#[derive(Copy, Clone)]
pub struct PdEntry(PageEntryBits);

/// The Page Directory: 1024 entries, 4 KiB-aligned.
#[doc(alias = "PD")]
#[repr(C, align(4096))]
pub struct PageDirectory {
    entries: [PdEntry; ENTRIES],
}

impl PdIndex {
    /// The slot that maps the directory onto itself.
    pub const SELF_MAP: Self = Self(1023);

    /// Build an index from a virtual address (extracts bits `[31:22]`).
    #[inline]
    #[must_use]
    pub const fn from(va: VirtualAddress) -> Self {
        Self((va.as_u32() >> 22) as u16)
    }

    /// Construct from a raw `u16`.
    ///
    /// ### Debug assertions
    /// - Asserts `v < 1024` in debug builds.
    #[inline]
    #[must_use]
    pub const fn new(v: u16) -> Self {
        debug_assert!(v < 1024);
        Self(v)
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0 as u32
    }

    /// First virtual address covered by this slot.
    #[inline]
    #[must_use]
    pub const fn base(self) -> VirtualAddress {
        VirtualAddress::new((self.0 as u32) << 22)
    }
}

impl PdEntry {
    /// Create a zero (non-present) entry.
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self(PageEntryBits::new())
    }

    #[inline]
    #[must_use]
    pub const fn is_present(self) -> bool {
        self.0.present()
    }

    /// Expose the underlying bitfield.
    #[inline]
    #[must_use]
    pub const fn flags(self) -> PageEntryBits {
        self.0
    }

    /// If present, the frame holding the next-level page table.
    #[inline]
    #[must_use]
    pub const fn table(self) -> Option<FrameNumber> {
        if self.is_present() {
            Some(self.0.frame())
        } else {
            None
        }
    }

    /// Create an entry pointing at the page table in `frame`.
    ///
    /// Sets `present=1` and forces `PS=0`.
    #[inline]
    #[must_use]
    pub const fn make_table(frame: FrameNumber, mut flags: PageEntryBits) -> Self {
        flags.set_large_page(false);
        flags.set_present(true);
        flags.set_frame(frame);
        Self(flags)
    }

    #[inline]
    #[must_use]
    pub fn raw(self) -> u32 {
        self.0.into()
    }

    #[inline]
    #[must_use]
    pub fn from_raw(v: u32) -> Self {
        Self(PageEntryBits::from(v))
    }
}

impl PageDirectory {
    /// Create a fully zeroed directory (all entries non-present).
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PdEntry::zero(); ENTRIES],
        }
    }

    /// Clear every entry in place.
    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PdEntry::zero());
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, i: PdIndex) -> PdEntry {
        self.entries[i.as_usize()]
    }

    #[inline]
    pub const fn set(&mut self, i: PdIndex, e: PdEntry) {
        self.entries[i.as_usize()] = e;
    }

    #[inline]
    #[must_use]
    pub const fn index_of(va: VirtualAddress) -> PdIndex {
        PdIndex::from(va)
    }
}
