//! # i386 Page Table (PT)
//!
//! - [`PtIndex`]: index type for VA bits `[21:12]`.
//! - [`PtEntry`]: a PT entry (PTE); every present entry maps one 4 KiB page.
//! - [`PageTable`]: a 4 KiB-aligned array of 1024 PTEs.
//!
//! ## Invariants & Notes
//!
//! - Tables created on demand map themselves in slot [`PtIndex::LAST`].
//! - After modifying active mappings, the caller must perform any required TLB maintenance.

use crate::PageEntryBits;
use crate::page_table::ENTRIES;
use kernel_memory_addresses::{FrameNumber, VirtualAddress};

/// Index into a Page Table (derived from VA bits `[21:12]`).
#[repr(transparent)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PtIndex(u16);

/// A single Page Table entry (PTE).
#[doc(alias = "PTE")]
#[repr(transparent)]
#[derive(Copy, Clone)]
pub struct PtEntry(PageEntryBits);

/// The Page Table: 1024 entries, 4 KiB-aligned.
#[doc(alias = "PT")]
#[repr(C, align(4096))]
pub struct PageTable {
    entries: [PtEntry; ENTRIES],
}

impl PtIndex {
    /// The last slot; demand-created tables map themselves here.
    pub const LAST: Self = Self(1023);

    /// Build an index from a virtual address (extracts bits `[21:12]`).
    #[inline]
    #[must_use]
    pub const fn from(va: VirtualAddress) -> Self {
        Self(((va.as_u32() >> 12) & 0x3FF) as u16)
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
}

impl PtEntry {
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

    /// If present, the mapped physical frame.
    #[inline]
    #[must_use]
    pub const fn page(self) -> Option<FrameNumber> {
        if self.is_present() {
            Some(self.0.frame())
        } else {
            None
        }
    }

    /// Create a 4 KiB leaf PTE.
    ///
    /// Sets `present=1`, clears the PAT bit and writes the frame number.
    #[inline]
    #[must_use]
    pub const fn make_4k(frame: FrameNumber, mut flags: PageEntryBits) -> Self {
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

impl PageTable {
    /// Create a fully zeroed Page Table (all entries non-present).
    #[inline]
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            entries: [PtEntry::zero(); ENTRIES],
        }
    }

    /// Clear every entry in place.
    #[inline]
    pub fn zero(&mut self) {
        self.entries.fill(PtEntry::zero());
    }

    #[inline]
    #[must_use]
    pub const fn get(&self, i: PtIndex) -> PtEntry {
        self.entries[i.as_usize()]
    }

    #[inline]
    pub const fn set(&mut self, i: PtIndex, e: PtEntry) {
        self.entries[i.as_usize()] = e;
    }

    #[inline]
    #[must_use]
    pub const fn index_of(va: VirtualAddress) -> PtIndex {
        PtIndex::from(va)
    }
}
