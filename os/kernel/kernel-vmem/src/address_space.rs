//! # Address Space (i386, two-level, self-mapped)
//!
//! Strongly-typed helpers to build and manipulate a **single** virtual address
//! space rooted at a page directory.
//!
//! ## Highlights
//!
//! - [`AddressSpace::init_directory`] clears a fresh directory, links the
//!   shared (identity mapped) tables into the low slots and installs the
//!   directory self-map in slot 1023.
//! - [`AddressSpace::install_table`] links a fresh page table for the 4 MiB
//!   window around an address, zeroes it and self-maps it in its last slot.
//! - [`AddressSpace::map_page`] / [`AddressSpace::unmap_page`] install or clear a
//!   single 4 KiB PTE.
//! - [`AddressSpace::mapping`] / [`AddressSpace::query`] walk the structures in
//!   software.
//! - [`AddressSpace::activate`] loads CR3 with this space's directory.
//!
//! ## Design
//!
//! - The space does not allocate. Callers hand in frames for tables and pages,
//!   so the allocation policy (which frame pool pays for what) stays with the
//!   caller.
//! - `unsafe` is confined to reaching tables through the [`PhysMapper`].
//!
//! ## Safety
//!
//! - Mutating active mappings requires appropriate **TLB maintenance** (e.g.,
//!   a CR3 reload).
//! - The provided [`PhysMapper`] must yield **writable** references to table frames.

use crate::page_table::pd::{PageDirectory, PdEntry, PdIndex};
use crate::page_table::pt::{PageTable, PtEntry, PtIndex};
use crate::page_table::split_indices;
use crate::{PageEntryBits, PhysMapper, SelfMap};
use kernel_memory_addresses::{FrameNumber, PhysicalAddress, VirtualAddress};
use kernel_registers::{ControlRegisters, Cr3};

/// Handle to a single, concrete address space.
pub struct AddressSpace<'m, M: PhysMapper> {
    directory: FrameNumber,
    mapper: &'m M,
}

/// What the paging structures currently say about one virtual address.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Mapping {
    /// No page table covers the 4 MiB window around the address.
    NoTable,
    /// The page table exists, the entry is not present.
    NotPresent { table: FrameNumber },
    /// The entry maps a page.
    Page { table: FrameNumber, frame: FrameNumber },
    /// The entry is the table's own self-map slot.
    SelfMap { table: FrameNumber },
}

impl Mapping {
    /// Frame the address translates to, if any.
    #[must_use]
    pub const fn frame(self) -> Option<FrameNumber> {
        match self {
            Self::Page { frame, .. } => Some(frame),
            Self::SelfMap { table } => Some(table),
            Self::NoTable | Self::NotPresent { .. } => None,
        }
    }
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// View the **currently active** address space by reading CR3.
    #[inline]
    pub fn from_active<R: ControlRegisters>(mapper: &'m M, regs: &R) -> Self {
        Self::from_directory(mapper, regs.cr3().directory_frame())
    }

    #[inline]
    pub const fn from_directory(mapper: &'m M, directory: FrameNumber) -> Self {
        Self { directory, mapper }
    }

    /// Frame of the page directory.
    #[inline]
    pub const fn directory_frame(&self) -> FrameNumber {
        self.directory
    }

    /// Whether CR3 currently points at this space's directory.
    #[inline]
    pub fn is_active<R: ControlRegisters>(&self, regs: &R) -> bool {
        regs.cr3().directory_frame() == self.directory
    }

    /// Load CR3 with this address space's directory.
    ///
    /// # Safety
    /// The directory must map the code that is currently executing. Writing CR3
    /// also flushes all stale translations.
    #[inline]
    pub unsafe fn activate<R: ControlRegisters>(&self, regs: &R) {
        unsafe { regs.write_cr3(Cr3::from_directory(self.directory)) }
    }

    #[inline]
    fn directory_mut(&self) -> &mut PageDirectory {
        // SAFETY: the directory frame was handed to us as a page directory.
        unsafe { self.mapper.directory_mut(self.directory) }
    }

    #[inline]
    fn table_mut(&self, table: FrameNumber, slot: PdIndex) -> &mut PageTable {
        // SAFETY: `table` is linked from `slot` of our directory.
        unsafe { self.mapper.table_mut(table, slot) }
    }

    /// Clear the directory, link `shared` page tables into slots `0..` and
    /// map the directory onto itself in [`SelfMap::SLOT`].
    pub fn init_directory(
        &self,
        shared: impl IntoIterator<Item = FrameNumber>,
        flags: PageEntryBits,
    ) {
        let dir = self.directory_mut();
        dir.zero();
        for (i, table) in shared.into_iter().enumerate() {
            assert!(
                i < SelfMap::SLOT.as_usize(),
                "shared region overlaps the self-map slot"
            );
            #[allow(clippy::cast_possible_truncation)]
            dir.set(PdIndex::new(i as u16), PdEntry::make_table(table, flags));
        }
        dir.set(SelfMap::SLOT, PdEntry::make_table(self.directory, flags));
    }

    #[inline]
    #[must_use]
    pub fn directory_entry(&self, va: VirtualAddress) -> PdEntry {
        self.directory_mut().get(PdIndex::from(va))
    }

    /// Walk the structures for `va`.
    #[must_use]
    pub fn mapping(&self, va: VirtualAddress) -> Mapping {
        let (slot, idx) = split_indices(va);
        let Some(table) = self.directory_mut().get(slot).table() else {
            return Mapping::NoTable;
        };
        match self.table_mut(table, slot).get(idx).page() {
            None => Mapping::NotPresent { table },
            Some(frame) if idx == PtIndex::LAST && frame == table => Mapping::SelfMap { table },
            Some(frame) => Mapping::Page { table, frame },
        }
    }

    /// Link the page table in `table` for the 4 MiB window containing `va`,
    /// clear it and map it onto itself in its last slot.
    ///
    /// ### Panics
    /// - If the window already has a table, or `va` lies in the self-map window.
    pub fn install_table(&self, va: VirtualAddress, table: FrameNumber, flags: PageEntryBits) {
        let slot = PdIndex::from(va);
        assert!(slot != SelfMap::SLOT, "cannot install a table over the self-map");

        let dir = self.directory_mut();
        assert!(
            !dir.get(slot).is_present(),
            "page table for {va} already present"
        );
        dir.set(slot, PdEntry::make_table(table, flags));

        let pt = self.table_mut(table, slot);
        pt.zero();
        pt.set(PtIndex::LAST, PtEntry::make_4k(table, flags));
        log::trace!("installed page table {table} for slot {}", slot.as_usize());
    }

    /// Map the page containing `va` to `frame`.
    ///
    /// ### Panics
    /// - If no page table covers `va`, or the entry is already present.
    pub fn map_page(&self, va: VirtualAddress, frame: FrameNumber, flags: PageEntryBits) {
        let (slot, idx) = split_indices(va);
        let Some(table) = self.directory_mut().get(slot).table() else {
            panic!("no page table covers {va}");
        };
        let pt = self.table_mut(table, slot);
        assert!(!pt.get(idx).is_present(), "page {va} is already mapped");
        pt.set(idx, PtEntry::make_4k(frame, flags));
        log::trace!("mapped {} -> frame {frame}", va.page_base());
    }

    /// Clear the entry for `va`, returning the frame it mapped.
    pub fn unmap_page(&self, va: VirtualAddress) -> Option<FrameNumber> {
        let (slot, idx) = split_indices(va);
        let table = self.directory_mut().get(slot).table()?;
        let pt = self.table_mut(table, slot);
        let frame = pt.get(idx).page()?;
        pt.set(idx, PtEntry::zero());
        log::trace!("unmapped {} (frame {frame})", va.page_base());
        Some(frame)
    }

    /// Pointer to the start of the data page containing `va`, if one is
    /// mapped. Table self-map entries do not count.
    ///
    /// # Safety
    /// This address space must be the one in CR3.
    #[must_use]
    pub unsafe fn page_ptr(&self, va: VirtualAddress) -> Option<*mut u8> {
        let Mapping::Page { frame, .. } = self.mapping(va) else {
            return None;
        };
        // SAFETY: `va` maps `frame` in the loaded space (caller).
        Some(unsafe { self.mapper.page_ptr(frame, va.page_base()) })
    }

    /// Translate a `VirtualAddress` to `PhysicalAddress` if mapped.
    #[must_use]
    pub fn query(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.mapping(va)
            .frame()
            .map(|frame| frame.base() + va.page_offset())
    }
}
