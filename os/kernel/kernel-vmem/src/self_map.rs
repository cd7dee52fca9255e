//! # Recursive (self-mapped) page directory addressing
//!
//! Directory slot 1023 points at the directory's own frame. A translation
//! through that slot therefore uses the directory as if it were a page table,
//! and every page table of the active address space becomes visible inside
//! the top 4 MiB of virtual memory:
//!
//! ```text
//! 0xFFC0_0000 | pd << 12            page table for directory slot `pd`
//! 0xFFC0_0000 | pd << 12 | pt * 4   PTE `pt` of that table
//! 0xFFFF_F000                       the directory itself (pd = 1023)
//! 0xFFFF_F000 | pd * 4              PDE `pd`
//! ```
//!
//! The addresses are only meaningful while paging is enabled and the
//! directory in question is loaded in CR3.
//!
//! Every page table created on demand also points at itself in its own last
//! slot, so the last page of each 4 MiB window ([`SelfMap::table_page`]) shows
//! that window's table once it exists. Such pages must never be handed out
//! as memory.

use crate::page_table::TABLE_SPAN;
use crate::page_table::pd::PdIndex;
use crate::page_table::pt::PtIndex;
use kernel_memory_addresses::VirtualAddress;

/// Address arithmetic for the self-mapped directory window.
#[derive(Debug, Copy, Clone)]
pub struct SelfMap;

impl SelfMap {
    /// Directory slot that holds the self-map.
    pub const SLOT: PdIndex = PdIndex::SELF_MAP;

    /// First address of the window through which page tables are visible.
    pub const WINDOW: VirtualAddress = Self::SLOT.base();

    /// Bytes occupied by one entry in a directory or table.
    const ENTRY_SIZE: u32 = 4;

    /// Where the active directory itself is visible.
    #[inline]
    #[must_use]
    pub const fn directory() -> VirtualAddress {
        Self::table(Self::SLOT)
    }

    /// Where the directory entry governing `va` is visible.
    #[inline]
    #[must_use]
    pub const fn directory_entry(va: VirtualAddress) -> VirtualAddress {
        let pd = PdIndex::from(va);
        VirtualAddress::new(Self::directory().as_u32() | pd.as_u32() * Self::ENTRY_SIZE)
    }

    /// Where the page table installed in directory slot `slot` is visible.
    #[inline]
    #[must_use]
    pub const fn table(slot: PdIndex) -> VirtualAddress {
        VirtualAddress::new(Self::WINDOW.as_u32() | slot.as_u32() << 12)
    }

    /// Where the page table entry governing `va` is visible.
    #[inline]
    #[must_use]
    pub const fn table_entry(va: VirtualAddress) -> VirtualAddress {
        let pt = PtIndex::from(va);
        VirtualAddress::new(
            Self::table(PdIndex::from(va)).as_u32() | pt.as_u32() * Self::ENTRY_SIZE,
        )
    }

    /// The last page of the 4 MiB window containing `va`, where the window's
    /// page table maps itself.
    #[inline]
    #[must_use]
    pub const fn table_page(va: VirtualAddress) -> VirtualAddress {
        VirtualAddress::new((va.as_u32() & !(TABLE_SPAN - 1)) | (PtIndex::LAST.as_u32() << 12))
    }

    /// Whether `va` lies on the [`table_page`](Self::table_page) of its window.
    #[inline]
    #[must_use]
    pub const fn is_table_page(va: VirtualAddress) -> bool {
        PtIndex::from(va).as_u32() == PtIndex::LAST.as_u32()
    }

    /// Whether `va` falls into the self-map window.
    #[inline]
    #[must_use]
    pub const fn contains(va: VirtualAddress) -> bool {
        va.as_u32() >= Self::WINDOW.as_u32()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_matches_layout_constant() {
        assert_eq!(SelfMap::WINDOW, kernel_info::memory::SELF_MAP_BASE);
        assert_eq!(SelfMap::WINDOW.as_u32(), 0xFFC0_0000);
    }

    #[test]
    fn directory_address() {
        assert_eq!(SelfMap::directory().as_u32(), 0xFFFF_F000);
    }

    #[test]
    fn directory_entry_addresses() {
        assert_eq!(SelfMap::directory_entry(VirtualAddress::new(0)).as_u32(), 0xFFFF_F000);
        assert_eq!(
            SelfMap::directory_entry(VirtualAddress::new(0x2000_0000)).as_u32(),
            0xFFFF_F000 + 0x80 * 4
        );
        assert_eq!(
            SelfMap::directory_entry(VirtualAddress::new(0xFFFF_FFFF)).as_u32(),
            0xFFFF_FFFC
        );
    }

    #[test]
    fn table_addresses() {
        assert_eq!(SelfMap::table(PdIndex::new(0)).as_u32(), 0xFFC0_0000);
        assert_eq!(SelfMap::table(PdIndex::new(0x80)).as_u32(), 0xFFC8_0000);
        assert_eq!(
            SelfMap::table_entry(VirtualAddress::new(0x2000_3000)).as_u32(),
            0xFFC8_0000 + 3 * 4
        );
    }

    #[test]
    fn table_entry_of_window_is_directory_entry() {
        // Walking through the self-map twice lands on the directory.
        let va = VirtualAddress::new(0x2000_3000);
        let pte = SelfMap::table_entry(va);
        assert_eq!(SelfMap::table_entry(pte).page_base(), SelfMap::directory());
        assert_eq!(
            SelfMap::table_entry(SelfMap::table(PdIndex::new(0x80))),
            SelfMap::directory_entry(va)
        );
    }

    #[test]
    fn last_page_of_each_window_holds_its_table() {
        for va in [0x2000_0000, 0x2000_3abc, 0x203F_FFFF] {
            assert_eq!(SelfMap::table_page(VirtualAddress::new(va)).as_u32(), 0x203F_F000);
        }
        assert_eq!(SelfMap::table_page(VirtualAddress::new(0x0040_0000)).as_u32(), 0x007F_F000);
        assert!(SelfMap::is_table_page(VirtualAddress::new(0x203F_F123)));
        assert!(!SelfMap::is_table_page(VirtualAddress::new(0x203F_E000)));
        assert!(!SelfMap::is_table_page(VirtualAddress::new(0x2040_0000)));
    }

    #[test]
    fn window_membership() {
        assert!(SelfMap::contains(VirtualAddress::new(0xFFC0_0000)));
        assert!(!SelfMap::contains(VirtualAddress::new(0xFFBF_FFFF)));
    }
}
