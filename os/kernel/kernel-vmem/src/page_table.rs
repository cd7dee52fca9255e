//! # i386 Paging Structures

pub mod pd;
pub mod pt;

use crate::page_table::pd::PdIndex;
use crate::page_table::pt::PtIndex;
use kernel_memory_addresses::VirtualAddress;

/// Entries per page directory and per page table.
pub const ENTRIES: usize = 1024;

/// Bytes of virtual memory covered by one page table (4 MiB).
pub const TABLE_SPAN: u32 = 4 * 1024 * 1024;

/// Split a virtual address into its directory and table indices.
#[inline]
#[must_use]
pub const fn split_indices(va: VirtualAddress) -> (PdIndex, PtIndex) {
    (PdIndex::from(va), PtIndex::from(va))
}
