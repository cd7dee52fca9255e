//! # Paging Bring-Up
//!
//! Builds the page tables that identity map the low *shared* region, and
//! flips CR0.PG once an address space that includes them is loaded.
//!
//! ```text
//! kernel pool:  [ table 0 | table 1 | ... ]        ceil(pages / 1024) frames
//! table t, i:   page t*1024 + i  ->  frame t*1024 + i
//! ```
//!
//! Every address space links the same shared tables into its low directory
//! slots, so kernel code, the kernel frame pool and the bitmaps stored there
//! stay reachable at their physical addresses with paging on.

use crate::frame_alloc::{FrameAllocError, FramePoolId, FramePoolRegistry};
use kernel_memory_addresses::{FrameNumber, pages_for};
use kernel_registers::ControlRegisters;
use kernel_vmem::page_table::ENTRIES;
use kernel_vmem::{PageEntryBits, PageTable, PhysMapper, PtEntry, PtIndex};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum PagingError {
    #[error("out of frames for paging structures: {0}")]
    OutOfFrames(#[from] FrameAllocError),
}

/// The identity mapped low region and the tables describing it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SharedRegion {
    first_table: FrameNumber,
    tables: u32,
    bytes: u32,
}

impl SharedRegion {
    /// Frame of the first table; the rest follow contiguously.
    #[inline]
    #[must_use]
    pub const fn first_table(&self) -> FrameNumber {
        self.first_table
    }

    #[inline]
    #[must_use]
    pub const fn table_count(&self) -> u32 {
        self.tables
    }

    /// Size of the identity mapped region in bytes.
    #[inline]
    #[must_use]
    pub const fn bytes(&self) -> u32 {
        self.bytes
    }

    /// One past the last identity mapped frame.
    #[inline]
    #[must_use]
    pub const fn frame_limit(&self) -> FrameNumber {
        FrameNumber::new(pages_for(self.bytes))
    }

    /// Table frames in directory slot order.
    pub fn tables(&self) -> impl Iterator<Item = FrameNumber> + use<> {
        let first = self.first_table;
        (0..self.tables).map(move |t| first + t)
    }
}

/// Allocate and fill the identity mapping tables for the first `shared_size`
/// bytes of physical memory, taking the tables from `kernel_pool`.
///
/// ### Panics
/// - If paging is already enabled, or `shared_size == 0`.
///
/// # Errors
/// [`PagingError::OutOfFrames`] if the kernel pool has no contiguous run of
/// table frames left.
#[allow(clippy::cast_possible_truncation)]
pub fn init_paging<M: PhysMapper, R: ControlRegisters>(
    frames: &mut FramePoolRegistry<'_>,
    kernel_pool: FramePoolId,
    mapper: &M,
    regs: &R,
    shared_size: u32,
) -> Result<SharedRegion, PagingError> {
    assert!(!regs.paging_enabled(), "paging is already enabled");
    assert!(shared_size > 0, "the shared region must not be empty");

    let pages = pages_for(shared_size);
    let tables = pages.div_ceil(ENTRIES as u32);
    let first_table = frames.get_frames(kernel_pool, tables)?;

    let flags = PageEntryBits::new_common_rw();
    for t in 0..tables {
        // SAFETY: freshly allocated kernel pool frame, reachable before paging.
        let table: &mut PageTable = unsafe { mapper.phys_to_mut((first_table + t).base()) };
        table.zero();
        for i in 0..ENTRIES as u32 {
            let page = t * ENTRIES as u32 + i;
            if page >= pages {
                break;
            }
            #[allow(clippy::cast_possible_truncation)]
            table.set(PtIndex::new(i as u16), PtEntry::make_4k(FrameNumber::new(page), flags));
        }
    }

    log::debug!(
        "shared region: {shared_size} bytes, {tables} table(s) from frame {first_table}"
    );
    Ok(SharedRegion {
        first_table,
        tables,
        bytes: shared_size,
    })
}

/// Set CR0.PG.
///
/// # Safety
/// CR3 must hold a directory that maps the executing code and stack.
pub unsafe fn enable_paging<R: ControlRegisters>(regs: &R) {
    let cr0 = regs.cr0().with_pg_paging(true);
    unsafe { regs.write_cr0(cr0) };
    log::info!("paging enabled");
}
