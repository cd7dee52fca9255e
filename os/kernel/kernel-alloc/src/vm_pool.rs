//! # Virtual Memory Pools
//!
//! A [`VmPool`] hands out page-granular regions of a fixed virtual range.
//! Allocation only reserves addresses; the pages are backed one at a time
//! by the page fault handler, which asks the pools whether a faulting
//! address is [legitimate](VmPool::is_legitimate) and takes the frames from
//! the pool's [`frame_pool`](VmPool::frame_pool).
//!
//! ```text
//! base                         base + 2 pages                      base + size
//! | free     | allocated |     |
//! | records  | records   |     | allocated | free ... | allocated | free |
//! ```
//!
//! The first [`MANAGEMENT_PAGES`] pages hold the pool's own [`RegionRecords`]:
//! one page of free regions, one page of allocated regions. They are never
//! handed out and are always legitimate.
//! Free space is tracked as a list of free regions; allocation is first fit
//! and takes from the front of a free region. Released regions are not
//! merged with their neighbours.
//!
//! The last page of every 4 MiB window is where that window's page table
//! maps itself ([`SelfMap::table_page`]). The initial free regions stop short
//! of those pages, so no region ever contains one.

use crate::frame_alloc::FramePoolId;
use core::num::NonZeroU32;
use kernel_memory_addresses::{PAGE_SIZE, VirtualAddress, pages_for};
use kernel_vmem::SelfMap;

/// Pages at the start of every pool reserved for bookkeeping.
pub const MANAGEMENT_PAGES: u32 = 2;

/// Region records per table; one management page worth of records.
pub const MAX_REGIONS: usize = PAGE_SIZE as usize / size_of::<Option<Region>>();

/// One management page of region records.
pub type RegionTable = [Option<Region>; MAX_REGIONS];

const _: () = assert!(MAX_REGIONS == 512);
const _: () = assert!(size_of::<RegionTable>() == PAGE_SIZE as usize);

/// A non-empty, page-aligned span of virtual memory.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Region {
    start: VirtualAddress,
    pages: NonZeroU32,
}

impl Region {
    #[inline]
    #[must_use]
    pub const fn new(start: VirtualAddress, pages: NonZeroU32) -> Self {
        Self { start, pages }
    }

    #[inline]
    #[must_use]
    pub const fn start(&self) -> VirtualAddress {
        self.start
    }

    #[inline]
    #[must_use]
    pub const fn pages(&self) -> u32 {
        self.pages.get()
    }

    #[inline]
    #[must_use]
    pub const fn bytes(&self) -> u32 {
        self.pages.get() * PAGE_SIZE
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, va: VirtualAddress) -> bool {
        va.as_u32() >= self.start.as_u32() && va.as_u32() - self.start.as_u32() < self.bytes()
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmPoolError {
    #[error("no free region of {requested_pages} pages")]
    OutOfVirtualMemory { requested_pages: u32 },
    #[error("region record table is full")]
    RecordsExhausted,
}

/// The free and allocated region tables of one pool.
pub struct RegionRecords<'m> {
    free: &'m mut RegionTable,
    allocated: &'m mut RegionTable,
}

impl<'m> RegionRecords<'m> {
    /// Keep the records in `free` and `allocated`; both are cleared.
    #[must_use]
    pub fn new(free: &'m mut RegionTable, allocated: &'m mut RegionTable) -> Self {
        free.fill(None);
        allocated.fill(None);
        Self { free, allocated }
    }

    /// Lay out two empty tables over raw pages, usually the pool's own
    /// management pages.
    ///
    /// # Safety
    /// Both pointers must be page aligned, writable for a whole page, distinct,
    /// and used by nothing else for `'m`.
    #[must_use]
    pub unsafe fn from_pages(free: *mut u8, allocated: *mut u8) -> Self {
        // SAFETY: upheld by the caller.
        unsafe {
            Self {
                free: empty_table(free),
                allocated: empty_table(allocated),
            }
        }
    }
}

/// # Safety
/// See [`RegionRecords::from_pages`].
#[allow(clippy::cast_ptr_alignment)]
unsafe fn empty_table<'m>(page: *mut u8) -> &'m mut RegionTable {
    debug_assert!(page.addr().is_multiple_of(PAGE_SIZE as usize));
    let slots = page.cast::<Option<Region>>();
    for i in 0..MAX_REGIONS {
        // SAFETY: the page has room for `MAX_REGIONS` records.
        unsafe { slots.add(i).write(None) };
    }
    // SAFETY: every record was just written.
    unsafe { &mut *page.cast::<RegionTable>() }
}

/// A virtual address range with first-fit region allocation.
pub struct VmPool<'m> {
    base: VirtualAddress,
    size: u32,
    frame_pool: FramePoolId,
    capacity: u32,
    records: RegionRecords<'m>,
}

impl<'m> VmPool<'m> {
    /// Check that `[base, base + size)` can hold a pool and return the
    /// addresses of its management pages.
    ///
    /// ### Panics
    /// - If `base` or `size` is not page aligned, the range wraps around or
    ///   reaches into the self-map window, it has no pages beyond the
    ///   management pages, or a management page is the table page of its
    ///   window.
    #[must_use]
    pub fn management_pages(
        base: VirtualAddress,
        size: u32,
    ) -> [VirtualAddress; MANAGEMENT_PAGES as usize] {
        assert!(base.is_page_aligned(), "pool base {base} is not page aligned");
        assert!(size.is_multiple_of(PAGE_SIZE), "pool size {size:#x} is not page aligned");
        let Some(end) = base.checked_add(size) else {
            panic!("pool {base}..+{size:#x} wraps around the address space");
        };
        assert!(
            end.as_u32() <= SelfMap::WINDOW.as_u32(),
            "pool {base}..+{size:#x} reaches into the self-map window"
        );
        assert!(
            size / PAGE_SIZE > MANAGEMENT_PAGES,
            "pool of {size:#x} bytes has no room beyond its management pages"
        );

        let mut pages = [base; MANAGEMENT_PAGES as usize];
        let mut va = base;
        for page in &mut pages {
            assert!(
                !SelfMap::is_table_page(va),
                "management page {va} is the page table slot of its window"
            );
            *page = va;
            va += PAGE_SIZE;
        }
        pages
    }

    /// Manage `[base, base + size)`, keeping the region tables in `records`;
    /// pages are backed from `frame_pool`.
    ///
    /// The free space past the management pages is split at the table page
    /// of every 4 MiB window, one free region per window.
    ///
    /// ### Panics
    /// - See [`management_pages`](Self::management_pages).
    /// - If the range spans more windows than there are free records.
    #[must_use]
    pub fn new(
        base: VirtualAddress,
        size: u32,
        frame_pool: FramePoolId,
        mut records: RegionRecords<'m>,
    ) -> Self {
        let _ = Self::management_pages(base, size);
        let end = base.as_u32() + size;

        let mut capacity = 0;
        let mut slots = records.free.iter_mut();
        let mut next = base.as_u32() + MANAGEMENT_PAGES * PAGE_SIZE;
        while next < end {
            let table_page = SelfMap::table_page(VirtualAddress::new(next)).as_u32();
            if let Some(pages) = NonZeroU32::new((table_page.min(end) - next) / PAGE_SIZE) {
                let Some(slot) = slots.next() else {
                    panic!("pool {base}..+{size:#x} spans more windows than it has free records");
                };
                *slot = Some(Region::new(VirtualAddress::new(next), pages));
                capacity += pages.get();
            }
            next = table_page + PAGE_SIZE;
        }
        assert!(
            capacity > 0,
            "pool of {size:#x} bytes has no room beyond its management pages"
        );

        log::debug!(
            "vm pool {base}..+{size:#x} created, {capacity} pages, frames from pool {}",
            frame_pool.index()
        );
        Self {
            base,
            size,
            frame_pool,
            capacity,
            records,
        }
    }

    #[inline]
    #[must_use]
    pub const fn base(&self) -> VirtualAddress {
        self.base
    }

    #[inline]
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.size
    }

    /// The frame pool that backs this pool's pages and page tables.
    #[inline]
    #[must_use]
    pub const fn frame_pool(&self) -> FramePoolId {
        self.frame_pool
    }

    /// Pages available for allocation in an empty pool. Management pages and
    /// window table pages do not count.
    #[inline]
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    #[inline]
    const fn first_allocatable(&self) -> u32 {
        self.base.as_u32() + MANAGEMENT_PAGES * PAGE_SIZE
    }

    #[inline]
    #[must_use]
    pub const fn contains(&self, va: VirtualAddress) -> bool {
        va.as_u32() >= self.base.as_u32() && va.as_u32() - self.base.as_u32() < self.size
    }

    pub fn allocated_regions(&self) -> impl Iterator<Item = &Region> {
        self.records.allocated.iter().flatten()
    }

    pub fn free_regions(&self) -> impl Iterator<Item = &Region> {
        self.records.free.iter().flatten()
    }

    /// Reserve `bytes` rounded up to whole pages; returns the region start.
    ///
    /// ### Panics
    /// - If `bytes == 0` or the request exceeds the pool's capacity.
    ///
    /// # Errors
    /// - [`VmPoolError::OutOfVirtualMemory`] if no free region is large enough.
    /// - [`VmPoolError::RecordsExhausted`] if every allocated record is taken.
    pub fn allocate(&mut self, bytes: u32) -> Result<VirtualAddress, VmPoolError> {
        let Some(pages) = NonZeroU32::new(pages_for(bytes)) else {
            panic!("cannot allocate zero bytes");
        };
        assert!(
            pages.get() <= self.capacity(),
            "request of {pages} pages exceeds the pool capacity of {}",
            self.capacity()
        );

        let Some((fi, hole)) = self
            .records
            .free
            .iter()
            .enumerate()
            .find_map(|(i, r)| r.filter(|r| r.pages() >= pages.get()).map(|r| (i, r)))
        else {
            log::warn!("vm pool {}: no free region of {pages} pages", self.base);
            return Err(VmPoolError::OutOfVirtualMemory {
                requested_pages: pages.get(),
            });
        };
        let Some(ai) = self.records.allocated.iter().position(Option::is_none) else {
            log::warn!("vm pool {}: allocated region table full", self.base);
            return Err(VmPoolError::RecordsExhausted);
        };

        let start = hole.start();
        self.records.allocated[ai] = Some(Region::new(start, pages));
        self.records.free[fi] = NonZeroU32::new(hole.pages() - pages.get())
            .map(|rest| Region::new(start + pages.get() * PAGE_SIZE, rest));

        log::trace!("vm pool {}: allocated {start}..+{pages} pages", self.base);
        Ok(start)
    }

    /// Return the allocated region starting at `start` to the free list.
    ///
    /// The caller is responsible for freeing the pages that back the region.
    ///
    /// ### Panics
    /// - If `start` is not page aligned, lies in the management pages, is not
    ///   legitimate, or is not the start of an allocated region.
    ///
    /// # Errors
    /// [`VmPoolError::RecordsExhausted`] if the free record table is full; the
    /// region then stays allocated.
    pub fn release(&mut self, start: VirtualAddress) -> Result<Region, VmPoolError> {
        assert!(start.is_page_aligned(), "release of unaligned address {start}");
        assert!(
            start.as_u32() >= self.first_allocatable(),
            "release of {start} inside the management pages"
        );
        assert!(self.is_legitimate(start), "release of {start}, which is not allocated");
        let Some((ai, region)) = self
            .records
            .allocated
            .iter()
            .enumerate()
            .find_map(|(i, r)| r.filter(|r| r.start() == start).map(|r| (i, r)))
        else {
            panic!("release of {start}, which does not start an allocated region");
        };
        let Some(fi) = self.records.free.iter().position(Option::is_none) else {
            log::warn!("vm pool {}: free region table full", self.base);
            return Err(VmPoolError::RecordsExhausted);
        };

        self.records.allocated[ai] = None;
        self.records.free[fi] = Some(region);
        log::trace!("vm pool {}: released {start}..+{} pages", self.base, region.pages());
        Ok(region)
    }

    /// Whether `va` lies in one of the pages holding the region records.
    #[inline]
    #[must_use]
    pub const fn is_management_page(&self, va: VirtualAddress) -> bool {
        self.contains(va) && va.as_u32() < self.first_allocatable()
    }

    /// Whether an access to `va` may be backed by this pool: it lies in the
    /// management pages or in an allocated region.
    #[must_use]
    pub fn is_legitimate(&self, va: VirtualAddress) -> bool {
        self.is_management_page(va) || self.allocated_regions().any(|r| r.contains(va))
    }
}
