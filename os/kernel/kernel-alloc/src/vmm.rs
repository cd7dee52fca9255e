//! # Per-Address-Space Virtual Memory Manager
//!
//! A [`Vmm`] owns one [`AddressSpace`] and the [`VmPool`]s registered with
//! it, and resolves page faults by demand paging:
//!
//! ```text
//! fault at va ──► newest registered pool that calls va legitimate
//!                 │            └── none: segmentation fault
//!                 ▼
//!           page table for va's 4 MiB window present?
//!                 │            └── no: frame from the pool's frame pool,
//!                 │                    link, zero, self-map in slot 1023
//!                 ▼
//!           frame from the pool's frame pool ──► PTE for va
//! ```
//!
//! Faults are only handled for the address space currently loaded in CR3.
//! Pages stay mapped until [`Vmm::free_pages`] (usually via
//! [`Vmm::release`]) hands their frames back to their pools.
//!
//! [`Vmm::create_pool`] backs a new pool's management pages the same way a
//! fault would and keeps the pool's region records there.
//!
//! # Example
//! ```ignore
//! let mut space = Vmm::new(&shared, &mut frames, kernel_pool, &mapper, &regs)?;
//! unsafe { space.load() };
//! let heap = space.create_pool(&mut frames, base, size, kernel_pool)?;
//! let va = space.allocate(heap, 8192)?;
//! space.handle_fault(&mut frames, va)?;
//! ```

use crate::frame_alloc::{FrameAllocError, FramePoolId, FramePoolRegistry};
use crate::paging::{PagingError, SharedRegion};
use crate::vm_pool::{MANAGEMENT_PAGES, Region, RegionRecords, VmPool, VmPoolError};
use kernel_memory_addresses::{FrameNumber, PAGE_SIZE, PhysicalAddress, VirtualAddress, pages_for};
use kernel_registers::ControlRegisters;
use kernel_vmem::{AddressSpace, Mapping, PageEntryBits, PhysMapper};

/// Maximum number of VM pools per address space.
pub const MAX_VM_POOLS: usize = 4;

/// Handle of a pool registered with a [`Vmm`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct VmPoolId(usize);

impl VmPoolId {
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum PageFaultError {
    #[error("segmentation fault at {address}")]
    Segfault { address: VirtualAddress },
    #[error("out of frames while resolving a page fault: {0}")]
    OutOfFrames(#[from] FrameAllocError),
    #[error("page fault while the memory manager was busy")]
    ManagerBusy,
}

/// What a handled fault changed.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FaultResolution {
    /// The pool that claimed the address.
    pub pool: VmPoolId,
    /// Frame now backing the faulting page.
    pub page: FrameNumber,
    /// Page table created for the fault, if one was missing.
    pub table: Option<FrameNumber>,
}

/// One address space and its VM pools.
pub struct Vmm<'m, M: PhysMapper, R: ControlRegisters> {
    aspace: AddressSpace<'m, M>,
    regs: &'m R,
    /// In registration order.
    pools: [Option<VmPool<'m>>; MAX_VM_POOLS],
}

impl<'m, M: PhysMapper, R: ControlRegisters> Vmm<'m, M, R> {
    /// Create an address space whose directory is taken from `frame_pool`.
    ///
    /// The directory links the shared tables into its low slots and maps
    /// itself in its last slot. The directory frame must be reachable
    /// through `mapper` without the self-map.
    ///
    /// # Errors
    /// [`PagingError::OutOfFrames`] if `frame_pool` is exhausted.
    pub fn new(
        shared: &SharedRegion,
        frames: &mut FramePoolRegistry<'_>,
        frame_pool: FramePoolId,
        mapper: &'m M,
        regs: &'m R,
    ) -> Result<Self, PagingError> {
        let directory = frames.get_frames(frame_pool, 1)?;
        let aspace = AddressSpace::from_directory(mapper, directory);
        aspace.init_directory(shared.tables(), PageEntryBits::new_common_rw());
        log::debug!("address space created, directory at frame {directory}");

        Ok(Self {
            aspace,
            regs,
            pools: [const { None }; MAX_VM_POOLS],
        })
    }

    #[inline]
    #[must_use]
    pub const fn directory_frame(&self) -> FrameNumber {
        self.aspace.directory_frame()
    }

    #[inline]
    #[must_use]
    pub const fn address_space(&self) -> &AddressSpace<'m, M> {
        &self.aspace
    }

    /// Make this the current address space.
    ///
    /// # Safety
    /// The directory must map the executing code and stack (the shared region
    /// takes care of that for code living there).
    pub unsafe fn load(&self) {
        unsafe { self.aspace.activate(self.regs) };
        log::debug!("address space at frame {} loaded", self.directory_frame());
    }

    /// Whether CR3 holds this address space.
    #[inline]
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.aspace.is_active(self.regs)
    }

    /// Create a pool over `[base, base + size)` backed by `frame_pool` and
    /// register it.
    ///
    /// Both management pages are mapped right away, with frames (and a page
    /// table, if the window has none) from `frame_pool`, and hold the pool's
    /// region records from then on.
    ///
    /// ### Panics
    /// - If this address space is not loaded, or no pool slot is free.
    /// - If a management page is already mapped.
    /// - See [`VmPool::management_pages`].
    ///
    /// # Errors
    /// [`FrameAllocError`] if `frame_pool` cannot back the management pages.
    pub fn create_pool(
        &mut self,
        frames: &mut FramePoolRegistry<'_>,
        base: VirtualAddress,
        size: u32,
        frame_pool: FramePoolId,
    ) -> Result<VmPoolId, FrameAllocError> {
        assert!(
            self.is_active(),
            "vm pool created in an address space that is not loaded"
        );
        let index = self.free_slot();
        let pages = VmPool::management_pages(base, size);

        let mut records = [core::ptr::null_mut(); MANAGEMENT_PAGES as usize];
        for (i, (va, record)) in pages.into_iter().zip(&mut records).enumerate() {
            let mapping = self.aspace.mapping(va);
            assert!(
                !matches!(mapping, Mapping::Page { .. }),
                "management page {va} is already mapped ({mapping:?})"
            );
            if let Err(e) = self.back_page(frames, frame_pool, va) {
                for &mapped in &pages[..i] {
                    if let Some(frame) = self.aspace.unmap_page(mapped) {
                        frames.release_frames(frame);
                    }
                }
                log::warn!("vm pool at {base} not created: {e}");
                return Err(e);
            }
            // SAFETY: the space is loaded and `va` was mapped just now.
            let Some(ptr) = (unsafe { self.aspace.page_ptr(va) }) else {
                panic!("management page {va} did not get mapped");
            };
            *record = ptr;
        }

        // SAFETY: two fresh frames, mapped for as long as the pool is
        // registered; `free_pages` skips management pages.
        let records = unsafe { RegionRecords::from_pages(records[0], records[1]) };
        let pool = VmPool::new(base, size, frame_pool, records);
        Ok(self.insert_pool(index, pool))
    }

    /// Register `pool` so its addresses are considered by the fault handler.
    /// Pools are not checked for overlap; the newest registration wins.
    ///
    /// ### Panics
    /// - If [`MAX_VM_POOLS`] pools are already registered.
    pub fn register_pool(&mut self, pool: VmPool<'m>) -> VmPoolId {
        let index = self.free_slot();
        self.insert_pool(index, pool)
    }

    fn free_slot(&self) -> usize {
        let Some(index) = self.pools.iter().position(Option::is_none) else {
            panic!("no free vm pool slot (limit {MAX_VM_POOLS})");
        };
        index
    }

    fn insert_pool(&mut self, index: usize, pool: VmPool<'m>) -> VmPoolId {
        log::debug!(
            "vm pool {index} registered: {}..+{:#x}",
            pool.base(),
            pool.size()
        );
        self.pools[index] = Some(pool);
        VmPoolId(index)
    }

    /// ### Panics
    /// - If `id` is not registered here.
    #[must_use]
    pub fn pool(&self, id: VmPoolId) -> &VmPool<'m> {
        let Some(pool) = self.pools.get(id.0).and_then(Option::as_ref) else {
            panic!("vm pool {} is not registered", id.0);
        };
        pool
    }

    /// ### Panics
    /// - If `id` is not registered here.
    pub fn pool_mut(&mut self, id: VmPoolId) -> &mut VmPool<'m> {
        let Some(pool) = self.pools.get_mut(id.0).and_then(Option::as_mut) else {
            panic!("vm pool {} is not registered", id.0);
        };
        pool
    }

    /// Registered pools, newest first.
    pub fn pools(&self) -> impl Iterator<Item = (VmPoolId, &VmPool<'m>)> {
        self.pools
            .iter()
            .enumerate()
            .rev()
            .filter_map(|(i, p)| p.as_ref().map(|p| (VmPoolId(i), p)))
    }

    /// The newest registered pool for which `va` is legitimate.
    #[must_use]
    pub fn legitimate_pool(&self, va: VirtualAddress) -> Option<VmPoolId> {
        self.pools()
            .find(|(_, p)| p.is_legitimate(va))
            .map(|(id, _)| id)
    }

    /// Reserve a region in pool `id`. No frames are touched.
    ///
    /// # Errors
    /// See [`VmPool::allocate`].
    pub fn allocate(&mut self, id: VmPoolId, bytes: u32) -> Result<VirtualAddress, VmPoolError> {
        self.pool_mut(id).allocate(bytes)
    }

    /// Release the region starting at `start` in pool `id` and free the
    /// pages backing it.
    ///
    /// # Errors
    /// See [`VmPool::release`]; nothing is freed on error.
    pub fn release(
        &mut self,
        frames: &mut FramePoolRegistry<'_>,
        id: VmPoolId,
        start: VirtualAddress,
    ) -> Result<Region, VmPoolError> {
        let region = self.pool_mut(id).release(start)?;
        self.free_pages(frames, region.start(), region.bytes());
        Ok(region)
    }

    /// Back the page containing `va`.
    ///
    /// ### Panics
    /// - If this address space is not loaded, or the page is already mapped.
    ///
    /// # Errors
    /// - [`PageFaultError::Segfault`] if no registered pool claims `va`.
    /// - [`PageFaultError::OutOfFrames`] if the owning frame pool is exhausted.
    pub fn handle_fault(
        &mut self,
        frames: &mut FramePoolRegistry<'_>,
        va: VirtualAddress,
    ) -> Result<FaultResolution, PageFaultError> {
        assert!(
            self.is_active(),
            "page fault routed to an address space that is not loaded"
        );

        let Some(pool) = self.legitimate_pool(va) else {
            log::error!("segmentation fault: {va} is not part of any allocated region");
            return Err(PageFaultError::Segfault { address: va });
        };
        let frame_pool = self.pool(pool).frame_pool();
        let (page, table) = self.back_page(frames, frame_pool, va)?;
        Ok(FaultResolution { pool, page, table })
    }

    /// Map a frame from `frame_pool` at `va`, creating the window's page
    /// table first if it is missing. Returns the page frame and the new
    /// table, if any.
    fn back_page(
        &mut self,
        frames: &mut FramePoolRegistry<'_>,
        frame_pool: FramePoolId,
        va: VirtualAddress,
    ) -> Result<(FrameNumber, Option<FrameNumber>), FrameAllocError> {
        let flags = PageEntryBits::new_common_rw();

        let mut table = None;
        if self.aspace.mapping(va) == Mapping::NoTable {
            let frame = frames.get_frames(frame_pool, 1)?;
            self.aspace.install_table(va, frame, flags);
            log::debug!("page table at frame {frame} created for {va}");
            table = Some(frame);
        }

        let mapping = self.aspace.mapping(va);
        assert!(
            matches!(mapping, Mapping::NotPresent { .. }),
            "page fault at {va} on a present entry ({mapping:?})"
        );

        let page = frames.get_frames(frame_pool, 1)?;
        self.aspace.map_page(va, page, flags);
        Ok((page, table))
    }

    /// Unmap every page of `[start, start + size)` that is backed, returning
    /// the frames to their pools, then flush the TLB.
    ///
    /// Missing tables, table self-map entries and the management pages of
    /// registered pools are skipped; page tables and region records are
    /// never freed.
    ///
    /// ### Panics
    /// - If this address space is not loaded, or `start` is not page aligned.
    pub fn free_pages(
        &mut self,
        frames: &mut FramePoolRegistry<'_>,
        start: VirtualAddress,
        size: u32,
    ) {
        assert!(self.is_active(), "free_pages on an address space that is not loaded");
        assert!(start.is_page_aligned(), "free_pages at unaligned address {start}");

        let mut freed = 0;
        for page in 0..pages_for(size) {
            let va = start + page * PAGE_SIZE;
            if self.pools().any(|(_, p)| p.is_management_page(va)) {
                continue;
            }
            if let Mapping::Page { frame, .. } = self.aspace.mapping(va) {
                frames.release_frames(frame);
                self.aspace.unmap_page(va);
                freed += 1;
            }
        }

        // SAFETY: reloading the directory that is already active.
        unsafe { self.aspace.activate(self.regs) };
        log::trace!("{start}..+{size:#x}: {freed} page(s) freed");
    }

    /// Software walk of the paging structures.
    #[inline]
    #[must_use]
    pub fn mapping(&self, va: VirtualAddress) -> Mapping {
        self.aspace.mapping(va)
    }

    /// Translate `va` if mapped.
    #[inline]
    #[must_use]
    pub fn query(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        self.aspace.query(va)
    }
}
