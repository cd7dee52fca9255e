//! # Memory Manager
//!
//! [`MemoryManager`] ties the pieces together for one CPU: the frame pool
//! registry, the shared identity mapped region, the loaded address space and
//! the VM pool that serves allocation requests. It is an explicit context
//! object; the kernel keeps exactly one, typically inside a
//! [`KernelHeap`](crate::heap::KernelHeap).
//!
//! [`MemoryManager::boot`] performs the standard bring-up using the layout in
//! [`kernel_info::memory`].

use crate::frame_alloc::{FrameAllocError, FramePoolId, FramePoolRegistry, needed_info_frames};
use crate::paging::{self, PagingError, SharedRegion};
use crate::vm_pool::{VmPool, VmPoolError};
use crate::vmm::{FaultResolution, PageFaultError, VmPoolId, Vmm};
use core::alloc::Layout;
use kernel_info::memory::{
    KERNEL_HEAP_BASE, KERNEL_HEAP_SIZE, KERNEL_POOL_SIZE, KERNEL_POOL_START_FRAME, MEM_HOLE_SIZE,
    MEM_HOLE_START_FRAME, PROCESS_POOL_SIZE, PROCESS_POOL_START_FRAME, SHARED_SIZE,
};
use kernel_memory_addresses::{FrameNumber, PAGE_SIZE, VirtualAddress, pages_for};
use kernel_registers::ControlRegisters;
use kernel_vmem::{PageFaultErrorCode, PhysMapper};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum AllocError {
    #[error(transparent)]
    VirtualMemory(#[from] VmPoolError),
    #[error("alignment {align} exceeds the page size")]
    Alignment { align: usize },
    #[error("a request of {bytes} bytes cannot be served by the current pool")]
    Size { bytes: usize },
}

/// Pools created by [`MemoryManager::boot`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BootPools {
    pub kernel: FramePoolId,
    pub process: FramePoolId,
    pub heap: VmPoolId,
}

pub struct MemoryManager<'m, M: PhysMapper, R: ControlRegisters> {
    mapper: &'m M,
    regs: &'m R,
    frames: FramePoolRegistry<'m>,
    shared: Option<SharedRegion>,
    space: Option<Vmm<'m, M, R>>,
    current_pool: Option<VmPoolId>,
}

impl<'m, M: PhysMapper, R: ControlRegisters> MemoryManager<'m, M, R> {
    #[must_use]
    pub const fn new(mapper: &'m M, regs: &'m R) -> Self {
        Self {
            mapper,
            regs,
            frames: FramePoolRegistry::new(),
            shared: None,
            space: None,
            current_pool: None,
        }
    }

    /// Standard bring-up:
    ///
    /// 1. kernel frame pool with its state map in its own first frame,
    /// 2. process frame pool with its state map in kernel frames,
    /// 3. the memory hole marked inaccessible,
    /// 4. shared tables, kernel address space, paging on,
    /// 5. the kernel heap pool, its records in kernel frames, loaded for
    ///    allocation.
    ///
    /// # Safety
    /// Paging must be off and the layout in [`kernel_info::memory`] must
    /// describe real, unused RAM. Enables paging.
    ///
    /// # Errors
    /// [`PagingError::OutOfFrames`] if the kernel pool cannot hold the paging
    /// structures or the heap's management pages.
    pub unsafe fn boot(mapper: &'m M, regs: &'m R) -> Result<(Self, BootPools), PagingError> {
        let mut mm = Self::new(mapper, regs);

        // SAFETY: the kernel pool is free RAM below the identity limit.
        let kernel =
            unsafe { mm.create_frame_pool(KERNEL_POOL_START_FRAME, KERNEL_POOL_SIZE, None) };
        let info = mm
            .frames
            .get_frames(kernel, needed_info_frames(PROCESS_POOL_SIZE))?;
        // SAFETY: `info` was just taken from the kernel pool.
        let process = unsafe {
            mm.create_frame_pool(PROCESS_POOL_START_FRAME, PROCESS_POOL_SIZE, Some(info))
        };
        mm.frames
            .get_mut(process)
            .mark_inaccessible(MEM_HOLE_START_FRAME, MEM_HOLE_SIZE);

        mm.init_paging(kernel, SHARED_SIZE)?;
        let space = mm.new_address_space(kernel)?;
        // SAFETY: the kernel lives in the shared region, which every address space maps.
        unsafe {
            mm.load_address_space(space);
            mm.enable_paging();
        }

        let heap = mm.create_vm_pool(KERNEL_HEAP_BASE, KERNEL_HEAP_SIZE, kernel)?;
        mm.load(heap);

        log::info!(
            "memory up: {} kernel and {} process frames free, heap at {KERNEL_HEAP_BASE}",
            mm.frames.get(kernel).free_frames(),
            mm.frames.get(process).free_frames()
        );
        Ok((
            mm,
            BootPools {
                kernel,
                process,
                heap,
            },
        ))
    }

    /// Create and register a frame pool; see [`FramePoolRegistry::create`].
    ///
    /// # Safety
    /// See [`FramePoolRegistry::create`].
    pub unsafe fn create_frame_pool(
        &mut self,
        base: FrameNumber,
        count: u32,
        info_frame: Option<FrameNumber>,
    ) -> FramePoolId {
        unsafe { self.frames.create(self.mapper, base, count, info_frame) }
    }

    #[inline]
    #[must_use]
    pub const fn frames(&self) -> &FramePoolRegistry<'m> {
        &self.frames
    }

    #[inline]
    pub const fn frames_mut(&mut self) -> &mut FramePoolRegistry<'m> {
        &mut self.frames
    }

    /// Build the shared identity mapping; see [`paging::init_paging`].
    ///
    /// ### Panics
    /// - If called twice, or paging is already enabled.
    ///
    /// # Errors
    /// See [`paging::init_paging`].
    pub fn init_paging(
        &mut self,
        kernel_pool: FramePoolId,
        shared_size: u32,
    ) -> Result<SharedRegion, PagingError> {
        assert!(self.shared.is_none(), "paging is already initialized");
        let shared = paging::init_paging(
            &mut self.frames,
            kernel_pool,
            self.mapper,
            self.regs,
            shared_size,
        )?;
        self.shared = Some(shared);
        Ok(shared)
    }

    #[inline]
    #[must_use]
    pub const fn shared_region(&self) -> Option<&SharedRegion> {
        self.shared.as_ref()
    }

    /// Create an address space with its directory in `frame_pool`.
    ///
    /// ### Panics
    /// - If [`init_paging`](Self::init_paging) has not run.
    ///
    /// # Errors
    /// [`PagingError::OutOfFrames`] if `frame_pool` is exhausted.
    pub fn new_address_space(
        &mut self,
        frame_pool: FramePoolId,
    ) -> Result<Vmm<'m, M, R>, PagingError> {
        let Some(shared) = self.shared else {
            panic!("paging must be initialized before creating an address space");
        };
        Vmm::new(&shared, &mut self.frames, frame_pool, self.mapper, self.regs)
    }

    /// Load `space` and make it the one faults are routed to. The current VM
    /// pool is cleared. Returns the previously loaded space.
    ///
    /// # Safety
    /// See [`Vmm::load`].
    pub unsafe fn load_address_space(&mut self, space: Vmm<'m, M, R>) -> Option<Vmm<'m, M, R>> {
        unsafe { space.load() };
        self.current_pool = None;
        self.space.replace(space)
    }

    /// Set CR0.PG; see [`paging::enable_paging`].
    ///
    /// # Safety
    /// See [`paging::enable_paging`].
    pub unsafe fn enable_paging(&self) {
        unsafe { paging::enable_paging(self.regs) }
    }

    /// ### Panics
    /// - If no address space is loaded.
    #[must_use]
    pub fn space(&self) -> &Vmm<'m, M, R> {
        let Some(space) = &self.space else {
            panic!("no address space is loaded");
        };
        space
    }

    /// ### Panics
    /// - If no address space is loaded.
    pub fn space_mut(&mut self) -> &mut Vmm<'m, M, R> {
        let Some(space) = &mut self.space else {
            panic!("no address space is loaded");
        };
        space
    }

    /// Create a VM pool in the loaded address space; see [`Vmm::create_pool`].
    ///
    /// ### Panics
    /// - If no address space is loaded, or see [`Vmm::create_pool`].
    ///
    /// # Errors
    /// [`FrameAllocError`] if `frame_pool` cannot back the pool's management
    /// pages.
    pub fn create_vm_pool(
        &mut self,
        base: VirtualAddress,
        size: u32,
        frame_pool: FramePoolId,
    ) -> Result<VmPoolId, FrameAllocError> {
        let Some(space) = &mut self.space else {
            panic!("no address space is loaded");
        };
        space.create_pool(&mut self.frames, base, size, frame_pool)
    }

    /// Select the pool that serves [`allocate`](Self::allocate).
    ///
    /// ### Panics
    /// - If `pool` is not registered with the loaded address space.
    pub fn load(&mut self, pool: VmPoolId) {
        let base = self.space().pool(pool).base();
        self.current_pool = Some(pool);
        log::debug!("vm pool {} at {base} loaded", pool.index());
    }

    /// ### Panics
    /// - If no pool is loaded.
    #[must_use]
    pub fn current_pool(&self) -> VmPoolId {
        let Some(pool) = self.current_pool else {
            panic!("no vm pool is loaded");
        };
        pool
    }

    /// The loaded pool.
    ///
    /// ### Panics
    /// - If no pool is loaded.
    #[must_use]
    pub fn pool(&self) -> &VmPool<'m> {
        self.space().pool(self.current_pool())
    }

    /// Reserve `bytes` in the loaded pool.
    ///
    /// ### Panics
    /// See [`VmPool::allocate`].
    ///
    /// # Errors
    /// [`AllocError::VirtualMemory`] if the pool cannot serve the request.
    pub fn allocate(&mut self, bytes: u32) -> Result<VirtualAddress, AllocError> {
        let pool = self.current_pool();
        Ok(self.space_mut().allocate(pool, bytes)?)
    }

    /// Like [`allocate`](Self::allocate), but reports requests the pool can
    /// never serve as errors instead of panicking.
    ///
    /// # Errors
    /// - [`AllocError::Alignment`] for alignments above [`PAGE_SIZE`].
    /// - [`AllocError::Size`] for empty requests and requests larger than the pool.
    /// - [`AllocError::VirtualMemory`] if the pool is out of space.
    pub fn allocate_layout(&mut self, layout: Layout) -> Result<VirtualAddress, AllocError> {
        if layout.align() > PAGE_SIZE as usize {
            return Err(AllocError::Alignment {
                align: layout.align(),
            });
        }
        let too_large = AllocError::Size {
            bytes: layout.size(),
        };
        let bytes = u32::try_from(layout.size()).map_err(|_| too_large)?;
        if bytes == 0 || pages_for(bytes) > self.pool().capacity() {
            return Err(too_large);
        }
        self.allocate(bytes)
    }

    /// Release the region starting at `start` from the loaded pool and free
    /// its pages.
    ///
    /// ### Panics
    /// See [`VmPool::release`].
    ///
    /// # Errors
    /// [`AllocError::VirtualMemory`] if the pool's free record table is full.
    pub fn release(&mut self, start: VirtualAddress) -> Result<(), AllocError> {
        let pool = self.current_pool();
        let Some(space) = &mut self.space else {
            panic!("no address space is loaded");
        };
        space.release(&mut self.frames, pool, start)?;
        Ok(())
    }

    /// Free the pages backing `[start, start + size)` in the loaded address
    /// space; see [`Vmm::free_pages`].
    pub fn free_pages(&mut self, start: VirtualAddress, size: u32) {
        let Some(space) = &mut self.space else {
            panic!("no address space is loaded");
        };
        space.free_pages(&mut self.frames, start, size);
    }

    /// Entry point for the page fault exception: reads the faulting address
    /// from CR2 and backs it.
    ///
    /// ### Panics
    /// - On protection faults (the page is present), or see [`Vmm::handle_fault`].
    ///
    /// # Errors
    /// See [`Vmm::handle_fault`].
    pub fn handle_page_fault(
        &mut self,
        code: PageFaultErrorCode,
    ) -> Result<FaultResolution, PageFaultError> {
        let address = self.regs.cr2().fault_address();
        assert!(code.is_not_present(), "{} at {address}", code.explain());
        self.handle_fault_at(address)
    }

    /// Back the page containing `address` in the loaded address space.
    ///
    /// # Errors
    /// See [`Vmm::handle_fault`].
    pub fn handle_fault_at(
        &mut self,
        address: VirtualAddress,
    ) -> Result<FaultResolution, PageFaultError> {
        let Some(space) = &mut self.space else {
            panic!("page fault at {address} before an address space was loaded");
        };
        space.handle_fault(&mut self.frames, address)
    }
}
