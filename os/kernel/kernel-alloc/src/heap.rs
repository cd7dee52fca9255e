//! # Kernel Heap
//!
//! [`KernelHeap`] is the `GlobalAlloc` front end of a [`MemoryManager`].
//! Every allocation reserves a fresh region in the manager's loaded VM pool,
//! so the returned memory is page aligned and only backed once it is touched.
//!
//! ## Constraints & caveats
//! - Each allocation occupies at least one page of virtual memory and one
//!   record in the pool. This suits a small number of large allocations.
//! - Alignments above a page are refused (null).
//! - The page fault path only *tries* the lock: a fault raised while the
//!   manager is busy is reported as [`PageFaultError::ManagerBusy`] instead
//!   of spinning forever.
//!
//! ```ignore
//! #[global_allocator]
//! static HEAP: KernelHeap<'static, SelfMapPhysMapper, NativeRegisters> = KernelHeap::new();
//!
//! let (mm, _) = unsafe { MemoryManager::boot(&MAPPER, &REGS)? };
//! HEAP.install(mm);
//! ```

use crate::memory_manager::MemoryManager;
use crate::vmm::{FaultResolution, PageFaultError};
use core::alloc::{GlobalAlloc, Layout};
use core::ptr::null_mut;
use kernel_memory_addresses::VirtualAddress;
use kernel_registers::ControlRegisters;
use kernel_sync::SpinLock;
use kernel_vmem::{PageFaultErrorCode, PhysMapper};

pub struct KernelHeap<'m, M: PhysMapper, R: ControlRegisters> {
    inner: SpinLock<Option<MemoryManager<'m, M, R>>>,
}

impl<M: PhysMapper, R: ControlRegisters> Default for KernelHeap<'_, M, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'m, M: PhysMapper, R: ControlRegisters> KernelHeap<'m, M, R> {
    /// An empty heap; allocations fail until [`install`](Self::install).
    #[must_use]
    pub const fn new() -> Self {
        Self {
            inner: SpinLock::new(None),
        }
    }

    /// ### Panics
    /// - If a manager is already installed.
    pub fn install(&self, mm: MemoryManager<'m, M, R>) {
        self.inner.with_lock(|slot| {
            assert!(slot.is_none(), "kernel heap is already installed");
            *slot = Some(mm);
        });
    }

    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.inner.with_lock(|slot| slot.is_some())
    }

    /// Run `f` on the installed manager.
    ///
    /// ### Panics
    /// - If no manager is installed.
    pub fn with<T>(&self, f: impl FnOnce(&mut MemoryManager<'m, M, R>) -> T) -> T {
        self.inner.with_lock(|slot| {
            let Some(mm) = slot else {
                panic!("kernel heap is not installed");
            };
            f(mm)
        })
    }

    /// Like [`with`](Self::with), but `None` if the manager is busy.
    ///
    /// ### Panics
    /// - If no manager is installed.
    pub fn try_with<T>(&self, f: impl FnOnce(&mut MemoryManager<'m, M, R>) -> T) -> Option<T> {
        self.inner.try_with_lock(|slot| {
            let Some(mm) = slot else {
                panic!("kernel heap is not installed");
            };
            f(mm)
        })
    }

    /// Page fault entry point; see [`MemoryManager::handle_page_fault`].
    ///
    /// # Errors
    /// [`PageFaultError::ManagerBusy`] if the fault interrupted the manager,
    /// otherwise see [`MemoryManager::handle_page_fault`].
    pub fn handle_page_fault(
        &self,
        code: PageFaultErrorCode,
    ) -> Result<FaultResolution, PageFaultError> {
        self.try_with(|mm| mm.handle_page_fault(code))
            .unwrap_or(Err(PageFaultError::ManagerBusy))
    }

    /// Take the installed manager back out.
    pub fn uninstall(&self) -> Option<MemoryManager<'m, M, R>> {
        self.inner.with_lock(Option::take)
    }
}

unsafe impl<M: PhysMapper, R: ControlRegisters> GlobalAlloc for KernelHeap<'_, M, R> {
    /// Reserve a fresh region of the loaded pool.
    ///
    /// # Safety
    /// The `GlobalAlloc` contract applies. Caller must handle a null return.
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let result = self
            .inner
            .with_lock(|slot| slot.as_mut().map(|mm| mm.allocate_layout(layout)));
        match result {
            Some(Ok(va)) => va.as_mut_ptr(),
            Some(Err(e)) => {
                log::warn!("kernel heap: {layout:?} refused: {e}");
                null_mut()
            }
            None => null_mut(),
        }
    }

    /// Release the region and free the pages backing it.
    ///
    /// # Safety
    /// The `GlobalAlloc` contract applies. `ptr` must come from `alloc`.
    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        let Some(va) = VirtualAddress::try_from_ptr(ptr) else {
            return;
        };
        if let Err(e) = self.with(|mm| mm.release(va)) {
            log::warn!("kernel heap: region at {va} leaked: {e}");
        }
    }
}
