//! # Physical Mappers for the Kernel
//!
//! [`PhysMapper`] implementations for the two phases of the kernel's life:
//!
//! - [`IdentityPhysMapper`]: before paging is enabled, and for every frame in
//!   the identity mapped shared region afterwards, a physical address *is*
//!   the pointer.
//! - [`SelfMapPhysMapper`]: once paging is on, page tables living above the
//!   identity mapped region are only reachable through the
//!   [`SelfMap`](kernel_vmem::SelfMap) window of the loaded directory, and
//!   other pages only through the virtual address they are mapped at.
//!
//! ## Example
//! ```rust,no_run
//! use kernel_alloc::phys_mapper::IdentityPhysMapper;
//! use kernel_memory_addresses::FrameNumber;
//! use kernel_vmem::{PageDirectory, PhysMapper};
//!
//! let mapper = IdentityPhysMapper;
//! unsafe {
//!     let dir: &mut PageDirectory = mapper.directory_mut(FrameNumber::new(0x200));
//!     dir.zero();
//! }
//! ```

use kernel_memory_addresses::{FrameNumber, PhysicalAddress, VirtualAddress};
use kernel_vmem::{PageTable, PdIndex, PhysMapper, SelfMap};

/// Physical address equals virtual address.
///
/// # Safety
/// Only sound while paging is off, or for memory that is identity mapped.
pub struct IdentityPhysMapper;

impl PhysMapper for IdentityPhysMapper {
    #[inline]
    fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        VirtualAddress::new(pa.as_u32()).as_mut_ptr()
    }
}

/// Identity mapping below `identity_limit`, self-map window for page tables
/// above it.
pub struct SelfMapPhysMapper {
    identity_limit: FrameNumber,
}

impl SelfMapPhysMapper {
    /// # Safety
    /// Frames below `identity_limit` must be identity mapped in every address
    /// space. Page tables above it must only be edited in the loaded address
    /// space (the window shows the tables of the directory in CR3).
    #[must_use]
    pub const unsafe fn new(identity_limit: FrameNumber) -> Self {
        Self { identity_limit }
    }

    #[inline]
    #[must_use]
    pub const fn identity_limit(&self) -> FrameNumber {
        self.identity_limit
    }
}

impl PhysMapper for SelfMapPhysMapper {
    #[inline]
    fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        debug_assert!(
            pa.frame().as_u32() < self.identity_limit.as_u32(),
            "{pa:?} is not identity mapped"
        );
        VirtualAddress::new(pa.as_u32()).as_mut_ptr()
    }

    unsafe fn table_mut<'a>(&self, frame: FrameNumber, slot: PdIndex) -> &'a mut PageTable {
        let ptr: *mut PageTable = if frame.as_u32() < self.identity_limit.as_u32() {
            VirtualAddress::new(frame.base().as_u32()).as_mut_ptr()
        } else {
            SelfMap::table(slot).as_mut_ptr()
        };
        // SAFETY: upheld by the caller and by `new`'s contract.
        unsafe { &mut *ptr }
    }

    unsafe fn page_ptr(&self, frame: FrameNumber, va: VirtualAddress) -> *mut u8 {
        if frame.as_u32() < self.identity_limit.as_u32() {
            VirtualAddress::new(frame.base().as_u32()).as_mut_ptr()
        } else {
            va.as_mut_ptr()
        }
    }
}
