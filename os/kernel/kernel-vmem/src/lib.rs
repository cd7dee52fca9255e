//! # Virtual Memory Support
//!
//! i386 two-level paging structures for the kernel's memory core.
//!
//! ## What you get
//! - An [`AddressSpace`] describing one page-directory-rooted translation tree.
//! - 32-bit [`PageEntryBits`] with practical explanations.
//! - 4 KiB-aligned [`PageDirectory`] / [`PageTable`] wrappers and index helpers.
//! - [`SelfMap`], the address arithmetic of the recursive directory slot.
//! - The [`PhysMapper`] seam through which physical frames are touched.
//! - [`PageFaultErrorCode`], the decoded error code of a page fault.
//!
//! ## i386 Virtual Address → Physical Address Walk
//!
//! Each 32-bit virtual address is divided into three fields:
//!
//! ```text
//! | 31‒22 | 21‒12 | 11‒0   |
//! |   PD  |   PT  | Offset |
//! ```
//!
//! ```text
//!  CR3 → PD  →  PT  →  Physical Page
//!         │      │
//!         │      └───► PTE  (Page Table Entry)     → maps 4 KiB page
//!         └──────────► PDE  (Page Directory Entry) → points at a PT
//! ```
//!
//! Both levels hold 1024 (2¹⁰) entries of 4 bytes, so one page table covers
//! 4 MiB and one directory covers the full 4 GiB.
//!
//! ### Self-map
//!
//! Directory slot 1023 points at the directory itself and every table created
//! on demand points at itself in its slot 1023. See [`SelfMap`] for the
//! resulting addresses.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

pub mod address_space;
mod page_entry_bits;
mod page_fault;
pub mod page_table;
mod self_map;

pub use crate::address_space::{AddressSpace, Mapping};
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_fault::PageFaultErrorCode;
pub use crate::page_table::pd::{PageDirectory, PdEntry, PdIndex};
pub use crate::page_table::pt::{PageTable, PtEntry, PtIndex};
pub use crate::self_map::SelfMap;
use kernel_memory_addresses::{FrameNumber, PhysicalAddress, VirtualAddress};

/// Re-export constants as info module.
pub use kernel_info::memory as info;

/// Converts physical addresses to usable pointers in the current virtual
/// address space (identity map before paging, self-map windows after).
///
/// # Safety
/// - You must ensure `pa` is mapped as writable in the current page tables
///   for `&mut T`.
/// - Lifetime `'a` is purely borrow-checked; the mapping must remain valid
///   for `'a`.
/// - Type `T` must match the bytes at `pa` (no aliasing UB).
pub trait PhysMapper {
    /// Pointer through which the byte at `pa` is reachable.
    fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8;

    /// Convert a *physical* address to a usable mutable reference.
    ///
    /// # Safety
    /// See the trait documentation.
    #[inline]
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        unsafe { &mut *self.phys_to_ptr(pa).cast::<T>() }
    }

    /// Borrow `len` bytes of physical memory starting at `pa`.
    ///
    /// # Safety
    /// See the trait documentation; the whole range must be mapped.
    #[inline]
    unsafe fn phys_to_bytes<'a>(&self, pa: PhysicalAddress, len: usize) -> &'a mut [u8] {
        unsafe { core::slice::from_raw_parts_mut(self.phys_to_ptr(pa), len) }
    }

    /// Borrow the page directory stored in `frame`.
    ///
    /// # Safety
    /// `frame` must hold a page directory.
    #[inline]
    unsafe fn directory_mut<'a>(&self, frame: FrameNumber) -> &'a mut PageDirectory {
        unsafe { self.phys_to_mut(frame.base()) }
    }

    /// Borrow the page table stored in `frame`, linked from directory slot
    /// `slot` of the directory being edited.
    ///
    /// Mappers that cannot reach `frame` directly may use `slot` to go through
    /// the [`SelfMap`] window instead.
    ///
    /// # Safety
    /// `frame` must hold a page table linked at `slot`.
    #[inline]
    unsafe fn table_mut<'a>(&self, frame: FrameNumber, slot: PdIndex) -> &'a mut PageTable {
        let _ = slot;
        unsafe { self.phys_to_mut(frame.base()) }
    }

    /// Pointer to the start of `frame`, which backs the page at `va` in the
    /// loaded address space.
    ///
    /// Mappers that cannot reach `frame` directly may use `va` instead.
    ///
    /// # Safety
    /// `va` must be mapped to `frame` in the address space in CR3.
    #[inline]
    unsafe fn page_ptr(&self, frame: FrameNumber, va: VirtualAddress) -> *mut u8 {
        let _ = va;
        self.phys_to_ptr(frame.base())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::{Cell, UnsafeCell};
    use kernel_registers::{ControlRegisters, Cr0, Cr2, Cr3};

    /// A 4 KiB-aligned raw frame. We use this as our "physical RAM" backing store in tests.
    #[repr(C, align(4096))]
    struct Aligned4K([u8; 4096]);

    /// Simulated physical memory: frame `n` is `frames[n]`.
    struct TestPhys {
        frames: Box<[UnsafeCell<Aligned4K>]>,
    }

    impl TestPhys {
        fn with_frames(n: usize) -> Self {
            Self {
                frames: (0..n).map(|_| UnsafeCell::new(Aligned4K([0; 4096]))).collect(),
            }
        }
    }

    impl PhysMapper for TestPhys {
        fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
            assert!(pa.frame().as_usize() < self.frames.len(), "{pa:?} outside test RAM");
            // SAFETY: in bounds (checked above); frames are contiguous.
            unsafe { self.frames.as_ptr().cast::<u8>().cast_mut().add(pa.as_usize()) }
        }
    }

    #[derive(Default)]
    struct SoftRegs {
        cr3: Cell<u32>,
    }

    impl ControlRegisters for SoftRegs {
        fn cr0(&self) -> Cr0 {
            Cr0::new()
        }
        unsafe fn write_cr0(&self, _value: Cr0) {}
        fn cr2(&self) -> Cr2 {
            Cr2::default()
        }
        fn cr3(&self) -> Cr3 {
            Cr3::from_bits(self.cr3.get())
        }
        unsafe fn write_cr3(&self, value: Cr3) {
            self.cr3.set(value.into_bits());
        }
    }

    const DIR: FrameNumber = FrameNumber::new(1);
    const SHARED: FrameNumber = FrameNumber::new(2);
    const TABLE: FrameNumber = FrameNumber::new(3);
    const DATA: FrameNumber = FrameNumber::new(4);

    fn fresh_space(phys: &TestPhys) -> AddressSpace<'_, TestPhys> {
        let aspace = AddressSpace::from_directory(phys, DIR);
        aspace.init_directory([SHARED], PageEntryBits::new_common_rw());
        aspace
    }

    #[test]
    fn init_directory_links_shared_tables_and_self_map() {
        let phys = TestPhys::with_frames(8);
        let aspace = fresh_space(&phys);

        assert_eq!(aspace.directory_entry(VirtualAddress::new(0x1000)).table(), Some(SHARED));
        assert_eq!(aspace.directory_entry(VirtualAddress::new(0x0040_0000)).table(), None);
        assert_eq!(aspace.directory_entry(SelfMap::directory()).table(), Some(DIR));

        // The directory is reachable through its own window.
        assert_eq!(aspace.query(SelfMap::directory()), Some(DIR.base()));
        assert_eq!(aspace.query(SelfMap::table(PdIndex::new(0))), Some(SHARED.base()));
    }

    #[test]
    fn install_then_map_one_page() {
        let phys = TestPhys::with_frames(8);
        let aspace = fresh_space(&phys);
        let va = VirtualAddress::new(0x2000_2010);
        let flags = PageEntryBits::new_common_rw();

        assert_eq!(aspace.mapping(va), Mapping::NoTable);
        aspace.install_table(va, TABLE, flags);
        assert_eq!(aspace.mapping(va), Mapping::NotPresent { table: TABLE });

        aspace.map_page(va, DATA, flags);
        assert_eq!(aspace.mapping(va), Mapping::Page { table: TABLE, frame: DATA });
        assert_eq!(aspace.query(va), Some(PhysicalAddress::new(DATA.base().as_u32() + 0x10)));

        // The new table maps itself in its last slot and through the window.
        let last = VirtualAddress::new(0x203F_F000);
        assert_eq!(aspace.mapping(last), Mapping::SelfMap { table: TABLE });
        assert_eq!(aspace.query(SelfMap::table(PdIndex::from(va))), Some(TABLE.base()));
    }

    #[test]
    fn mapped_page_is_reachable_through_the_mapper() {
        let phys = TestPhys::with_frames(8);
        let aspace = fresh_space(&phys);
        let va = VirtualAddress::new(0x2000_2000);
        let flags = PageEntryBits::new_common_rw();

        assert!(unsafe { aspace.page_ptr(va) }.is_none());
        aspace.install_table(va, TABLE, flags);
        assert!(unsafe { aspace.page_ptr(va) }.is_none());
        assert!(unsafe { aspace.page_ptr(VirtualAddress::new(0x203F_F000)) }.is_none());

        aspace.map_page(va, DATA, flags);
        let ptr = unsafe { aspace.page_ptr(va + 0x20) }.unwrap();
        assert_eq!(ptr, phys.phys_to_ptr(DATA.base()));
    }

    #[test]
    fn unmap_returns_frame_and_clears_entry() {
        let phys = TestPhys::with_frames(8);
        let aspace = fresh_space(&phys);
        let va = VirtualAddress::new(0x2000_2000);
        let flags = PageEntryBits::new_common_rw();

        aspace.install_table(va, TABLE, flags);
        aspace.map_page(va, DATA, flags);
        assert_eq!(aspace.unmap_page(va), Some(DATA));
        assert_eq!(aspace.unmap_page(va), None);
        assert_eq!(aspace.query(va), None);
    }

    #[test]
    #[should_panic(expected = "already mapped")]
    fn double_map_is_fatal() {
        let phys = TestPhys::with_frames(8);
        let aspace = fresh_space(&phys);
        let va = VirtualAddress::new(0x2000_2000);
        let flags = PageEntryBits::new_common_rw();

        aspace.install_table(va, TABLE, flags);
        aspace.map_page(va, DATA, flags);
        aspace.map_page(va, DATA, flags);
    }

    #[test]
    fn activate_writes_cr3() {
        let phys = TestPhys::with_frames(8);
        let regs = SoftRegs::default();
        let aspace = fresh_space(&phys);

        assert!(!aspace.is_active(&regs));
        unsafe { aspace.activate(&regs) };
        assert!(aspace.is_active(&regs));
        assert_eq!(AddressSpace::from_active(&phys, &regs).directory_frame(), DIR);
    }
}
