mod common;

use common::{SoftRegisters, TestPhys};
use core::alloc::{GlobalAlloc, Layout};
use kernel_alloc::frame_alloc::FrameState;
use kernel_alloc::heap::KernelHeap;
use kernel_alloc::memory_manager::MemoryManager;
use kernel_alloc::vmm::PageFaultError;
use kernel_info::memory::{
    KERNEL_HEAP_BASE, KERNEL_POOL_START_FRAME, MEM_HOLE_SIZE, MEM_HOLE_START_FRAME,
    PROCESS_POOL_START_FRAME,
};
use kernel_memory_addresses::{FrameNumber, PAGE_SIZE, VirtualAddress};
use kernel_registers::ControlRegisters;
use kernel_vmem::{Mapping, PageFaultErrorCode};

/// Everything `boot` touches lies in the kernel pool, below 4 MiB.
const BOOT_RAM_FRAMES: usize = 1024;

#[test]
fn boot_brings_up_pools_paging_and_heap() {
    let phys = TestPhys::with_frames(BOOT_RAM_FRAMES);
    let regs = SoftRegisters::default();
    let (mm, pools) = unsafe { MemoryManager::boot(&phys, &regs) }.unwrap();

    assert!(regs.paging_enabled());
    assert!(mm.space().is_active());
    assert_eq!(mm.current_pool(), pools.heap);
    assert_eq!(mm.pool().base(), KERNEL_HEAP_BASE);
    assert_eq!(mm.pool().frame_pool(), pools.kernel);

    let frames = mm.frames();
    assert_eq!(frames.get(pools.kernel).base_frame(), KERNEL_POOL_START_FRAME);
    assert_eq!(frames.get(pools.process).base_frame(), PROCESS_POOL_START_FRAME);
    assert_eq!(
        frames.get(pools.kernel).state(KERNEL_POOL_START_FRAME),
        FrameState::Inaccessible
    );
    for f in [0, MEM_HOLE_SIZE - 1] {
        assert_eq!(
            frames.get(pools.process).state(MEM_HOLE_START_FRAME + f),
            FrameState::Inaccessible
        );
    }
    // Process map, shared table and directory come from the kernel pool, as
    // do the heap's window table and management pages.
    assert_eq!(frames.get(pools.kernel).free_frames(), 512 - 1 - 3 - 3);
    let Mapping::Page { frame, .. } = mm.space().mapping(KERNEL_HEAP_BASE) else {
        panic!("heap records not mapped");
    };
    assert!(frames.get(pools.kernel).contains(frame));
    assert_eq!(mm.shared_region().unwrap().table_count(), 1);
}

#[test]
fn boot_heap_is_backed_on_first_touch() {
    let phys = TestPhys::with_frames(BOOT_RAM_FRAMES);
    let regs = SoftRegisters::default();
    let (mut mm, pools) = unsafe { MemoryManager::boot(&phys, &regs) }.unwrap();

    let va = mm.allocate(3 * PAGE_SIZE).unwrap();
    assert_eq!(va, KERNEL_HEAP_BASE + 2 * PAGE_SIZE);

    regs.latch_fault(va + PAGE_SIZE);
    let resolved = mm.handle_page_fault(PageFaultErrorCode::new()).unwrap();
    assert!(mm.frames().get(pools.kernel).contains(resolved.page));
    // The window's table was created along with the heap's records.
    assert_eq!(resolved.table, None);
    let Mapping::Page { table, .. } = mm.space().mapping(KERNEL_HEAP_BASE) else {
        panic!("heap records not mapped");
    };
    assert_eq!(mm.space().mapping(va), Mapping::NotPresent { table });
    assert_eq!(
        mm.space().mapping(va + PAGE_SIZE),
        Mapping::Page { table, frame: resolved.page }
    );

    let free = mm.frames().get(pools.kernel).free_frames();
    mm.release(va).unwrap();
    assert_eq!(mm.frames().get(pools.kernel).free_frames(), free + 1);
}

#[test]
fn global_alloc_hands_out_page_aligned_regions() {
    let phys = TestPhys::with_frames(BOOT_RAM_FRAMES);
    let regs = SoftRegisters::default();
    let (mm, _) = unsafe { MemoryManager::boot(&phys, &regs) }.unwrap();
    let heap = KernelHeap::new();
    heap.install(mm);

    let small = Layout::from_size_align(24, 8).unwrap();
    let big = Layout::from_size_align(3 * 4096 + 1, 4096).unwrap();
    let a = unsafe { heap.alloc(small) };
    let b = unsafe { heap.alloc(big) };
    let c = unsafe { heap.alloc(small) };

    assert_eq!(a.addr(), KERNEL_HEAP_BASE.as_usize() + 0x2000);
    assert_eq!(b.addr(), KERNEL_HEAP_BASE.as_usize() + 0x3000);
    assert_eq!(c.addr(), KERNEL_HEAP_BASE.as_usize() + 0x7000);

    unsafe { heap.dealloc(b, big) };
    heap.with(|mm| {
        let b = VirtualAddress::try_from_ptr(b).unwrap();
        assert!(!mm.pool().is_legitimate(b));
        assert!(mm.pool().is_legitimate(VirtualAddress::try_from_ptr(c).unwrap()));
    });
}

#[test]
fn global_alloc_refuses_what_it_cannot_serve() {
    let phys = TestPhys::with_frames(BOOT_RAM_FRAMES);
    let regs = SoftRegisters::default();
    let heap = KernelHeap::new();

    // Nothing installed yet.
    let layout = Layout::from_size_align(64, 8).unwrap();
    assert!(unsafe { heap.alloc(layout) }.is_null());

    let (mm, _) = unsafe { MemoryManager::boot(&phys, &regs) }.unwrap();
    heap.install(mm);
    assert!(heap.is_installed());

    let over_aligned = Layout::from_size_align(64, 2 * 4096).unwrap();
    assert!(unsafe { heap.alloc(over_aligned) }.is_null());

    let huge = Layout::from_size_align(512 * 1024 * 1024, 8).unwrap();
    assert!(unsafe { heap.alloc(huge) }.is_null());

    assert!(!unsafe { heap.alloc(layout) }.is_null());
}

#[test]
fn heap_fault_path_reports_a_busy_manager() {
    let phys = TestPhys::with_frames(BOOT_RAM_FRAMES);
    let regs = SoftRegisters::default();
    let (mm, _) = unsafe { MemoryManager::boot(&phys, &regs) }.unwrap();
    let heap = KernelHeap::new();
    heap.install(mm);

    let layout = Layout::from_size_align(4096, 4096).unwrap();
    let p = unsafe { heap.alloc(layout) };
    let va = VirtualAddress::try_from_ptr(p).unwrap();
    regs.latch_fault(va);

    let nested = heap.with(|_| heap.handle_page_fault(PageFaultErrorCode::new()));
    assert_eq!(nested, Err(PageFaultError::ManagerBusy));

    let resolved = heap.handle_page_fault(PageFaultErrorCode::new()).unwrap();
    heap.with(|mm| assert_eq!(mm.space().mapping(va).frame(), Some(resolved.page)));

    // Releasing the allocation returns its frame.
    unsafe { heap.dealloc(p, layout) };
    let mm = heap.uninstall().unwrap();
    let owner = mm.frames().find(resolved.page).unwrap();
    assert_eq!(mm.frames().get(owner).state(resolved.page), FrameState::Free);
    assert!(!heap.is_installed());
}

#[test]
#[should_panic(expected = "kernel heap is already installed")]
fn installing_twice_is_fatal() {
    let phys = TestPhys::with_frames(BOOT_RAM_FRAMES);
    let regs = SoftRegisters::default();
    let heap = KernelHeap::new();
    heap.install(MemoryManager::new(&phys, &regs));
    heap.install(MemoryManager::new(&phys, &regs));
}

#[test]
#[should_panic(expected = "paging is already enabled")]
fn boot_requires_paging_off() {
    let phys = TestPhys::with_frames(BOOT_RAM_FRAMES);
    let regs = SoftRegisters::default();
    unsafe { regs.write_cr0(regs.cr0().with_pg_paging(true)) };
    let _ = unsafe { MemoryManager::boot(&phys, &regs) };
}

#[test]
fn process_pool_frames_start_at_its_base() {
    let phys = TestPhys::with_frames(BOOT_RAM_FRAMES);
    let regs = SoftRegisters::default();
    let (mut mm, pools) = unsafe { MemoryManager::boot(&phys, &regs) }.unwrap();

    let first = mm.frames_mut().get_frames(pools.process, 2).unwrap();
    assert_eq!(first, PROCESS_POOL_START_FRAME);
    assert_eq!(mm.frames().find(FrameNumber::new(0)), None);
}
