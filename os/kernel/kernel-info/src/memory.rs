//! # Memory Layout

use kernel_memory_addresses::{FrameNumber, PAGE_SIZE, VirtualAddress};

/// One mebibyte.
pub const MIB: u32 = 1024 * 1024;

/// First frame of the kernel frame pool (2 MiB).
pub const KERNEL_POOL_START_FRAME: FrameNumber = FrameNumber::new(512);

/// Number of frames in the kernel frame pool (2 MiB).
pub const KERNEL_POOL_SIZE: u32 = 512;

/// First frame of the process frame pool (4 MiB).
pub const PROCESS_POOL_START_FRAME: FrameNumber = FrameNumber::new(1024);

/// Number of frames in the process frame pool (28 MiB).
pub const PROCESS_POOL_SIZE: u32 = 7168;

/// First frame of the physical range that must never be handed out (15 MiB).
pub const MEM_HOLE_START_FRAME: FrameNumber = FrameNumber::new(3840);

/// Number of frames in the memory hole (1 MiB).
pub const MEM_HOLE_SIZE: u32 = 256;

/// Bytes of low memory identity mapped into every address space.
pub const SHARED_SIZE: u32 = 4 * MIB;

/// Start of the kernel heap's virtual range.
pub const KERNEL_HEAP_BASE: VirtualAddress = VirtualAddress::new(512 * MIB);

/// Size of the kernel heap's virtual range.
pub const KERNEL_HEAP_SIZE: u32 = 256 * MIB;

/// Start of the 4 MiB window occupied by the page table self-map.
pub const SELF_MAP_BASE: VirtualAddress = VirtualAddress::new(0xFFC0_0000);

const _: () = {
    assert!(
        KERNEL_POOL_START_FRAME.as_u32() + KERNEL_POOL_SIZE == PROCESS_POOL_START_FRAME.as_u32()
    );
    assert!(MEM_HOLE_START_FRAME.as_u32() >= PROCESS_POOL_START_FRAME.as_u32());
    assert!(
        MEM_HOLE_START_FRAME.as_u32() + MEM_HOLE_SIZE
            <= PROCESS_POOL_START_FRAME.as_u32() + PROCESS_POOL_SIZE
    );

    // Kernel pool frames must stay reachable through the identity map.
    assert!((KERNEL_POOL_START_FRAME.as_u32() + KERNEL_POOL_SIZE) * PAGE_SIZE <= SHARED_SIZE);
    assert!(SHARED_SIZE.is_multiple_of(4 * MIB));

    assert!(KERNEL_HEAP_BASE.as_u32() >= SHARED_SIZE);
    assert!(KERNEL_HEAP_BASE.is_page_aligned());
    assert!(KERNEL_HEAP_SIZE.is_multiple_of(PAGE_SIZE));
    assert!(KERNEL_HEAP_BASE.as_u32() + KERNEL_HEAP_SIZE <= SELF_MAP_BASE.as_u32());
};
