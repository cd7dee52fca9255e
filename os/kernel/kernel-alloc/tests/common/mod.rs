#![allow(dead_code)]

use core::cell::{Cell, UnsafeCell};
use kernel_alloc::frame_alloc::FramePoolId;
use kernel_alloc::memory_manager::MemoryManager;
use kernel_info::memory::SHARED_SIZE;
use kernel_memory_addresses::{FrameNumber, PhysicalAddress, VirtualAddress};
use kernel_registers::{ControlRegisters, Cr0, Cr2, Cr3};
use kernel_vmem::PhysMapper;

/// A 4 KiB-aligned raw frame. We use this as our "physical RAM" backing store in tests.
#[repr(C, align(4096))]
struct Aligned4K([u8; 4096]);

/// Simulated physical memory: frame `n` is `frames[n]`.
pub struct TestPhys {
    frames: Box<[UnsafeCell<Aligned4K>]>,
}

impl TestPhys {
    pub fn with_frames(n: usize) -> Self {
        Self {
            frames: (0..n).map(|_| UnsafeCell::new(Aligned4K([0; 4096]))).collect(),
        }
    }

    /// Read one byte of simulated RAM.
    pub fn byte(&self, pa: PhysicalAddress) -> u8 {
        unsafe { *self.phys_to_ptr(pa) }
    }
}

impl PhysMapper for TestPhys {
    fn phys_to_ptr(&self, pa: PhysicalAddress) -> *mut u8 {
        assert!(pa.frame().as_usize() < self.frames.len(), "{pa:?} outside test RAM");
        // SAFETY: in bounds (checked above); frames are contiguous.
        unsafe { self.frames.as_ptr().cast::<u8>().cast_mut().add(pa.as_usize()) }
    }
}

/// Control registers backed by plain cells.
#[derive(Default)]
pub struct SoftRegisters {
    cr0: Cell<u32>,
    cr2: Cell<u32>,
    cr3: Cell<u32>,
    cr3_writes: Cell<u32>,
}

impl SoftRegisters {
    /// Latch `va` as the faulting address, as the CPU would.
    pub fn latch_fault(&self, va: VirtualAddress) {
        self.cr2.set(va.as_u32());
    }

    pub fn cr3_writes(&self) -> u32 {
        self.cr3_writes.get()
    }
}

impl ControlRegisters for SoftRegisters {
    fn cr0(&self) -> Cr0 {
        Cr0::from_bits(self.cr0.get())
    }

    unsafe fn write_cr0(&self, value: Cr0) {
        self.cr0.set(value.into_bits());
    }

    fn cr2(&self) -> Cr2 {
        Cr2::from_bits(self.cr2.get())
    }

    fn cr3(&self) -> Cr3 {
        Cr3::from_bits(self.cr3.get())
    }

    unsafe fn write_cr3(&self, value: Cr3) {
        self.cr3.set(value.into_bits());
        self.cr3_writes.set(self.cr3_writes.get() + 1);
    }
}

/// Kernel pool: frames 512..1024, state map in its first frame.
pub const KERNEL_BASE: FrameNumber = FrameNumber::new(512);
pub const KERNEL_FRAMES: u32 = 512;

/// Process pool: frames 1024..2048, state map in a kernel frame.
pub const PROCESS_BASE: FrameNumber = FrameNumber::new(1024);
pub const PROCESS_FRAMES: u32 = 1024;

/// Test RAM large enough for both pools.
pub const RAM_FRAMES: usize = 2048;

pub struct Pools {
    pub kernel: FramePoolId,
    pub process: FramePoolId,
}

/// A manager with both frame pools, the shared region and a loaded kernel
/// address space; paging is on.
pub fn paged_manager<'m>(
    phys: &'m TestPhys,
    regs: &'m SoftRegisters,
) -> (MemoryManager<'m, TestPhys, SoftRegisters>, Pools) {
    let mut mm = MemoryManager::new(phys, regs);
    let kernel = unsafe { mm.create_frame_pool(KERNEL_BASE, KERNEL_FRAMES, None) };
    let info = mm.frames_mut().get_frames(kernel, 1).unwrap();
    let process = unsafe { mm.create_frame_pool(PROCESS_BASE, PROCESS_FRAMES, Some(info)) };

    mm.init_paging(kernel, SHARED_SIZE).unwrap();
    let space = mm.new_address_space(kernel).unwrap();
    unsafe {
        assert!(mm.load_address_space(space).is_none());
        mm.enable_paging();
    }
    (mm, Pools { kernel, process })
}
