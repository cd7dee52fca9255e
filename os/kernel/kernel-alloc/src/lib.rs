//! # Kernel Memory Allocation and Demand Paging
//!
//! Physical frame allocation, two-level paging bring-up, per-address-space
//! virtual memory pools and the page fault handler that backs them.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │      Memory Manager / Kernel Heap                   │
//! │    • Boot sequence, current pool, GlobalAlloc       │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │      Virtual Memory Pools                           │
//! │    • First-fit regions, no frames until touched     │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │      Page Table (Vmm)                               │
//! │    • Shared identity region, self-mapped directory  │
//! │    • Page fault handling, free_pages                │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │      Frame Allocator                                │
//! │    • Contiguous runs, 2 bits per frame              │
//! │    • Registry resolving frames to pools             │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Components
//!
//! ### Frame Allocator ([`frame_alloc`])
//!
//! Pools of contiguous physical frames. A run of frames is handed out as one
//! head frame followed by used frames, so it can be released by its first
//! frame alone through the [`FramePoolRegistry`](frame_alloc::FramePoolRegistry).
//!
//! ### Paging ([`paging`], [`vmm`])
//!
//! [`paging::init_paging`] builds the tables that identity map the shared low
//! region. Each [`Vmm`](vmm::Vmm) owns a page directory linking those tables,
//! maps the directory onto itself in its last slot, and creates further page
//! tables on demand while handling faults.
//!
//! ### Virtual Memory Pools ([`vm_pool`])
//!
//! Address ranges with first-fit region allocation. A pool decides whether a
//! faulting address is legitimate and which frame pool pays for its pages.
//!
//! ### Memory Manager ([`memory_manager`], [`heap`])
//!
//! The explicit context tying the above together, and a `GlobalAlloc`
//! adapter around it.
//!
//! ### Physical Mappers ([`phys_mapper`])
//!
//! How the code reaches a physical frame: identity before paging, self-map
//! window for page tables after.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use kernel_alloc::memory_manager::MemoryManager;
//! use kernel_alloc::phys_mapper::SelfMapPhysMapper;
//! use kernel_info::memory::SHARED_SIZE;
//! use kernel_memory_addresses::{FrameNumber, pages_for};
//! # use kernel_registers::{ControlRegisters, Cr0, Cr2, Cr3};
//! # struct Regs;
//! # impl ControlRegisters for Regs {
//! #     fn cr0(&self) -> Cr0 { Cr0::new() }
//! #     unsafe fn write_cr0(&self, _: Cr0) {}
//! #     fn cr2(&self) -> Cr2 { Cr2::default() }
//! #     fn cr3(&self) -> Cr3 { Cr3::new() }
//! #     unsafe fn write_cr3(&self, _: Cr3) {}
//! # }
//!
//! let mapper = unsafe { SelfMapPhysMapper::new(FrameNumber::new(pages_for(SHARED_SIZE))) };
//! let regs = Regs;
//! let (mut mm, _pools) = unsafe { MemoryManager::boot(&mapper, &regs) }.unwrap();
//!
//! let va = mm.allocate(3 * 4096).unwrap();
//! // First touch of `va` faults; the exception handler calls
//! // `mm.handle_page_fault(code)`.
//! mm.release(va).unwrap();
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

pub mod frame_alloc;
pub mod heap;
pub mod memory_manager;
pub mod paging;
pub mod phys_mapper;
pub mod vm_pool;
pub mod vmm;
