//! # Machine Memory Layout
//!
//! This crate is the single source of truth for where physical frame pools
//! live, which physical range is unusable, how much of low memory is shared
//! (identity mapped) by every address space, and where the kernel heap sits in
//! virtual memory.
//!
//! ## Physical Memory Layout
//!
//! ```text
//! frame     0 ┌─────────────────────────────────┐ 0x0000_0000
//!             │ BIOS, VGA, kernel image         │
//!         512 ├─────────────────────────────────┤ 0x0020_0000 (2 MiB)
//!             │ kernel frame pool               │
//!        1024 ├─────────────────────────────────┤ 0x0040_0000 (4 MiB)
//!             │ process frame pool              │
//!        3840 │   ┌─────────────────────────┐   │ 0x00F0_0000 (15 MiB)
//!             │   │ memory hole (1 MiB)     │   │
//!        4096 │   └─────────────────────────┘   │ 0x0100_0000 (16 MiB)
//!        8192 └─────────────────────────────────┘ 0x0200_0000 (32 MiB)
//! ```
//!
//! The first 4 MiB (including the whole kernel pool) are identity mapped in
//! every address space, so frames taken from the kernel pool stay reachable at
//! their physical address after paging is turned on.
//!
//! ## Virtual Memory Layout
//!
//! ```text
//! 0x0000_0000 ┌─────────────────────────────────┐
//!             │ shared identity map (4 MiB)     │
//! 0x0040_0000 ├─────────────────────────────────┤
//!             │ unmapped                        │
//! 0x2000_0000 ├─────────────────────────────────┤ KERNEL_HEAP_BASE
//!             │ kernel heap (256 MiB, lazy)     │
//! 0x3000_0000 ├─────────────────────────────────┤
//!             │ unmapped                        │
//! 0xFFC0_0000 ├─────────────────────────────────┤
//!             │ page table self-map (4 MiB)     │
//! 0xFFFF_FFFF └─────────────────────────────────┘
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod memory;
