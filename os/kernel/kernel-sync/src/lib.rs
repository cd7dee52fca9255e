//! # Kernel synchronization primitives
//!
//! The memory core itself runs single-threaded and takes no locks. The one
//! place that needs mutual exclusion is the `GlobalAlloc` adapter, whose
//! trait only hands out `&self`; it wraps its state in a [`SpinLock`].

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod spin_lock;

pub use spin_lock::{SpinLock, SpinLockGuard};
