//! # Kernel synchronization primitives
//!
//! The physical memory manager is a single process-wide value whose free list
//! is mutated in place. Every list walk and mutation runs under a [`SpinLock`].
//!
//! The lock does not mask interrupts; callers in interrupt context must make
//! sure they cannot re-enter a lock they already hold.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod spin_lock;

pub use spin_lock::{SpinLock, SpinLockGuard};
