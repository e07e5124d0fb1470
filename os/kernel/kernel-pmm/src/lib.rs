//! # Kernel Physical Memory Manager
//!
//! This crate turns the raw memory ranges discovered at boot into a pool of
//! fixed-size blocks that can be allocated, freed, allocated as contiguous runs
//! and grown with memory found later. It runs before any heap exists: all of its
//! bookkeeping lives inside the free memory it manages.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │            Process-wide handle ([`global`])         │
//! │    • `static PMM: LockedPmm`                        │
//! │    • SpinLock around every operation                │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │         Physical Memory Manager ([`pmm`])           │
//! │    • Relocates the bootstrap list ([`relocate`])    │
//! │    • Links in available memory-map entries          │
//! │    • Hands out direct-map aliases                   │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │           Free-List Engine ([`free_list`])          │
//! │    • Intrusive singly linked list of blocks         │
//! │    • Single, contiguous and scan-based allocation   │
//! │    • Bounded list and unbounded pool                │
//! └─────────────────┬───────────────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────────────┐
//! │              Node Mappers ([`mapper`])              │
//! │    • List address → dereferenceable pointer         │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! The engine can be used on its own over any memory a [`NodeMapper`] can reach:
//!
//! ```rust
//! use kernel_memory_addresses::MemoryAddress;
//! use kernel_pmm::{DirectMapper, FreeList};
//!
//! #[repr(C, align(4096))]
//! struct Frames([u8; 4 * 4096]);
//!
//! let mut ram = Box::new(Frames([0; 4 * 4096]));
//! let base = MemoryAddress::from_ptr(ram.0.as_mut_ptr());
//! let ceiling = base + 4 * 4096;
//!
//! let mut list = unsafe { FreeList::new(DirectMapper, base, ceiling, 4096) }.unwrap();
//! let run = list.alloc_contiguous(2).unwrap();
//! assert_eq!(run, base);
//! assert_eq!(list.len(), 2);
//!
//! unsafe { list.free_contiguous(run, 2) }.unwrap();
//! assert_eq!(list.len(), 4);
//! ```
//!
//! ## Safety Model
//!
//! * Creating a list hands the memory to it; the constructors are `unsafe`.
//! * Freeing hands a block back; `free` and friends are `unsafe` because the
//!   list cannot tell whether the caller still uses the block. Addresses outside
//!   the list or misaligned ones are rejected without touching the list.
//! * Allocation is safe: it only ever returns blocks the list owns.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod free_list;
pub mod global;
pub mod mapper;
pub mod pmm;
pub mod relocate;

#[cfg(test)]
mod test_ram;

pub use free_list::{
    Bounds, Ceiling, ContiguousAllocError, FreeError, FreeList, FreeNode, InitError, LinkError,
    MAX_FRAGMENTATION_RETRIES, Pool, Unbounded,
};
pub use global::{LockedPmm, PMM};
pub use mapper::{DirectMapper, HhdmPhysMapper, NodeMapper, PhysMapper};
pub use pmm::{InitReport, MAX_LINKED_REGIONS, PhysicalMemoryManager, PmmError, Region};
pub use relocate::{RelocateError, rebase_boot_list};
