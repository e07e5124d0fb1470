//! # Kernel Configuration and Boot Interface
//!
//! Data structures and constants shared between the bootstrap stage and the
//! kernel's physical memory manager.
//!
//! ## Boot Information ([`boot`])
//!
//! The bootstrap stage discovers memory, threads a first free list over the
//! largest available region, and passes a [`KernelBootInfo`](boot::KernelBootInfo)
//! to the kernel:
//!
//! ```text
//! KernelBootInfo
//!   pmm_state ───► BootFreeList { head, base, ceiling, object_size }   (physical)
//!   mmap_ptr  ───► [MemoryMapEntry; mmap_entries]                       (physical)
//! ```
//!
//! All values at this boundary are physical addresses stored as plain `u64`s
//! in `#[repr(C)]` structures; there are no Rust enums with payloads across the ABI.
//!
//! ## Memory Layout ([`memory`])
//!
//! ```text
//! 0x0000_0000_0000_0000 ┌─────────────────────────────────┐
//!                       │   Lower half, identity mapped   │
//!                       │   while the bootstrap runs      │
//! HHDM_BASE             ├─────────────────────────────────┤ 0xffff_8880_0000_0000
//!                       │   Higher Half Direct Mapping    │
//!                       │   (free lists live here)        │
//! 0xFFFF_FFFF_FFFF_FFFF └─────────────────────────────────┘
//! ```
//!
//! The physical memory manager applies [`HHDM_BASE`](memory::HHDM_BASE) once
//! to the bootstrap free list; from then on every free-list address is a
//! direct-map alias.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
