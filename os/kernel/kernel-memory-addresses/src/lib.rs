//! # Virtual and Physical Memory Address Types
//!
//! Strongly typed wrappers for the raw addresses the physical memory manager
//! passes around while it threads, relocates and hands out free blocks.
//!
//! ## Overview
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`MemoryAddress`] | A raw 64-bit address with no address-space attached. The free-list engine works in these. |
//! | [`PhysicalAddress`] | An address as reported by the boot stage and the memory map. |
//! | [`VirtualAddress`] | An address the kernel can dereference, usually a higher-half direct map (HHDM) alias. |
//!
//! Converting between the physical and virtual flavors is always explicit and
//! always names the offset being applied:
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! const HHDM: u64 = 0xffff_8880_0000_0000;
//!
//! let pa = PhysicalAddress::new(0x0010_2000);
//! let va = pa.to_virtual(HHDM);
//! assert_eq!(va.as_u64(), 0xffff_8880_0010_2000);
//! assert_eq!(va.to_physical(HHDM), Some(pa));
//! ```
//!
//! ## Page Sizes
//!
//! The [`PageSize`] marker trait carries the compile-time size of a page.
//! Only [`Size4K`] exists since the allocator manages page-granular blocks.
//!
//! ## Design Notes
//!
//! - All types are `#[repr(transparent)]` over `u64` and `Copy`.
//! - Alignment helpers exist both for compile-time page sizes (`align_down::<S>()`)
//!   and for runtime object sizes (`align_up_to`, `is_aligned_to`), since a free
//!   list's object size is a runtime value.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

mod memory_address;
mod page_size;
mod physical_address;
mod virtual_address;

pub use memory_address::MemoryAddress;
pub use page_size::{PageSize, Size4K};
pub use physical_address::PhysicalAddress;
pub use virtual_address::VirtualAddress;
