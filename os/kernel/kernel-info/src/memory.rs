//! # Memory Layout

use kernel_memory_addresses::{PageSize, Size4K};

/// A simple Higher Half Direct Map (HHDM) base.
/// Anything you map at [`HHDM_BASE`] + `pa` lets the kernel
/// access physical memory via a fixed offset.
pub const HHDM_BASE: u64 = 0xffff_8880_0000_0000;

/// Block size of every physical free list.
pub const FRAME_SIZE: u64 = Size4K::SIZE;

/// Mask applied to links written by the bootstrap stage.
///
/// The bootstrap runs in 32-bit protected mode and only writes the lower
/// half of each `next` link; the upper half is whatever was in memory before.
pub const BOOTSTRAP_LINK_MASK: u64 = 0xFFFF_FFFF;

const _: () = {
    assert!(FRAME_SIZE.is_power_of_two());
    assert!(HHDM_BASE.is_multiple_of(FRAME_SIZE));
};
