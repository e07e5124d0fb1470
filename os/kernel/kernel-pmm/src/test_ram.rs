//! Simulated RAM for the unit tests.

use crate::free_list::FreeNode;
use crate::mapper::NodeMapper;
use core::cell::UnsafeCell;
use kernel_memory_addresses::MemoryAddress;

/// A 4 KiB-aligned raw frame.
#[repr(C, align(4096))]
struct Frame(UnsafeCell<[u8; 4096]>);

/// A window of zeroed frames that pretends to live at `base`.
///
/// List addresses are translated to pointers into the backing frames; any
/// address outside the window fails the test.
pub struct TestRam {
    base: u64,
    frames: Vec<Frame>,
}

impl TestRam {
    pub fn new(base: u64, frames: usize) -> Self {
        assert_eq!(base % 4096, 0, "test RAM must start on a frame boundary");
        let frames = (0..frames)
            .map(|_| Frame(UnsafeCell::new([0; 4096])))
            .collect();
        Self { base, frames }
    }

    /// Exclusive end of the window.
    pub fn end(&self) -> u64 {
        self.base + self.frames.len() as u64 * 4096
    }

    /// Overwrite the link word at `addr` with an arbitrary value.
    pub fn poke(&self, addr: u64, value: u64) {
        unsafe { self.node_ptr(MemoryAddress::new(addr)).cast::<u64>().write(value) };
    }

    /// Read the link word at `addr`.
    pub fn peek(&self, addr: u64) -> u64 {
        unsafe { self.node_ptr(MemoryAddress::new(addr)).cast::<u64>().read() }
    }
}

impl NodeMapper for TestRam {
    fn node_ptr(&self, addr: MemoryAddress) -> *mut FreeNode {
        let addr = addr.as_u64();
        assert!(
            addr >= self.base && addr + 8 <= self.end(),
            "{addr:#x} outside test RAM {:#x}..{:#x}",
            self.base,
            self.end()
        );
        let offset = addr - self.base;
        let frame = &self.frames[(offset / 4096) as usize];
        // SAFETY: the offset stays inside the frame.
        unsafe { frame.0.get().cast::<u8>().add((offset % 4096) as usize) }.cast()
    }
}
