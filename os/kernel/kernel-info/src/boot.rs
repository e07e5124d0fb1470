//! # Kernel Boot Information

use kernel_memory_addresses::PhysicalAddress;

/// Information the kernel needs right after the bootstrap stage hands over.
/// Keep this `#[repr(C)]` and prefer fixed-size integers at the ABI boundary.
#[repr(C)]
#[derive(Clone)]
pub struct KernelBootInfo {
    /// Physical address of the [`BootFreeList`] the bootstrap threaded over
    /// the largest available memory region.
    pub pmm_state: u64,

    /// Physical address of the first [`MemoryMapEntry`].
    pub mmap_ptr: u64,

    /// Number of [`MemoryMapEntry`] records at [`mmap_ptr`](Self::mmap_ptr).
    pub mmap_entries: u64,
}

impl KernelBootInfo {
    #[must_use]
    pub const fn pmm_state(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.pmm_state)
    }

    #[must_use]
    pub const fn memory_map(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.mmap_ptr)
    }
}

/// Free-list descriptor as written by the bootstrap stage.
///
/// All values are **physical**. The kernel rebases it into the higher half
/// exactly once during PMM initialization.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct BootFreeList {
    /// First free block, or 0 if the list is empty.
    pub head: u64,
    /// First byte of the managed range.
    pub base: u64,
    /// One past the last byte of the managed range.
    pub ceiling: u64,
    /// Size of every block in bytes.
    pub object_size: u64,
}

/// One range of the boot memory map (multiboot2 `mmap` entry layout).
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct MemoryMapEntry {
    /// Physical start of the range.
    pub base: u64,
    /// Length of the range in bytes.
    pub length: u64,
    /// Raw region type; see [`MemoryRegionType`].
    pub kind: u32,
    /// Always zero.
    pub reserved: u32,
}

impl MemoryMapEntry {
    #[must_use]
    pub const fn new(base: u64, length: u64, kind: MemoryRegionType) -> Self {
        Self {
            base,
            length,
            kind: kind.as_raw(),
            reserved: 0,
        }
    }

    #[must_use]
    pub const fn region_type(&self) -> MemoryRegionType {
        MemoryRegionType::from_raw(self.kind)
    }

    #[must_use]
    pub const fn is_available(&self) -> bool {
        matches!(self.region_type(), MemoryRegionType::Available)
    }

    #[must_use]
    pub const fn start(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.base)
    }

    /// Exclusive end of the range, saturating at the top of the address space.
    #[must_use]
    pub const fn end(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.base.saturating_add(self.length))
    }
}

/// Usability classification of a [`MemoryMapEntry`].
///
/// The ABI carries the raw `u32`; this enum is only built on the kernel side.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum MemoryRegionType {
    /// Usable RAM.
    Available,
    /// In use by firmware or devices.
    Reserved,
    /// Holds ACPI tables; usable once they have been parsed.
    AcpiReclaimable,
    /// ACPI non-volatile storage; must be preserved.
    Nvs,
    /// Defective RAM.
    Bad,
    /// A type value this kernel does not know.
    Unknown(u32),
}

impl MemoryRegionType {
    #[must_use]
    pub const fn from_raw(raw: u32) -> Self {
        match raw {
            1 => Self::Available,
            2 => Self::Reserved,
            3 => Self::AcpiReclaimable,
            4 => Self::Nvs,
            5 => Self::Bad,
            other => Self::Unknown(other),
        }
    }

    #[must_use]
    pub const fn as_raw(self) -> u32 {
        match self {
            Self::Available => 1,
            Self::Reserved => 2,
            Self::AcpiReclaimable => 3,
            Self::Nvs => 4,
            Self::Bad => 5,
            Self::Unknown(raw) => raw,
        }
    }
}
