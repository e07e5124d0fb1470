use crate::{MemoryAddress, VirtualAddress};
use core::fmt;

/// Physical memory address.
///
/// A thin wrapper around [`MemoryAddress`] for values that come from the boot
/// stage: memory-map entries, the location of the bootstrap free list, and the
/// links the bootstrap wrote into it.
///
/// ### Examples
/// ```rust
/// # use kernel_memory_addresses::*;
/// let pa = PhysicalAddress::new(0x0000_0010_2000_0042);
/// assert_eq!(pa.masked(0xFFFF_FFFF).as_u64(), 0x2000_0042);
/// ```
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress(pub(crate) MemoryAddress);

impl PhysicalAddress {
    #[inline]
    #[must_use]
    pub const fn zero() -> Self {
        Self::new(0)
    }

    #[inline]
    #[must_use]
    pub const fn new(v: u64) -> Self {
        Self(MemoryAddress::new(v))
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0.as_u64()
    }

    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0.is_null()
    }

    /// Keep only the bits set in `mask`.
    ///
    /// Used on links written by the 32-bit bootstrap stage, whose upper half is
    /// stale memory.
    #[inline]
    #[must_use]
    pub const fn masked(self, mask: u64) -> Self {
        Self::new(self.as_u64() & mask)
    }

    /// The direct-map alias of this address for a direct map starting at `offset`.
    #[inline]
    #[must_use]
    pub const fn to_virtual(self, offset: u64) -> VirtualAddress {
        VirtualAddress::new(self.as_u64().wrapping_add(offset))
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA(0x{:016X})", self.as_u64())
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.as_u64())
    }
}

impl From<u64> for PhysicalAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

impl From<MemoryAddress> for PhysicalAddress {
    #[inline]
    fn from(value: MemoryAddress) -> Self {
        Self(value)
    }
}

impl From<PhysicalAddress> for MemoryAddress {
    #[inline]
    fn from(value: PhysicalAddress) -> Self {
        value.0
    }
}
