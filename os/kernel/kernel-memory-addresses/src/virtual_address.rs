use crate::{MemoryAddress, PhysicalAddress};
use core::fmt;

/// Virtual memory address.
///
/// A thin wrapper around [`MemoryAddress`] that denotes **virtual** addresses.
/// It does not validate canonicality at runtime; it only carries the *kind* of
/// address at the type level so you don't accidentally mix virtual and physical
/// values.
///
/// Every block the physical memory manager hands out is returned as the
/// direct-map alias of the physical block, i.e. as a `VirtualAddress`.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VirtualAddress(pub(crate) MemoryAddress);

impl VirtualAddress {
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

    /// Reinterpret as a mutable pointer in the current address space.
    ///
    /// The returned pointer carries exposed provenance; dereferencing it is only
    /// sound if the address is mapped.
    #[inline]
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_mut_ptr<T>(self) -> *mut T {
        core::ptr::with_exposed_provenance_mut(self.as_u64() as usize)
    }

    /// The physical address behind a direct-map alias, given the map's `offset`.
    ///
    /// Returns `None` if the address lies below the direct map.
    #[inline]
    #[must_use]
    pub const fn to_physical(self, offset: u64) -> Option<PhysicalAddress> {
        match self.as_u64().checked_sub(offset) {
            Some(pa) => Some(PhysicalAddress::new(pa)),
            None => None,
        }
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA(0x{:016X})", self.as_u64())
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.as_u64())
    }
}

impl From<u64> for VirtualAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

impl From<MemoryAddress> for VirtualAddress {
    #[inline]
    fn from(value: MemoryAddress) -> Self {
        Self(value)
    }
}

impl From<VirtualAddress> for MemoryAddress {
    #[inline]
    fn from(value: VirtualAddress) -> Self {
        value.0
    }
}
