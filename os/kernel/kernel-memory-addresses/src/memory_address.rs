use crate::PageSize;
use core::fmt;
use core::ops::Add;

/// Raw memory address with no address space attached.
///
/// The free-list engine stores and compares these without caring whether the
/// list currently lives in physical or direct-mapped virtual space. Use
/// [`PhysicalAddress`](super::PhysicalAddress) or
/// [`VirtualAddress`](super::VirtualAddress) where the distinction matters.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct MemoryAddress(u64);

impl MemoryAddress {
    #[inline]
    #[must_use]
    pub const fn from_ptr<T>(ptr: *const T) -> Self {
        const _: () = assert!(
            size_of::<*const ()>() == size_of::<u64>(),
            "pointer size mismatch"
        );

        // using a union to const-time convert a pointer to an u64
        union Ptr<T> {
            ptr: *const T,
            raw: u64,
        }

        let ptr = Ptr { ptr };
        Self::new(unsafe { ptr.raw })
    }

    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Whether this is the null address.
    ///
    /// A free list uses a stored link of `0` as its terminator, so the null
    /// address can never be a free block.
    #[inline]
    #[must_use]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Align down to page boundary `S`.
    #[inline]
    #[must_use]
    pub const fn align_down<S: PageSize>(self) -> Self {
        Self(self.0 & !(S::SIZE - 1))
    }

    /// Whether the address is a multiple of `align` (any non-zero value).
    #[inline]
    #[must_use]
    pub const fn is_aligned_to(self, align: u64) -> bool {
        align != 0 && self.0.is_multiple_of(align)
    }

    /// Round down to a multiple of `align` (any non-zero value).
    #[inline]
    #[must_use]
    pub const fn align_down_to(self, align: u64) -> Self {
        Self(self.0 - self.0 % align)
    }

    /// Round up to a multiple of `align` (any non-zero value).
    ///
    /// Returns `None` if the result does not fit into 64 bits.
    #[inline]
    #[must_use]
    pub const fn align_up_to(self, align: u64) -> Option<Self> {
        let rem = self.0 % align;
        if rem == 0 {
            return Some(self);
        }
        match self.0.checked_add(align - rem) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn checked_add(self, bytes: u64) -> Option<Self> {
        match self.0.checked_add(bytes) {
            Some(v) => Some(Self(v)),
            None => None,
        }
    }

    /// Number of bytes from `origin` up to `self`, or `None` if `origin` lies above.
    #[inline]
    #[must_use]
    pub const fn distance_from(self, origin: Self) -> Option<u64> {
        self.0.checked_sub(origin.0)
    }
}

impl fmt::Debug for MemoryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 0xHHHH_HHHH_HHHH_HHHH style
        write!(f, "MemoryAddress(0x{:016X})", self.0)
    }
}

impl fmt::Display for MemoryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.as_u64())
    }
}

impl From<u64> for MemoryAddress {
    #[inline]
    fn from(v: u64) -> Self {
        Self::new(v)
    }
}

impl From<MemoryAddress> for u64 {
    #[inline]
    fn from(a: MemoryAddress) -> Self {
        a.as_u64()
    }
}

impl Add<u64> for MemoryAddress {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self::Output {
        Self(self.0 + rhs)
    }
}
