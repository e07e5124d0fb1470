//! # Node Mappers
//!
//! A free list stores plain addresses. Before a link can be read or written,
//! that address has to be turned into a pointer the CPU can dereference in the
//! current address space. The right translation depends on who is looking:
//!
//! - after the kernel rebased its lists into the direct map, a list address
//!   *is* a usable virtual address ([`DirectMapper`]);
//! - structures the bootstrap stage left behind are known only by their
//!   physical address and are reached through the HHDM ([`HhdmPhysMapper`]);
//! - tests back list addresses with ordinary heap memory.
//!
//! [`NodeMapper`] abstracts over these so that the free-list engine never
//! needs to know which address space it lives in. [`PhysMapper`] does the same
//! for the handoff structures read during initialization.

use crate::free_list::FreeNode;
use kernel_info::memory::HHDM_BASE;
use kernel_memory_addresses::{MemoryAddress, PhysicalAddress, VirtualAddress};

/// Translate a free-list address into a pointer to its [`FreeNode`].
///
/// Producing the pointer is safe; dereferencing it is the free list's
/// responsibility and is only done for blocks the list owns.
pub trait NodeMapper {
    fn node_ptr(&self, addr: MemoryAddress) -> *mut FreeNode;
}

impl<M: NodeMapper + ?Sized> NodeMapper for &M {
    #[inline]
    fn node_ptr(&self, addr: MemoryAddress) -> *mut FreeNode {
        (**self).node_ptr(addr)
    }
}

/// Identity mapper: every list address is a mapped virtual address.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct DirectMapper;

impl NodeMapper for DirectMapper {
    #[inline]
    fn node_ptr(&self, addr: MemoryAddress) -> *mut FreeNode {
        VirtualAddress::from(addr).as_mut_ptr()
    }
}

/// Reach structures that are only known by their physical address.
///
/// Loader: often identity. Kernel: via the HHDM ([`HhdmPhysMapper`]).
pub trait PhysMapper {
    /// Pointer to physical address `pa` in the current address space.
    fn phys_to_ptr<T>(&self, pa: PhysicalAddress) -> *mut T;

    /// Borrow a `T` stored at physical address `pa`.
    ///
    /// # Safety
    /// - The mapping must cover `pa..pa + size_of::<T>()`.
    /// - The memory must hold a valid, suitably aligned `T` that is not
    ///   mutated for the lifetime `'a`.
    unsafe fn phys_to_ref<'a, T>(&self, pa: PhysicalAddress) -> &'a T {
        // SAFETY: Caller must ensure the physical address is valid and mapped.
        unsafe { &*self.phys_to_ptr::<T>(pa) }
    }

    /// Borrow `len` consecutive `T`s starting at physical address `pa`.
    ///
    /// # Safety
    /// Same requirements as [`phys_to_ref`](Self::phys_to_ref), for the whole slice.
    unsafe fn phys_to_slice<'a, T>(&self, pa: PhysicalAddress, len: usize) -> &'a [T] {
        if len == 0 {
            return &[];
        }
        // SAFETY: Caller must ensure the range is valid and mapped.
        unsafe { core::slice::from_raw_parts(self.phys_to_ptr::<T>(pa), len) }
    }
}

/// Reach physical memory through the higher-half direct map.
///
/// Every physical address `pa` is mapped at `HHDM_BASE + pa`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct HhdmPhysMapper;

impl HhdmPhysMapper {
    /// Direct-map alias of `pa`.
    #[inline]
    #[must_use]
    pub const fn phys_to_virt(&self, pa: PhysicalAddress) -> VirtualAddress {
        pa.to_virtual(HHDM_BASE)
    }
}

impl PhysMapper for HhdmPhysMapper {
    #[inline]
    fn phys_to_ptr<T>(&self, pa: PhysicalAddress) -> *mut T {
        self.phys_to_virt(pa).as_mut_ptr()
    }
}

impl NodeMapper for HhdmPhysMapper {
    #[inline]
    fn node_ptr(&self, addr: MemoryAddress) -> *mut FreeNode {
        self.phys_to_virt(PhysicalAddress::from(addr)).as_mut_ptr()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_mapper_is_identity() {
        let p = DirectMapper.node_ptr(MemoryAddress::new(0xffff_8880_0010_2000));
        assert_eq!(p as usize, 0xffff_8880_0010_2000);
    }

    #[test]
    fn hhdm_mapper_adds_the_offset() {
        let p = HhdmPhysMapper.node_ptr(MemoryAddress::new(0x0010_2000));
        assert_eq!(p as usize as u64, HHDM_BASE + 0x0010_2000);
        assert_eq!(
            HhdmPhysMapper.phys_to_virt(PhysicalAddress::new(0x1000)),
            VirtualAddress::new(HHDM_BASE + 0x1000)
        );
    }

    #[test]
    fn handoff_structures_are_read_through_the_phys_mapper() {
        struct Identity;
        impl PhysMapper for Identity {
            #[allow(clippy::cast_possible_truncation)]
            fn phys_to_ptr<T>(&self, pa: PhysicalAddress) -> *mut T {
                core::ptr::with_exposed_provenance_mut(pa.as_u64() as usize)
            }
        }

        let words = [7_u64, 8, 9];
        let pa = PhysicalAddress::new(words.as_ptr().expose_provenance() as u64);
        let first: &u64 = unsafe { Identity.phys_to_ref(pa) };
        let all: &[u64] = unsafe { Identity.phys_to_slice(pa, 3) };
        let none: &[u64] = unsafe { Identity.phys_to_slice(PhysicalAddress::zero(), 0) };

        assert_eq!(*first, 7);
        assert_eq!(all, [7, 8, 9]);
        assert!(none.is_empty());
        assert_eq!(
            HhdmPhysMapper.phys_to_ptr::<u64>(PhysicalAddress::new(0x2000)) as usize as u64,
            HHDM_BASE + 0x2000
        );
    }

    #[test]
    fn mapper_references_forward() {
        fn through<M: NodeMapper>(m: M) -> usize {
            m.node_ptr(MemoryAddress::new(0x4000)) as usize
        }
        assert_eq!(through(&DirectMapper), 0x4000);
        assert_eq!(through(&&DirectMapper), 0x4000);
    }
}
