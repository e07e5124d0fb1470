//! # Process-wide Physical Memory Manager
//!
//! The kernel keeps exactly one [`PhysicalMemoryManager`]. It lives in a
//! `static` behind a [`SpinLock`], starts out uninitialized and is initialized
//! once from the [`KernelBootInfo`] the bootstrap stage hands over:
//!
//! ```rust,no_run
//! use kernel_info::boot::KernelBootInfo;
//! use kernel_pmm::PMM;
//!
//! extern "C" fn kernel_entry(boot_info: *const KernelBootInfo) -> ! {
//!     let boot_info = unsafe { &*boot_info };
//!     let report = unsafe { PMM.init_from_boot_info(boot_info) }.expect("PMM init");
//!     log::info!("{} free frames", report.free_blocks);
//!
//!     let frame = PMM.alloc().expect("out of memory");
//!     unsafe { PMM.free(frame) }.expect("free frame");
//!     loop {}
//! }
//! ```

use crate::mapper::{DirectMapper, HhdmPhysMapper, NodeMapper, PhysMapper};
use crate::pmm::{InitReport, PhysicalMemoryManager, PmmError};
use kernel_info::boot::{BootFreeList, KernelBootInfo, MemoryMapEntry};
use kernel_info::memory::HHDM_BASE;
use kernel_memory_addresses::VirtualAddress;
use kernel_sync::SpinLock;
use log::debug;

/// The kernel's physical memory manager.
pub static PMM: LockedPmm = LockedPmm::new(HHDM_BASE);

/// A [`PhysicalMemoryManager`] behind a spin lock.
///
/// The lock is held for the whole of every operation, including list walks.
pub struct LockedPmm<M: NodeMapper = DirectMapper> {
    inner: SpinLock<PhysicalMemoryManager<M>>,
}

impl<M: NodeMapper> LockedPmm<M> {
    #[must_use]
    pub const fn new(hhdm_offset: u64) -> Self {
        Self {
            inner: SpinLock::new(PhysicalMemoryManager::new(hhdm_offset)),
        }
    }

    /// Run `f` with exclusive access to the manager.
    pub fn with_lock<R>(&self, f: impl FnOnce(&mut PhysicalMemoryManager<M>) -> R) -> R {
        self.inner.with_lock(f)
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.inner.with_lock(|pmm| pmm.is_initialized())
    }

    #[must_use]
    pub fn free_blocks(&self) -> u64 {
        self.inner.with_lock(|pmm| pmm.free_blocks())
    }

    pub fn alloc(&self) -> Option<VirtualAddress> {
        self.inner.with_lock(PhysicalMemoryManager::alloc)
    }

    /// # Safety
    /// See [`PhysicalMemoryManager::free`].
    #[allow(clippy::missing_errors_doc)]
    pub unsafe fn free(&self, addr: VirtualAddress) -> Result<VirtualAddress, PmmError> {
        // SAFETY: forwarded from the caller.
        self.inner.with_lock(|pmm| unsafe { pmm.free(addr) })
    }

    #[allow(clippy::missing_errors_doc)]
    pub fn alloc_contiguous(&self, count: u64) -> Result<VirtualAddress, PmmError> {
        self.inner.with_lock(|pmm| pmm.alloc_contiguous(count))
    }

    /// # Safety
    /// See [`PhysicalMemoryManager::free_contiguous`].
    #[allow(clippy::missing_errors_doc)]
    pub unsafe fn free_contiguous(&self, addr: VirtualAddress, count: u64) -> Result<(), PmmError> {
        // SAFETY: forwarded from the caller.
        self.inner.with_lock(|pmm| unsafe { pmm.free_contiguous(addr, count) })
    }
}

impl<M: NodeMapper + Clone> LockedPmm<M> {
    /// # Safety
    /// See [`PhysicalMemoryManager::init`].
    #[allow(clippy::missing_errors_doc)]
    pub unsafe fn init(
        &self,
        mapper: M,
        boot: &BootFreeList,
        memory_map: &[MemoryMapEntry],
    ) -> Result<InitReport, PmmError> {
        // SAFETY: forwarded from the caller.
        self.inner.with_lock(|pmm| unsafe { pmm.init(mapper, boot, memory_map) })
    }

    /// Initialize from the bootstrap handoff, reading the structures it points
    /// to through `phys`.
    ///
    /// # Errors
    /// See [`PhysicalMemoryManager::init`].
    ///
    /// # Safety
    /// - `boot_info` must be the handoff structure written by the bootstrap
    ///   stage, and `phys` must reach everything it points to.
    /// - See [`PhysicalMemoryManager::init`] for the memory it takes over.
    #[allow(clippy::cast_possible_truncation)]
    pub unsafe fn init_from_boot_info_with<P: PhysMapper>(
        &self,
        phys: &P,
        mapper: M,
        boot_info: &KernelBootInfo,
    ) -> Result<InitReport, PmmError> {
        // SAFETY: the bootstrap stage placed both structures where `phys` reaches them.
        let (boot, memory_map) = unsafe {
            (
                phys.phys_to_ref::<BootFreeList>(boot_info.pmm_state()),
                phys.phys_to_slice::<MemoryMapEntry>(boot_info.memory_map(), boot_info.mmap_entries as usize),
            )
        };
        debug!(
            "Boot handoff: free list at {}, {} memory map entries at {}",
            boot_info.pmm_state(),
            memory_map.len(),
            boot_info.memory_map()
        );
        // SAFETY: forwarded from the caller.
        unsafe { self.init(mapper, boot, memory_map) }
    }
}

impl LockedPmm<DirectMapper> {
    /// Initialize from the bootstrap handoff through the direct map.
    ///
    /// # Errors
    /// See [`PhysicalMemoryManager::init`].
    ///
    /// # Safety
    /// - The direct map must be live and cover everything `boot_info` points to.
    /// - See [`PhysicalMemoryManager::init`] for the memory it takes over.
    pub unsafe fn init_from_boot_info(&self, boot_info: &KernelBootInfo) -> Result<InitReport, PmmError> {
        // SAFETY: forwarded from the caller.
        unsafe { self.init_from_boot_info_with(&HhdmPhysMapper, DirectMapper, boot_info) }
    }
}
