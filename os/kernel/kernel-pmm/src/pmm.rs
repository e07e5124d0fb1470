//! # Physical Memory Manager
//!
//! Owns the kernel's single free list of physical frames, addressed through
//! their direct-map aliases.
//!
//! Initialization happens once:
//! 1. the bootstrap free list is rebased into the direct map
//!    (see [`relocate`](crate::relocate));
//! 2. every further available memory-map entry that does not collide with a
//!    range linked so far becomes a fresh list and is linked in.
//!
//! Afterwards the manager only hands out and takes back [`VirtualAddress`]es,
//! and only ones inside the linked ranges.

mod regions;

pub use regions::{MAX_LINKED_REGIONS, Region};

use crate::free_list::{ContiguousAllocError, FreeError, FreeList};
use crate::mapper::{DirectMapper, NodeMapper};
use crate::relocate::{RelocateError, rebase_boot_list};
use kernel_info::boot::{BootFreeList, MemoryMapEntry};
use kernel_memory_addresses::{MemoryAddress, PhysicalAddress, VirtualAddress};
use log::{debug, info, trace, warn};
use regions::{Collision, LinkedRegions};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum PmmError {
    #[error("the physical memory manager is not initialized")]
    NotInitialized,
    #[error("the physical memory manager is already initialized")]
    AlreadyInitialized,
    #[error(transparent)]
    Relocate(#[from] RelocateError),
    #[error(transparent)]
    Free(#[from] FreeError),
    #[error("{addr} is not in any linked memory region")]
    Unmanaged { addr: VirtualAddress },
    #[error(transparent)]
    Contiguous(#[from] ContiguousAllocError),
}

/// Outcome of [`PhysicalMemoryManager::init`].
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct InitReport {
    /// Memory-map entries that were linked into the free list.
    pub linked: usize,
    /// Available memory-map entries that were left out.
    pub skipped: usize,
    /// Free blocks after initialization.
    pub free_blocks: u64,
}

pub struct PhysicalMemoryManager<M: NodeMapper = DirectMapper> {
    list: Option<FreeList<M>>,
    regions: LinkedRegions,
    hhdm_offset: u64,
}

impl<M: NodeMapper> PhysicalMemoryManager<M> {
    /// An uninitialized manager for a direct map starting at `hhdm_offset`.
    #[must_use]
    pub const fn new(hhdm_offset: u64) -> Self {
        Self {
            list: None,
            regions: LinkedRegions::new(),
            hhdm_offset,
        }
    }

    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.list.is_some()
    }

    #[must_use]
    pub const fn hhdm_offset(&self) -> u64 {
        self.hhdm_offset
    }

    /// The managed free list, once initialized.
    #[must_use]
    pub const fn free_list(&self) -> Option<&FreeList<M>> {
        self.list.as_ref()
    }

    /// The ranges linked into the free list, bootstrap range first.
    #[must_use]
    pub fn linked_regions(&self) -> &[Region] {
        self.regions.as_slice()
    }

    /// Number of free blocks. Walks the list.
    #[must_use]
    pub fn free_blocks(&self) -> u64 {
        self.list.as_ref().map_or(0, FreeList::len)
    }

    /// The physical frame behind a block handed out by this manager.
    #[must_use]
    pub const fn physical_address(&self, addr: VirtualAddress) -> Option<PhysicalAddress> {
        addr.to_physical(self.hhdm_offset)
    }

    /// Pop one free block. `None` when exhausted or not initialized.
    pub fn alloc(&mut self) -> Option<VirtualAddress> {
        self.list.as_mut()?.alloc().map(VirtualAddress::from)
    }

    /// Return one block.
    ///
    /// # Errors
    /// [`PmmError::NotInitialized`] before [`init`](Self::init),
    /// [`PmmError::Unmanaged`] outside the linked ranges, or
    /// [`PmmError::Free`] if the list rejects the address.
    ///
    /// # Safety
    /// `addr` must have been handed out by this manager and must no longer be used.
    pub unsafe fn free(&mut self, addr: VirtualAddress) -> Result<VirtualAddress, PmmError> {
        let list = self.list.as_mut().ok_or(PmmError::NotInitialized)?;
        if !self.regions.contains(addr.into()) {
            warn!("Rejected free of {addr}: not in a linked region");
            return Err(PmmError::Unmanaged { addr });
        }
        // SAFETY: forwarded from the caller.
        match unsafe { list.free(addr.into()) } {
            Ok(addr) => Ok(addr.into()),
            Err(e) => {
                warn!("Rejected free of {addr}: {e}");
                Err(e.into())
            }
        }
    }

    /// Allocate `count` adjacent blocks.
    ///
    /// # Errors
    /// [`PmmError::NotInitialized`] before [`init`](Self::init), or
    /// [`PmmError::Contiguous`] if no run was found.
    pub fn alloc_contiguous(&mut self, count: u64) -> Result<VirtualAddress, PmmError> {
        let list = self.list.as_mut().ok_or(PmmError::NotInitialized)?;
        Ok(list.alloc_contiguous(count)?.into())
    }

    /// Return `count` adjacent blocks starting at `addr`.
    ///
    /// # Errors
    /// [`PmmError::NotInitialized`] before [`init`](Self::init),
    /// [`PmmError::Unmanaged`] if the run leaves the linked ranges, or
    /// [`PmmError::Free`] if the run is rejected.
    ///
    /// # Safety
    /// The run must have been handed out by this manager and must no longer be used.
    pub unsafe fn free_contiguous(&mut self, addr: VirtualAddress, count: u64) -> Result<(), PmmError> {
        let list = self.list.as_mut().ok_or(PmmError::NotInitialized)?;
        let start = MemoryAddress::from(addr);
        let end = count
            .checked_mul(list.object_size())
            .and_then(|bytes| start.checked_add(bytes))
            .ok_or(FreeError::Overflow { addr: start, count })?;
        if !self.regions.covers(start, end) {
            warn!("Rejected free of {count} blocks at {addr}: not in a linked region");
            return Err(PmmError::Unmanaged { addr });
        }
        // SAFETY: forwarded from the caller.
        unsafe { list.free_contiguous(addr.into(), count) }.map_err(|e| {
            warn!("Rejected free of {count} blocks at {addr}: {e}");
            e.into()
        })
    }
}

impl<M: NodeMapper + Clone> PhysicalMemoryManager<M> {
    /// Adopt the bootstrap free list and link in the available memory.
    ///
    /// The first memory-map entry is never used. Entries that lie within a
    /// range linked so far, straddle one of its ends, or hold no whole block
    /// after alignment are skipped; so are entries whose link fails. Entries
    /// in the gaps between linked ranges are linked like any other.
    ///
    /// # Errors
    /// [`PmmError::AlreadyInitialized`] on a second call, or
    /// [`PmmError::Relocate`] if the bootstrap list is unusable.
    ///
    /// # Safety
    /// - The direct map at [`hhdm_offset`](Self::hhdm_offset) must be live and
    ///   `mapper` must reach every direct-mapped address of `boot` and of the
    ///   available entries of `memory_map`.
    /// - All available memory in `memory_map` must be unused by anything else.
    pub unsafe fn init(
        &mut self,
        mapper: M,
        boot: &BootFreeList,
        memory_map: &[MemoryMapEntry],
    ) -> Result<InitReport, PmmError> {
        if self.is_initialized() {
            return Err(PmmError::AlreadyInitialized);
        }

        // SAFETY: forwarded from the caller.
        let (mut list, _) = unsafe { rebase_boot_list(mapper.clone(), boot, self.hhdm_offset)? };
        let mut regions = LinkedRegions::new();
        regions.push(list.base(), list.ceiling());
        let mut report = InitReport::default();

        for (index, entry) in memory_map.iter().enumerate().skip(1) {
            if !entry.is_available() {
                trace!("Memory map entry {index} is {:?}", entry.region_type());
                continue;
            }

            let (start, end) = match self.region_for(&list, &regions, entry) {
                Ok(range) => range,
                Err(reason) => {
                    debug!(
                        "Skipping memory map entry {index} ({:#x}+{:#x}): {reason}",
                        entry.base, entry.length
                    );
                    report.skipped += 1;
                    continue;
                }
            };

            // SAFETY: available memory is ours per the caller's contract.
            let region = match unsafe { FreeList::new(mapper.clone(), start, end, list.object_size()) } {
                Ok(region) => region,
                Err(e) => {
                    warn!("Cannot use memory map entry {index}: {e}");
                    report.skipped += 1;
                    continue;
                }
            };

            // SAFETY: `region_for` ruled out any overlap with the linked ranges.
            if let Err((e, _)) = unsafe { list.link_disjoint(region) } {
                warn!("Cannot link memory map entry {index}: {e}");
                report.skipped += 1;
                continue;
            }
            regions.push(start, end);

            debug!("Linked memory map entry {index}: {start}..{end}");
            report.linked += 1;
        }

        report.free_blocks = list.len();
        info!(
            "Physical memory manager ready: {} free blocks in {}..{} ({} entries linked, {} skipped)",
            report.free_blocks,
            list.base(),
            list.ceiling(),
            report.linked,
            report.skipped
        );

        self.list = Some(list);
        self.regions = regions;
        Ok(report)
    }

    /// The direct-mapped, block-aligned range `entry` would contribute.
    fn region_for(
        &self,
        list: &FreeList<M>,
        regions: &LinkedRegions,
        entry: &MemoryMapEntry,
    ) -> Result<(MemoryAddress, MemoryAddress), SkipReason> {
        let start = entry
            .base
            .checked_add(self.hhdm_offset)
            .ok_or(SkipReason::OutsideDirectMap)?;
        let end = entry
            .end()
            .as_u64()
            .checked_add(self.hhdm_offset)
            .ok_or(SkipReason::OutsideDirectMap)?;
        let (start, end) = (MemoryAddress::new(start), MemoryAddress::new(end));

        match regions.collision(start, end) {
            Some(Collision::Covered) => return Err(SkipReason::Covered),
            Some(Collision::StraddlesStart) => return Err(SkipReason::StraddlesBase),
            Some(Collision::StraddlesEnd) => return Err(SkipReason::StraddlesCeiling),
            None => {}
        }
        if regions.is_full() {
            return Err(SkipReason::NoRegionSlot);
        }

        let size = list.object_size();
        let start = start.align_up_to(size).ok_or(SkipReason::TooSmall)?;
        let end = end.align_down_to(size);
        if start >= end {
            return Err(SkipReason::TooSmall);
        }
        Ok((start, end))
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum SkipReason {
    OutsideDirectMap,
    Covered,
    StraddlesBase,
    StraddlesCeiling,
    TooSmall,
    NoRegionSlot,
}

impl core::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            Self::OutsideDirectMap => "does not fit the direct map",
            Self::Covered => "already covered by a linked region",
            Self::StraddlesBase => "straddles the start of a linked region",
            Self::StraddlesCeiling => "straddles the end of a linked region",
            Self::TooSmall => "holds no whole block",
            Self::NoRegionSlot => "no room to track another region",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_ram::TestRam;
    use kernel_info::boot::MemoryRegionType;

    const PAGE: u64 = 0x1000;
    const OFFSET: u64 = 0xffff_8880_0000_0000;

    /// RAM for physical `0..0x40000`, seen through the direct map.
    fn ram() -> TestRam {
        TestRam::new(OFFSET, 64)
    }

    /// A fresh bootstrap chain over physical `[base, ceiling)`.
    fn boot_list(ram: &TestRam, base: u64, ceiling: u64) -> BootFreeList {
        let mut pa = base;
        while pa < ceiling {
            let next = if pa + PAGE < ceiling { pa + PAGE } else { 0 };
            ram.poke(OFFSET + pa, next);
            pa += PAGE;
        }
        BootFreeList {
            head: base,
            base,
            ceiling,
            object_size: PAGE,
        }
    }

    fn available(base: u64, length: u64) -> MemoryMapEntry {
        MemoryMapEntry::new(base, length, MemoryRegionType::Available)
    }

    #[test]
    fn use_before_init() {
        let mut pmm = PhysicalMemoryManager::<&TestRam>::new(OFFSET);
        assert!(!pmm.is_initialized());
        assert_eq!(pmm.alloc(), None);
        assert_eq!(pmm.alloc_contiguous(2), Err(PmmError::NotInitialized));
        assert_eq!(
            unsafe { pmm.free(VirtualAddress::new(OFFSET + 0x1000)) },
            Err(PmmError::NotInitialized)
        );
        assert_eq!(
            unsafe { pmm.free_contiguous(VirtualAddress::new(OFFSET + 0x1000), 2) },
            Err(PmmError::NotInitialized)
        );
        assert_eq!(pmm.free_blocks(), 0);
    }

    #[test]
    fn init_links_available_entries() {
        let ram = ram();
        let boot = boot_list(&ram, 0x10000, 0x14000);
        let map = [
            available(0x0, 0x1000),
            available(0x2000, 0x2000),
            MemoryMapEntry::new(0x4000, 0x4000, MemoryRegionType::Reserved),
            available(0x10000, 0x4000),
            available(0x20000, 0x3000),
        ];

        let mut pmm = PhysicalMemoryManager::new(OFFSET);
        let report = unsafe { pmm.init(&ram, &boot, &map) }.unwrap();

        assert_eq!(
            report,
            InitReport {
                linked: 2,
                skipped: 1,
                free_blocks: 4 + 2 + 3
            }
        );
        let list = pmm.free_list().unwrap();
        assert_eq!(list.base().as_u64(), OFFSET + 0x2000);
        assert_eq!(list.ceiling().as_u64(), OFFSET + 0x23000);

        let mut frames: Vec<u64> = core::iter::from_fn(|| pmm.alloc())
            .map(|va| va.as_u64() - OFFSET)
            .collect();
        frames.sort_unstable();
        assert_eq!(
            frames,
            [0x2000, 0x3000, 0x10000, 0x11000, 0x12000, 0x13000, 0x20000, 0x21000, 0x22000]
        );
    }

    #[test]
    fn straddling_and_tiny_entries_are_skipped() {
        let ram = ram();
        let boot = boot_list(&ram, 0x10000, 0x14000);
        let map = [
            available(0x0, 0x1000),
            available(0xE000, 0x4000),
            available(0x13000, 0x3000),
            available(0x30800, 0x800),
            available(0x30800, 0x1800),
        ];

        let mut pmm = PhysicalMemoryManager::new(OFFSET);
        let report = unsafe { pmm.init(&ram, &boot, &map) }.unwrap();

        assert_eq!(report.linked, 1);
        assert_eq!(report.skipped, 3);
        assert_eq!(report.free_blocks, 5);
        assert_eq!(pmm.free_list().unwrap().ceiling().as_u64(), OFFSET + 0x32000);
    }

    #[test]
    fn entries_between_linked_regions_are_linked() {
        let ram = ram();
        let boot = boot_list(&ram, 0x10000, 0x14000);
        let map = [
            available(0x0, 0x1000),
            available(0x2000, 0x2000),
            available(0x6000, 0x2000),
        ];

        let mut pmm = PhysicalMemoryManager::new(OFFSET);
        let report = unsafe { pmm.init(&ram, &boot, &map) }.unwrap();

        assert_eq!(
            report,
            InitReport {
                linked: 2,
                skipped: 0,
                free_blocks: 4 + 2 + 2
            }
        );
        let regions: Vec<(u64, u64)> = pmm
            .linked_regions()
            .iter()
            .map(|r| (r.start.as_u64() - OFFSET, r.end.as_u64() - OFFSET))
            .collect();
        assert_eq!(regions, [(0x10000, 0x14000), (0x2000, 0x4000), (0x6000, 0x8000)]);

        let mut frames: Vec<u64> = core::iter::from_fn(|| pmm.alloc())
            .map(|va| va.as_u64() - OFFSET)
            .collect();
        frames.sort_unstable();
        assert_eq!(
            frames,
            [0x2000, 0x3000, 0x6000, 0x7000, 0x10000, 0x11000, 0x12000, 0x13000]
        );
    }

    #[test]
    fn frees_into_gaps_are_rejected() {
        let ram = ram();
        let boot = boot_list(&ram, 0x10000, 0x14000);
        let map = [available(0x0, 0x1000), available(0x2000, 0x2000), available(0x6000, 0x2000)];
        let mut pmm = PhysicalMemoryManager::new(OFFSET);
        unsafe { pmm.init(&ram, &boot, &map) }.unwrap();
        while pmm.alloc().is_some() {}

        for gap in [0x4000, 0x5000, 0x8000, 0xA000] {
            let addr = VirtualAddress::new(OFFSET + gap);
            assert_eq!(unsafe { pmm.free(addr) }, Err(PmmError::Unmanaged { addr }));
        }
        let run = VirtualAddress::new(OFFSET + 0x3000);
        assert_eq!(
            unsafe { pmm.free_contiguous(run, 2) },
            Err(PmmError::Unmanaged { addr: run })
        );
        assert_eq!(pmm.free_blocks(), 0);

        unsafe {
            pmm.free_contiguous(VirtualAddress::new(OFFSET + 0x6000), 2).unwrap();
            pmm.free(VirtualAddress::new(OFFSET + 0x3000)).unwrap();
        }
        assert_eq!(pmm.free_blocks(), 3);
    }

    #[test]
    fn adjacent_entries_form_one_contiguous_stretch() {
        let ram = ram();
        let boot = boot_list(&ram, 0x10000, 0x12000);
        let map = [available(0x0, 0x1000), available(0x12000, 0x2000)];
        let mut pmm = PhysicalMemoryManager::new(OFFSET);
        unsafe { pmm.init(&ram, &boot, &map) }.unwrap();

        let run = pmm.alloc_contiguous(4).unwrap();
        assert_eq!(run.as_u64(), OFFSET + 0x10000);
        unsafe { pmm.free_contiguous(run, 4) }.unwrap();
        assert_eq!(pmm.free_blocks(), 4);
    }

    #[test]
    fn init_twice_is_rejected() {
        let ram = ram();
        let boot = boot_list(&ram, 0x10000, 0x12000);
        let mut pmm = PhysicalMemoryManager::new(OFFSET);
        unsafe { pmm.init(&ram, &boot, &[]) }.unwrap();

        assert_eq!(
            unsafe { pmm.init(&ram, &boot, &[]) },
            Err(PmmError::AlreadyInitialized)
        );
        assert_eq!(pmm.free_blocks(), 2);
    }

    #[test]
    fn invalid_boot_list_fails_init() {
        let ram = ram();
        let boot = BootFreeList {
            head: 0x1000,
            base: 0x1000,
            ceiling: 0x1800,
            object_size: PAGE,
        };
        let mut pmm = PhysicalMemoryManager::new(OFFSET);
        let err = unsafe { pmm.init(&ram, &boot, &[]) }.unwrap_err();
        assert!(matches!(err, PmmError::Relocate(RelocateError::Descriptor(_))));
        assert!(!pmm.is_initialized());
    }

    #[test]
    fn operations_work_on_direct_map_aliases() {
        let ram = ram();
        let boot = boot_list(&ram, 0x10000, 0x18000);
        let mut pmm = PhysicalMemoryManager::new(OFFSET);
        unsafe { pmm.init(&ram, &boot, &[]) }.unwrap();

        let a = pmm.alloc().unwrap();
        assert_eq!(a.as_u64(), OFFSET + 0x10000);
        assert_eq!(pmm.physical_address(a), Some(PhysicalAddress::new(0x10000)));

        let run = pmm.alloc_contiguous(4).unwrap();
        assert_eq!(run.as_u64(), OFFSET + 0x11000);
        assert_eq!(pmm.free_blocks(), 3);

        unsafe {
            pmm.free_contiguous(run, 4).unwrap();
            pmm.free(a).unwrap();
        }
        assert_eq!(pmm.free_blocks(), 8);

        let outside = VirtualAddress::new(OFFSET + 0x30000);
        assert_eq!(unsafe { pmm.free(outside) }, Err(PmmError::Unmanaged { addr: outside }));
        let misaligned = unsafe { pmm.free(VirtualAddress::new(OFFSET + 0x10800)) };
        assert!(matches!(misaligned, Err(PmmError::Free(FreeError::Misaligned { .. }))));
        assert_eq!(
            pmm.alloc_contiguous(0),
            Err(PmmError::Contiguous(ContiguousAllocError::ZeroCount))
        );
    }
}
