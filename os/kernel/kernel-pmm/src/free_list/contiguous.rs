//! Contiguous allocation by repeated pops.
//!
//! Blocks are popped one at a time. As long as every block sits exactly one
//! object above the previous one, the run grows. A gap breaks the run: the
//! partial run is parked on a scratch chain threaded through the parked blocks
//! themselves, and a new run starts at the block that broke it. Parked blocks
//! are kept off the list for the rest of the search so they cannot break the
//! next run again; all of them go back when the search ends.

use super::{Bounds, FreeError, FreeList};
use crate::mapper::NodeMapper;
use kernel_memory_addresses::MemoryAddress;
use log::trace;

/// Number of broken runs after which a contiguous search gives up.
pub const MAX_FRAGMENTATION_RETRIES: u32 = 16;

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum ContiguousAllocError {
    #[error("a contiguous run needs at least one object")]
    ZeroCount,
    #[error("the list ran out of blocks before {count} adjacent ones were found")]
    OutOfMemory { count: u64 },
    #[error("gave up on {count} adjacent blocks after {retries} broken runs")]
    TooFragmented { count: u64, retries: u32 },
}

/// Blocks taken off the list during a search.
#[derive(Default)]
struct Parked {
    head: Option<MemoryAddress>,
    tail: Option<MemoryAddress>,
}

/// The run currently being grown.
struct Run {
    start: MemoryAddress,
    len: u64,
}

impl<M: NodeMapper, B: Bounds> FreeList<M, B> {
    /// Allocate `count` physically adjacent blocks and return the lowest one.
    ///
    /// Only runs that come out of the list in ascending order are found; a
    /// freshly initialized list, or one that got its runs back through
    /// [`free_contiguous`](Self::free_contiguous), always qualifies.
    ///
    /// Whatever the outcome, every block the search touched and did not hand
    /// out is back on the list afterwards.
    ///
    /// # Errors
    /// - [`ContiguousAllocError::ZeroCount`] for `count == 0`.
    /// - [`ContiguousAllocError::OutOfMemory`] if the list runs dry first.
    /// - [`ContiguousAllocError::TooFragmented`] once
    ///   [`MAX_FRAGMENTATION_RETRIES`] runs were broken.
    pub fn alloc_contiguous(&mut self, count: u64) -> Result<MemoryAddress, ContiguousAllocError> {
        if count == 0 {
            return Err(ContiguousAllocError::ZeroCount);
        }

        let mut parked = Parked::default();
        let mut retries = 0;
        let mut run: Option<Run> = None;

        loop {
            if let Some(r) = &run
                && r.len == count
            {
                let start = r.start;
                self.unpark(&parked);
                return Ok(start);
            }

            let Some(block) = self.alloc() else {
                if let Some(r) = run {
                    self.park(&mut parked, &r);
                }
                self.unpark(&parked);
                return Err(ContiguousAllocError::OutOfMemory { count });
            };

            let Some(r) = run.as_mut() else {
                run = Some(Run { start: block, len: 1 });
                continue;
            };
            if Some(block) == self.run_end(r) {
                r.len += 1;
                continue;
            }

            self.park(&mut parked, r);
            retries += 1;
            trace!(
                "Contiguous run of {} at {} broken by {block} ({retries}/{MAX_FRAGMENTATION_RETRIES})",
                r.len, r.start
            );

            let fresh = Run { start: block, len: 1 };
            if retries >= MAX_FRAGMENTATION_RETRIES {
                self.park(&mut parked, &fresh);
                self.unpark(&parked);
                return Err(ContiguousAllocError::TooFragmented { count, retries });
            }
            *r = fresh;
        }
    }

    /// Return `count` adjacent blocks starting at `addr`, highest address first.
    ///
    /// # Errors
    /// The whole run is validated before anything is pushed; see
    /// [`free`](Self::free) for the reasons a run is rejected.
    ///
    /// # Safety
    /// - The caller must own every block of the run, typically because it was
    ///   returned by [`alloc_contiguous`](Self::alloc_contiguous).
    pub unsafe fn free_contiguous(&mut self, addr: MemoryAddress, count: u64) -> Result<(), FreeError> {
        if count == 0 {
            return Ok(());
        }
        self.check_run(addr, count)?;
        for i in (0..count).rev() {
            // SAFETY: validated above; ownership is guaranteed by the caller.
            unsafe { self.push(addr + i * self.object_size) };
        }
        Ok(())
    }

    /// Address right above the last block of `run`.
    fn run_end(&self, run: &Run) -> Option<MemoryAddress> {
        run.len
            .checked_mul(self.object_size)
            .and_then(|bytes| run.start.checked_add(bytes))
    }

    /// Chain the blocks of `run` in ascending order in front of the parked ones.
    fn park(&self, parked: &mut Parked, run: &Run) {
        // SAFETY: the blocks of a run were popped from this list and are ours.
        unsafe { self.thread(run.start, run.len, parked.head) };
        if parked.tail.is_none() {
            parked.tail = Some(run.start + (run.len - 1) * self.object_size);
        }
        parked.head = Some(run.start);
    }

    /// Put all parked blocks back in front of the list.
    fn unpark(&mut self, parked: &Parked) {
        if let (Some(head), Some(tail)) = (parked.head, parked.tail) {
            // SAFETY: `tail` is a parked block and therefore ours.
            unsafe { self.write_link(tail, self.head) };
            self.head = Some(head);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::free_list::Ceiling;
    use crate::test_ram::TestRam;

    const PAGE: u64 = 0x1000;

    fn addr(v: u64) -> MemoryAddress {
        MemoryAddress::new(v)
    }

    fn list(ram: &TestRam, base: u64, blocks: u64) -> FreeList<&TestRam, Ceiling> {
        unsafe { FreeList::new(ram, addr(base), addr(base + blocks * PAGE), PAGE) }.unwrap()
    }

    /// Allocate everything, then give back every other block lowest-first so
    /// that no two consecutive pops are adjacent.
    fn checkerboard(ram: &TestRam, base: u64, blocks: u64) -> FreeList<&TestRam, Ceiling> {
        let mut l = list(ram, base, blocks);
        while l.alloc().is_some() {}
        for i in (0..blocks).step_by(2) {
            unsafe { l.free(addr(base + i * PAGE)) }.unwrap();
        }
        l
    }

    #[test]
    fn pristine_run_comes_from_the_base() {
        let ram = TestRam::new(0x1000, 8);
        let mut l = list(&ram, 0x1000, 8);

        let run = l.alloc_contiguous(4).unwrap();
        assert_eq!(run, addr(0x1000));
        assert_eq!(l.len(), 4);
        assert_eq!(l.alloc(), Some(addr(0x5000)));
    }

    #[test]
    fn freed_run_can_be_allocated_again() {
        let ram = TestRam::new(0x1000, 8);
        let mut l = list(&ram, 0x1000, 8);

        let run = l.alloc_contiguous(3).unwrap();
        unsafe { l.free_contiguous(run, 3) }.unwrap();
        assert_eq!(l.len(), 8);

        let blocks: Vec<u64> = l.iter().take(3).map(MemoryAddress::as_u64).collect();
        assert_eq!(blocks, [0x1000, 0x2000, 0x3000]);
        assert_eq!(l.alloc_contiguous(3), Ok(run));
    }

    #[test]
    fn skips_a_broken_run_and_restores_it() {
        let ram = TestRam::new(0x1000, 8);
        let mut l = list(&ram, 0x1000, 8);
        while l.alloc().is_some() {}

        unsafe {
            l.free_contiguous(addr(0x5000), 3).unwrap();
            l.free(addr(0x3000)).unwrap();
        }

        assert_eq!(l.alloc_contiguous(3), Ok(addr(0x5000)));
        assert_eq!(l.iter().collect::<Vec<_>>(), [addr(0x3000)]);
    }

    #[test]
    fn isolated_blocks_never_form_a_run() {
        let ram = TestRam::new(0x1000, 10);
        let mut l = checkerboard(&ram, 0x1000, 10);
        assert_eq!(l.len(), 5);

        assert_eq!(
            l.alloc_contiguous(2),
            Err(ContiguousAllocError::OutOfMemory { count: 2 })
        );
        assert_eq!(l.len(), 5);

        let mut blocks: Vec<u64> = l.iter().map(MemoryAddress::as_u64).collect();
        blocks.sort_unstable();
        assert_eq!(blocks, [0x1000, 0x3000, 0x5000, 0x7000, 0x9000]);
    }

    #[test]
    fn single_free_block_is_not_a_run() {
        let ram = TestRam::new(0x1000, 4);
        let mut l = list(&ram, 0x1000, 4);
        while l.alloc().is_some() {}
        unsafe { l.free(addr(0x2000)) }.unwrap();

        assert_eq!(
            l.alloc_contiguous(2),
            Err(ContiguousAllocError::OutOfMemory { count: 2 })
        );
        assert_eq!(l.iter().collect::<Vec<_>>(), [addr(0x2000)]);
    }

    #[test]
    fn blocks_taken_from_the_middle_leave_no_pair() {
        let ram = TestRam::new(0x1000, 4);
        let mut l = list(&ram, 0x1000, 4);
        let first = l.alloc().unwrap();
        assert_eq!(l.alloc(), Some(addr(0x2000)));
        assert_eq!(l.alloc(), Some(addr(0x3000)));
        unsafe { l.free(first) }.unwrap();

        assert_eq!(
            l.alloc_contiguous(2),
            Err(ContiguousAllocError::OutOfMemory { count: 2 })
        );
        let mut blocks: Vec<u64> = l.iter().map(MemoryAddress::as_u64).collect();
        blocks.sort_unstable();
        assert_eq!(blocks, [0x1000, 0x4000]);
    }

    #[test]
    fn fragmentation_cap_fails_hard() {
        let ram = TestRam::new(0x10_0000, 80);
        let mut l = checkerboard(&ram, 0x10_0000, 80);
        assert_eq!(l.len(), 40);

        assert_eq!(
            l.alloc_contiguous(2),
            Err(ContiguousAllocError::TooFragmented {
                count: 2,
                retries: MAX_FRAGMENTATION_RETRIES
            })
        );
        assert_eq!(l.len(), 40);
    }

    #[test]
    fn exhaustion_restores_the_partial_run() {
        let ram = TestRam::new(0x1000, 4);
        let mut l = list(&ram, 0x1000, 4);

        assert_eq!(
            l.alloc_contiguous(5),
            Err(ContiguousAllocError::OutOfMemory { count: 5 })
        );
        assert_eq!(l.len(), 4);
        assert_eq!(l.alloc_contiguous(4), Ok(addr(0x1000)));
    }

    #[test]
    fn zero_count_is_rejected() {
        let ram = TestRam::new(0x1000, 2);
        let mut l = list(&ram, 0x1000, 2);
        assert_eq!(l.alloc_contiguous(0), Err(ContiguousAllocError::ZeroCount));
        assert_eq!(l.len(), 2);
    }

    #[test]
    fn single_block_run_is_a_plain_pop() {
        let ram = TestRam::new(0x1000, 2);
        let mut l = list(&ram, 0x1000, 2);
        assert_eq!(l.alloc_contiguous(1), Ok(addr(0x1000)));
        assert_eq!(l.len(), 1);
    }

    #[test]
    fn partly_out_of_bounds_run_is_rejected_whole() {
        let ram = TestRam::new(0x1000, 4);
        let mut l = list(&ram, 0x1000, 4);
        let run = l.alloc_contiguous(4).unwrap();

        let err = unsafe { l.free_contiguous(addr(0x3000), 3) };
        assert!(matches!(err, Err(FreeError::OutOfBounds { .. })));
        assert!(l.is_empty());

        unsafe { l.free_contiguous(run, 4) }.unwrap();
        assert_eq!(l.len(), 4);
    }
}
