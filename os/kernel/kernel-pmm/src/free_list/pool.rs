//! Pool flavor of the free list and scan-based multi-page allocation.

use super::{Bounds, FreeError, FreeList, InitError, Unbounded, validate_range};
use crate::mapper::NodeMapper;
use kernel_memory_addresses::MemoryAddress;

/// A free list that only remembers its base.
///
/// Frees are checked for alignment but not against an upper bound.
pub type Pool<M> = FreeList<M, Unbounded>;

impl<M: NodeMapper> FreeList<M, Unbounded> {
    /// Thread `count` objects of `object_size` bytes starting at `base`.
    ///
    /// # Errors
    /// Same checks as [`FreeList::new`], plus [`InitError::Overflow`] if the
    /// objects would wrap the address space.
    ///
    /// # Safety
    /// - The `count * object_size` bytes at `base` must be mapped writable
    ///   through `mapper` and must not be used by anything else.
    pub unsafe fn new_pool(
        mapper: M,
        base: MemoryAddress,
        object_size: u64,
        count: u64,
    ) -> Result<Self, InitError> {
        let end = count
            .checked_mul(object_size)
            .and_then(|bytes| base.checked_add(bytes))
            .ok_or(InitError::Overflow { base, count })?;
        let count = validate_range(base, end, object_size)?;

        let pool = Self {
            base,
            head: Some(base),
            object_size,
            bounds: Unbounded,
            mapper,
        };
        // SAFETY: the caller hands us exclusive ownership of the range.
        unsafe { pool.thread(base, count, None) };
        Ok(pool)
    }
}

impl<M: NodeMapper, B: Bounds> FreeList<M, B> {
    /// Find `count` blocks that follow each other in the chain *and* in memory,
    /// unlink them and return the first.
    ///
    /// Blocks in front of and behind the run stay on the list. Returns `None`
    /// when the chain ends before such a run is found, or for `count == 0`.
    pub fn alloc_pages(&mut self, count: u64) -> Option<MemoryAddress> {
        if count == 0 {
            return None;
        }

        let mut before: Option<MemoryAddress> = None;
        let mut prev: Option<MemoryAddress> = None;
        let mut start = self.head?;
        let mut len = 0;
        let mut cursor = self.head;

        while let Some(node) = cursor {
            let adjacent = prev.and_then(|p| p.checked_add(self.object_size)) == Some(node);
            if !adjacent {
                before = prev;
                start = node;
                len = 0;
            }
            len += 1;

            // SAFETY: `node` was reached from the head of this list.
            let next = unsafe { self.read_link(node) };
            if len == count {
                match before {
                    // SAFETY: `b` is a free block of this list.
                    Some(b) => unsafe { self.write_link(b, next) },
                    None => self.head = next,
                }
                return Some(start);
            }

            prev = Some(node);
            cursor = next;
        }

        None
    }

    /// Put `count` adjacent blocks starting at `addr` back in front of the list,
    /// in ascending order.
    ///
    /// # Errors
    /// Bounded lists reject runs that leave their range; every list rejects
    /// misaligned runs. See [`free`](Self::free).
    ///
    /// # Safety
    /// - The caller must own every block of the run, typically because it was
    ///   returned by [`alloc_pages`](Self::alloc_pages).
    pub unsafe fn free_pages(&mut self, addr: MemoryAddress, count: u64) -> Result<(), FreeError> {
        if count == 0 {
            return Ok(());
        }
        self.check_run(addr, count)?;
        // SAFETY: validated above; ownership is guaranteed by the caller.
        unsafe { self.thread(addr, count, self.head) };
        self.head = Some(addr);
        Ok(())
    }
}
