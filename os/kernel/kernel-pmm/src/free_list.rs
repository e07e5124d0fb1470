//! # Intrusive Free List
//!
//! A singly linked list of fixed-size free blocks whose links are stored in
//! the first word of the blocks themselves:
//!
//! ```text
//!  head
//!   │
//!   ▼
//! ┌──────┬───────────┐   ┌──────┬───────────┐   ┌──────┬───────────┐
//! │ next │  (unused) │──►│ next │  (unused) │──►│  0   │  (unused) │
//! └──────┴───────────┘   └──────┴───────────┘   └──────┴───────────┘
//!  base                   base + size            base + 2·size
//! ```
//!
//! The list has no idea whether its addresses are physical or virtual; a
//! [`NodeMapper`] turns a list address into a pointer whenever a link has to be
//! read or written.
//!
//! ## Invariants
//! - Every block reachable from `head` lies inside the list's bounds, is aligned
//!   to `object_size` and is not handed out.
//! - The chain is finite and free of duplicates; a stored link of `0` ends it.
//! - Once a block is returned by an allocation the list never touches it again
//!   until it is freed.
//!
//! ## Bounds policies
//! [`Ceiling`] tracks the exclusive end of the managed range and rejects frees
//! outside of it. [`Unbounded`] is the pool flavor (see [`Pool`]) that only
//! knows its base.

mod contiguous;
mod pool;

pub use contiguous::{ContiguousAllocError, MAX_FRAGMENTATION_RETRIES};
pub use pool::Pool;

use crate::mapper::NodeMapper;
use core::fmt;
use kernel_memory_addresses::MemoryAddress;

/// Header stored at the beginning of every **free** block.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct FreeNode {
    /// Address of the next free block, or `0` at the end of the chain.
    next: u64,
}

impl FreeNode {
    #[must_use]
    pub const fn new(next: Option<MemoryAddress>) -> Self {
        match next {
            Some(addr) => Self { next: addr.as_u64() },
            None => Self { next: 0 },
        }
    }

    /// The stored link, exactly as found in memory.
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.next
    }

    #[must_use]
    pub const fn next(self) -> Option<MemoryAddress> {
        if self.next == 0 {
            None
        } else {
            Some(MemoryAddress::new(self.next))
        }
    }
}

/// How far a list knows its own extent.
pub trait Bounds: Copy + fmt::Debug {
    /// Exclusive end of the managed range, if tracked.
    fn ceiling(&self) -> Option<MemoryAddress>;
}

/// Bounds policy of the free-list engine: `[base, ceiling)`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Ceiling(MemoryAddress);

impl Bounds for Ceiling {
    fn ceiling(&self) -> Option<MemoryAddress> {
        Some(self.0)
    }
}

/// Bounds policy of the pool: only the base is known.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Unbounded;

impl Bounds for Unbounded {
    fn ceiling(&self) -> Option<MemoryAddress> {
        None
    }
}

/// Free-list descriptor.
///
/// `M` maps list addresses to pointers, `B` decides whether frees are
/// bounds-checked against a ceiling.
pub struct FreeList<M: NodeMapper, B: Bounds = Ceiling> {
    base: MemoryAddress,
    head: Option<MemoryAddress>,
    object_size: u64,
    bounds: B,
    mapper: M,
}

impl<M: NodeMapper> FreeList<M, Ceiling> {
    /// Thread `[base, ceiling)` into a list of `object_size` blocks.
    ///
    /// Blocks are chained in ascending address order and `head` starts at
    /// `base`, so the first allocations come out lowest-first.
    ///
    /// # Errors
    /// Returns an [`InitError`] if the range cannot be split into whole,
    /// aligned objects that each hold a [`FreeNode`].
    ///
    /// # Safety
    /// - `[base, ceiling)` must be mapped writable through `mapper` and must not
    ///   be used by anything else, including any other free list.
    pub unsafe fn new(
        mapper: M,
        base: MemoryAddress,
        ceiling: MemoryAddress,
        object_size: u64,
    ) -> Result<Self, InitError> {
        let count = validate_range(base, ceiling, object_size)?;
        let list = Self {
            base,
            head: Some(base),
            object_size,
            bounds: Ceiling(ceiling),
            mapper,
        };
        // SAFETY: the caller hands us exclusive ownership of the range.
        unsafe { list.thread(base, count, None) };
        Ok(list)
    }

    /// Adopt an existing, already threaded chain without touching its memory.
    ///
    /// # Errors
    /// Same checks as [`new`](Self::new).
    ///
    /// # Safety
    /// - Every block reachable from `head` must satisfy the list invariants
    ///   for `[base, ceiling)` when accessed through `mapper`.
    pub unsafe fn from_raw_parts(
        mapper: M,
        base: MemoryAddress,
        ceiling: MemoryAddress,
        head: Option<MemoryAddress>,
        object_size: u64,
    ) -> Result<Self, InitError> {
        validate_range(base, ceiling, object_size)?;
        Ok(Self {
            base,
            head,
            object_size,
            bounds: Ceiling(ceiling),
            mapper,
        })
    }

    /// Exclusive end of the managed range.
    #[must_use]
    pub const fn ceiling(&self) -> MemoryAddress {
        self.bounds.0
    }

    /// Merge `other` into this list.
    ///
    /// The list with the lower base is the basis: its chain is walked to the
    /// tail and the other list's chain is attached there, so no free block of
    /// either list is lost. The merged list spans from the lower base to the
    /// higher ceiling.
    ///
    /// # Errors
    /// Returns a [`LinkError`] together with `other` if the object sizes differ,
    /// both lists are dirty or the spans overlap. Neither list is modified.
    pub fn link(&mut self, other: Self) -> Result<(), (LinkError, Self)> {
        let overlapping = self.base < other.ceiling() && other.base < self.ceiling();
        self.splice(other, overlapping)
    }

    /// Like [`link`](Self::link), but `other` may lie inside the span of this
    /// list, e.g. in the gap between two ranges linked earlier.
    ///
    /// # Errors
    /// Returns a [`LinkError`] together with `other` if the object sizes differ
    /// or both lists are dirty. Neither list is modified.
    ///
    /// # Safety
    /// - No block of `[other.base, other.ceiling)` may belong to this list,
    ///   whether free or handed out.
    pub unsafe fn link_disjoint(&mut self, other: Self) -> Result<(), (LinkError, Self)> {
        self.splice(other, false)
    }

    fn splice(&mut self, other: Self, overlapping: bool) -> Result<(), (LinkError, Self)> {
        if self.object_size != other.object_size {
            return Err((
                LinkError::ObjectSizeMismatch {
                    left: self.object_size,
                    right: other.object_size,
                },
                other,
            ));
        }

        if self.is_dirty() && other.is_dirty() {
            return Err((LinkError::BothDirty, other));
        }

        if overlapping {
            return Err((LinkError::Overlapping, other));
        }

        let (basis_head, rest_head) = if self.base <= other.base {
            (self.head, other.head)
        } else {
            (other.head, self.head)
        };

        let head = match basis_head {
            None => rest_head,
            Some(first) => {
                let tail = self.chain_tail(first);
                // SAFETY: `tail` is the last free block of one of the two lists;
                // both share an address space and `self.mapper` reaches it.
                unsafe { self.write_link(tail, rest_head) };
                Some(first)
            }
        };

        self.base = self.base.min(other.base);
        self.bounds = Ceiling(self.ceiling().max(other.ceiling()));
        self.head = head;
        Ok(())
    }

    /// Whether `addr` lies in the span `[base, ceiling)`.
    #[must_use]
    pub fn contains(&self, addr: MemoryAddress) -> bool {
        self.base <= addr && addr < self.ceiling()
    }
}

impl<M: NodeMapper, B: Bounds> FreeList<M, B> {
    /// Pop the first free block. `None` when the list is exhausted.
    pub fn alloc(&mut self) -> Option<MemoryAddress> {
        let block = self.head?;
        // SAFETY: `block` is the head of this list and therefore a free node.
        self.head = unsafe { self.read_link(block) };
        Some(block)
    }

    /// Push `addr` back onto the front of the list.
    ///
    /// # Errors
    /// Returns a [`FreeError`] for the null address, for addresses not aligned
    /// to the object size and, for bounded lists, for addresses outside
    /// `[base, ceiling)`. The list is left untouched.
    ///
    /// # Safety
    /// - `addr` must denote a block the caller owns and no longer uses,
    ///   typically one returned by [`alloc`](Self::alloc).
    pub unsafe fn free(&mut self, addr: MemoryAddress) -> Result<MemoryAddress, FreeError> {
        self.check_block(addr)?;
        // SAFETY: validated above; ownership is guaranteed by the caller.
        unsafe { self.push(addr) };
        Ok(addr)
    }

    #[must_use]
    pub const fn base(&self) -> MemoryAddress {
        self.base
    }

    #[must_use]
    pub const fn head(&self) -> Option<MemoryAddress> {
        self.head
    }

    #[must_use]
    pub const fn object_size(&self) -> u64 {
        self.object_size
    }

    #[must_use]
    pub const fn mapper(&self) -> &M {
        &self.mapper
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// A list is dirty once it has serviced an allocation, i.e. `head != base`.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.head != Some(self.base)
    }

    /// Number of free blocks. Walks the chain.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.iter().fold(0, |n, _| n + 1)
    }

    /// Iterate over the free blocks in chain order.
    #[must_use]
    pub const fn iter(&self) -> FreeBlocks<'_, M, B> {
        FreeBlocks {
            list: self,
            next: self.head,
        }
    }

    /// Reject addresses the list must not accept back.
    fn check_block(&self, addr: MemoryAddress) -> Result<(), FreeError> {
        if addr.is_null() {
            return Err(FreeError::Null);
        }
        if !addr.is_aligned_to(self.object_size) {
            return Err(FreeError::Misaligned {
                addr,
                object_size: self.object_size,
            });
        }
        match self.bounds.ceiling() {
            Some(ceiling) if addr < self.base || addr >= ceiling => Err(FreeError::OutOfBounds {
                addr,
                base: self.base,
                ceiling,
            }),
            _ => Ok(()),
        }
    }

    /// Validate the run of `count` blocks starting at `addr` by its two ends.
    fn check_run(&self, addr: MemoryAddress, count: u64) -> Result<(), FreeError> {
        let last = count
            .checked_sub(1)
            .and_then(|n| n.checked_mul(self.object_size))
            .and_then(|offset| addr.checked_add(offset))
            .ok_or(FreeError::Overflow { addr, count })?;
        self.check_block(addr)?;
        self.check_block(last)
    }

    /// Last block of the chain starting at `first`.
    fn chain_tail(&self, first: MemoryAddress) -> MemoryAddress {
        let mut tail = first;
        // SAFETY: only called on chains that satisfy the list invariants.
        while let Some(next) = unsafe { self.read_link(tail) } {
            tail = next;
        }
        tail
    }

    /// # Safety
    /// `addr` must be a free block of this list (or one it currently owns).
    unsafe fn push(&mut self, addr: MemoryAddress) {
        // SAFETY: forwarded from the caller.
        unsafe { self.write_link(addr, self.head) };
        self.head = Some(addr);
    }

    /// Link `count` consecutive blocks starting at `first` in ascending order
    /// and let the last one point at `tail`.
    ///
    /// # Safety
    /// The blocks must be writable through the mapper and owned by this list.
    unsafe fn thread(&self, first: MemoryAddress, count: u64, tail: Option<MemoryAddress>) {
        let mut current = first;
        for i in 1..=count {
            let next = if i == count {
                tail
            } else {
                Some(current + self.object_size)
            };
            // SAFETY: forwarded from the caller.
            unsafe { self.write_link(current, next) };
            if let Some(next) = next {
                current = next;
            }
        }
    }

    /// # Safety
    /// `addr` must be a block owned by this list.
    unsafe fn read_link(&self, addr: MemoryAddress) -> Option<MemoryAddress> {
        // SAFETY: forwarded from the caller; blocks are aligned for `FreeNode`.
        unsafe { self.mapper.node_ptr(addr).read() }.next()
    }

    /// # Safety
    /// `addr` must be a block owned by this list.
    unsafe fn write_link(&self, addr: MemoryAddress, next: Option<MemoryAddress>) {
        // SAFETY: forwarded from the caller; blocks are aligned for `FreeNode`.
        unsafe { self.mapper.node_ptr(addr).write(FreeNode::new(next)) };
    }
}

impl<M: NodeMapper, B: Bounds> fmt::Debug for FreeList<M, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FreeList")
            .field("base", &self.base)
            .field("ceiling", &self.bounds.ceiling())
            .field("head", &self.head)
            .field("object_size", &format_args!("{:#x}", self.object_size))
            .finish_non_exhaustive()
    }
}

/// Iterator over the free blocks of a [`FreeList`].
pub struct FreeBlocks<'a, M: NodeMapper, B: Bounds> {
    list: &'a FreeList<M, B>,
    next: Option<MemoryAddress>,
}

impl<M: NodeMapper, B: Bounds> Iterator for FreeBlocks<'_, M, B> {
    type Item = MemoryAddress;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.next?;
        // SAFETY: `block` was reached from the head of a list we borrow.
        self.next = unsafe { self.list.read_link(block) };
        Some(block)
    }
}

/// Check the parameters of a list over `[base, ceiling)` and return its capacity.
fn validate_range(
    base: MemoryAddress,
    ceiling: MemoryAddress,
    object_size: u64,
) -> Result<u64, InitError> {
    if object_size < size_of::<FreeNode>() as u64
        || !object_size.is_multiple_of(align_of::<FreeNode>() as u64)
    {
        return Err(InitError::InvalidObjectSize(object_size));
    }
    if base.is_null() {
        return Err(InitError::NullBase);
    }
    if !base.is_aligned_to(object_size) {
        return Err(InitError::UnalignedBase { base, object_size });
    }
    let bytes = match ceiling.distance_from(base) {
        Some(0) | None => return Err(InitError::Empty { base, ceiling }),
        Some(bytes) => bytes,
    };
    if !bytes.is_multiple_of(object_size) {
        return Err(InitError::PartialObject { base, ceiling });
    }
    Ok(bytes / object_size)
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum InitError {
    #[error("object size {0:#x} cannot hold an aligned free-list link")]
    InvalidObjectSize(u64),
    #[error("the null address cannot be part of a free list")]
    NullBase,
    #[error("base {base} is not aligned to the object size {object_size:#x}")]
    UnalignedBase {
        base: MemoryAddress,
        object_size: u64,
    },
    #[error("range {base}..{ceiling} is empty")]
    Empty {
        base: MemoryAddress,
        ceiling: MemoryAddress,
    },
    #[error("range {base}..{ceiling} is not a whole number of objects")]
    PartialObject {
        base: MemoryAddress,
        ceiling: MemoryAddress,
    },
    #[error("{count} objects at {base} wrap the address space")]
    Overflow { base: MemoryAddress, count: u64 },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FreeError {
    #[error("the null address is never a free block")]
    Null,
    #[error("{addr} is not aligned to the object size {object_size:#x}")]
    Misaligned { addr: MemoryAddress, object_size: u64 },
    #[error("{addr} lies outside {base}..{ceiling}")]
    OutOfBounds {
        addr: MemoryAddress,
        base: MemoryAddress,
        ceiling: MemoryAddress,
    },
    #[error("a run of {count} objects at {addr} wraps the address space")]
    Overflow { addr: MemoryAddress, count: u64 },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum LinkError {
    #[error("object size mismatch ({left:#x} vs. {right:#x})")]
    ObjectSizeMismatch { left: u64, right: u64 },
    #[error("both lists are dirty")]
    BothDirty,
    #[error("the lists manage overlapping ranges")]
    Overlapping,
}
