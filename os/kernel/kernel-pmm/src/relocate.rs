//! # Boot List Relocation
//!
//! The bootstrap stage threads its free list while running in 32-bit protected
//! mode with paging off: every address it stores is physical, and every link it
//! writes only covers the lower 32 bits of the `next` word. Once the kernel runs
//! in the higher half, that list must be rewritten in place so that all
//! addresses are direct-map aliases:
//!
//! ```text
//! before:  head = 0x0010_0000 ─► [ 0x????????_0010_1000 ] ─► [ 0x????????_0010_2000 ] ─► …
//! after:   head = HHDM + 0x0010_0000 ─► [ HHDM + 0x0010_1000 ] ─► [ HHDM + 0x0010_2000 ] ─► …
//! ```
//!
//! The walk ends at the first masked link that is `0` or that points outside
//! the relocated range; the bootstrap ends its chain either way. The walk also
//! never visits more nodes than the range can hold, so a corrupted chain is cut
//! instead of looping forever.

use crate::free_list::{FreeList, FreeNode, InitError};
use crate::mapper::NodeMapper;
use kernel_info::boot::BootFreeList;
use kernel_info::memory::BOOTSTRAP_LINK_MASK;
use kernel_memory_addresses::{MemoryAddress, PhysicalAddress, VirtualAddress};
use log::{debug, info, warn};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum RelocateError {
    #[error("invalid bootstrap free list: {0}")]
    Descriptor(#[from] InitError),
    #[error("bootstrap head {head} lies outside the relocated range")]
    HeadOutOfRange { head: VirtualAddress },
}

/// Rebase the bootstrap free list by `offset` and adopt it.
///
/// `mapper` must already see the relocated addresses, i.e. the direct map has
/// to be live before this is called. Returns the rebased list together with
/// the number of free blocks found on it.
///
/// # Errors
/// Returns a [`RelocateError`] if the rebased descriptor is not a valid list
/// or its head lies outside the rebased range.
///
/// # Safety
/// - `boot` must describe a chain that only the caller owns.
/// - Every block in `[base + offset, ceiling + offset)` must be mapped writable
///   through `mapper`.
pub unsafe fn rebase_boot_list<M: NodeMapper>(
    mapper: M,
    boot: &BootFreeList,
    offset: u64,
) -> Result<(FreeList<M>, u64), RelocateError> {
    info!(
        "Bootstrap free list: head={:#x} base={:#x} ceiling={:#x} object_size={:#x}",
        boot.head, boot.base, boot.ceiling, boot.object_size
    );

    let base = PhysicalAddress::new(boot.base).to_virtual(offset);
    let ceiling = PhysicalAddress::new(boot.ceiling).to_virtual(offset);
    let head = relocate_link(boot.head, offset);

    // SAFETY: the chain is validated and rewritten below before anyone uses it.
    let list = unsafe {
        FreeList::from_raw_parts(mapper, base.into(), ceiling.into(), head, boot.object_size)?
    };

    let Some(head) = head else {
        info!("Bootstrap free list is empty");
        return Ok((list, 0));
    };
    if !is_block_of(&list, head) {
        return Err(RelocateError::HeadOutOfRange { head: head.into() });
    }

    let capacity = (ceiling.as_u64() - base.as_u64()) / boot.object_size;
    let mut node = head;
    let mut visited = 1;

    loop {
        let ptr = list.mapper().node_ptr(node);
        // SAFETY: `node` is a block of the bootstrap list inside the mapped range.
        let raw = unsafe { ptr.read() }.raw();

        let next = relocate_link(raw, offset).filter(|&next| is_block_of(&list, next));
        let next = match next {
            Some(_) if visited == capacity => {
                warn!("Bootstrap free list longer than its range; cutting it at {node}");
                None
            }
            Some(next) => Some(next),
            None => {
                if !PhysicalAddress::new(raw).masked(BOOTSTRAP_LINK_MASK).is_null() {
                    debug!("Bootstrap free list ends at {node} (link {raw:#x})");
                }
                None
            }
        };

        // SAFETY: as above.
        unsafe { ptr.write(FreeNode::new(next)) };

        match next {
            Some(next) => {
                node = next;
                visited += 1;
            }
            None => break,
        }
    }

    // A short cycle is walked more than once before it is cut.
    let count = list.len();
    info!(
        "Relocated {count} free blocks into {}..{}",
        list.base(),
        list.ceiling()
    );
    Ok((list, count))
}

/// Masked and rebased form of a link written by the bootstrap stage.
fn relocate_link(raw: u64, offset: u64) -> Option<MemoryAddress> {
    let pa = PhysicalAddress::new(raw).masked(BOOTSTRAP_LINK_MASK);
    if pa.is_null() {
        None
    } else {
        Some(pa.to_virtual(offset).into())
    }
}

fn is_block_of<M: NodeMapper>(list: &FreeList<M>, addr: MemoryAddress) -> bool {
    list.contains(addr) && (addr.as_u64() - list.base().as_u64()).is_multiple_of(list.object_size())
}
