//! Placement policies: the strategy used to pick which free block satisfies
//! an allocation. Both operate on the address-ordered free list and return
//! `None` on a miss, which makes the facade fall back to arena growth.

use std::ptr::NonNull;

use crate::{boundary, freelist::FreeList, Pointer};

/// Which free block a request is served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Policy {
    /// Always picks the biggest free block. Leaves the largest possible
    /// remainder after the split, postponing the next heap growth at the
    /// cost of grinding down large blocks over time.
    #[default]
    WorstFit,
    /// Resumes scanning from the last allocation point and wraps around,
    /// amortizing search cost instead of always rescanning from the head.
    NextFit,
}

/// Runs the configured policy over the free list. `cursor` is the payload
/// address of the most recent allocation; only next-fit looks at it.
pub(crate) unsafe fn find_fit(
    list: &FreeList,
    policy: Policy,
    size: usize,
    cursor: Pointer<u8>,
) -> Pointer<u8> {
    match policy {
        Policy::WorstFit => worst_fit(list, size),
        Policy::NextFit => next_fit(list, size, cursor),
    }
}

/// The biggest free block, if it is big enough.
unsafe fn worst_fit(list: &FreeList, size: usize) -> Pointer<u8> {
    list.largest()
        .filter(|&block| boundary::size_of_block(block) >= size)
}

/// First fitting block at or after the cursor; on reaching the end of the
/// list the scan wraps and continues from the head up to (but not
/// including) the starting node.
unsafe fn next_fit(list: &FreeList, size: usize, cursor: Pointer<u8>) -> Pointer<u8> {
    let fits = |block: NonNull<u8>| boundary::size_of_block(block) >= size;

    let start = match cursor {
        None => list.head(),
        Some(cursor) => {
            let mut node = list.head();
            while let Some(n) = node {
                if n.cast::<u8>() >= cursor {
                    break;
                }
                node = n.as_ref().next;
            }
            node
        }
    };

    let mut node = start;
    while let Some(n) = node {
        let block = n.cast::<u8>();
        if fits(block) {
            return Some(block);
        }
        node = n.as_ref().next;
    }

    let mut node = list.head();
    while node != start {
        let n = node.expect("wrap scan stays before the start node");
        let block = n.cast::<u8>();
        if fits(block) {
            return Some(block);
        }
        node = n.as_ref().next;
    }

    None
}
