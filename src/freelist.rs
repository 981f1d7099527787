//! Intrusive free list. While a block is free its payload is not user data,
//! so the first two words are repurposed as the list links:
//!
//! ```text
//! +----------------------------+
//! | header (tag, size)         |
//! +----------------------------+
//! | pointer to prev free block | <--+
//! +----------------------------+    | FreeLinks struct, written over the
//! | pointer to next free block | <--+ first 2 words of the payload.
//! +----------------------------+
//! |     rest of the payload    | <- Could be 0 bytes.
//! +----------------------------+
//! | footer (tag, size)         |
//! +----------------------------+
//! ```
//!
//! The list is kept sorted by address in ascending order, which is what
//! allows [`FreeList::insert_and_coalesce`] to splice a freed block between
//! its list neighbors and merge it with its *physical* neighbors in the same
//! step. The two orders agree on free blocks: if two free blocks are
//! physically adjacent they are also adjacent in the list, and the public
//! operations never leave two adjacent free blocks behind.
//!
//! Node pointers are payload addresses. A block enters and leaves the list
//! only through the operations below; the element count is tracked
//! explicitly instead of being encoded in a null `tail` sentinel.

use std::{mem, ptr::NonNull};

use crate::{
    boundary::{self, Tag, BLOCK_OVERHEAD},
    Pointer,
};

/// Links stored at the start of every free block's payload.
#[repr(C)]
pub(crate) struct FreeLinks {
    pub prev: Pointer<FreeLinks>,
    pub next: Pointer<FreeLinks>,
}

/// Minimum payload a block can have: once freed, it must be able to hold
/// its own list links.
pub(crate) const MIN_BLOCK_SIZE: usize = mem::size_of::<FreeLinks>();

/// Address-ordered doubly linked list of free blocks.
pub(crate) struct FreeList {
    head: Pointer<FreeLinks>,
    tail: Pointer<FreeLinks>,
    len: usize,
}

/// Outcome of [`FreeList::insert_and_coalesce`]: the final free block (its
/// address moves backward when the freed block was merged into its physical
/// predecessor) and how many merges happened (0 to 2). Each merge reclaims
/// one header/footer pair into usable free space.
pub(crate) struct Coalesced {
    pub block: NonNull<u8>,
    pub merges: usize,
}

#[inline]
fn node_of(block: NonNull<u8>) -> NonNull<FreeLinks> {
    block.cast()
}

#[inline]
fn block_of(node: NonNull<FreeLinks>) -> NonNull<u8> {
    node.cast()
}

impl FreeList {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn head(&self) -> Pointer<FreeLinks> {
        self.head
    }

    /// Payload address of the highest free block, if any.
    pub fn tail_block(&self) -> Pointer<u8> {
        self.tail.map(block_of)
    }

    /// Links a brand-new top-of-arena block at the tail. Only used by arena
    /// growth, where the new block is above every existing one by
    /// construction; the caller has already stamped it free.
    pub(crate) unsafe fn append(&mut self, block: NonNull<u8>) {
        debug_assert!(boundary::tag_of(block) == Tag::Free);
        self.link_between(block, self.tail, None);
    }

    /// Unlinks `block` from the list. Used when an allocation consumes a
    /// free block whole; the caller re-stamps it.
    pub(crate) unsafe fn remove(&mut self, block: NonNull<u8>) {
        self.unlink(node_of(block));
    }

    /// The `free` path. Stamps `block` free, finds its position in address
    /// order, and merges it with whichever physical neighbors are free:
    /// left, right, both (three nodes collapse into one), or none (plain
    /// splice). Neighbors are discovered through the boundary tags, not the
    /// list.
    pub(crate) unsafe fn insert_and_coalesce(
        &mut self,
        block: NonNull<u8>,
        arena_start: NonNull<u8>,
        arena_end: NonNull<u8>,
    ) -> Coalesced {
        let size = boundary::size_of_block(block);
        boundary::stamp(block, size, Tag::Free);

        let before = boundary::neighbor_before(block, arena_start)
            .filter(|&b| boundary::tag_of(b) == Tag::Free);
        let after = boundary::neighbor_after(block, arena_end)
            .filter(|&a| boundary::tag_of(a) == Tag::Free);

        match (before, after) {
            (None, None) => {
                let (prev, next) = self.neighbors_by_address(block);
                self.link_between(block, prev, next);

                Coalesced { block, merges: 0 }
            }
            // Merge right: the freed block takes over the successor's list
            // slot and absorbs its span plus the tag pair between them.
            (None, Some(next)) => {
                let merged = size + BLOCK_OVERHEAD + boundary::size_of_block(next);

                self.replace(node_of(next), node_of(block));
                boundary::stamp(block, merged, Tag::Free);

                Coalesced { block, merges: 1 }
            }
            // Merge left: the predecessor simply grows in place; the freed
            // block never becomes a list node.
            (Some(prev), None) => {
                let merged = boundary::size_of_block(prev) + BLOCK_OVERHEAD + size;

                boundary::stamp(prev, merged, Tag::Free);

                Coalesced {
                    block: prev,
                    merges: 1,
                }
            }
            // Merge both: predecessor absorbs the freed block and the
            // successor, and the successor leaves the list.
            (Some(prev), Some(next)) => {
                let merged = boundary::size_of_block(prev)
                    + BLOCK_OVERHEAD
                    + size
                    + BLOCK_OVERHEAD
                    + boundary::size_of_block(next);

                self.unlink(node_of(next));
                boundary::stamp(prev, merged, Tag::Free);

                Coalesced {
                    block: prev,
                    merges: 2,
                }
            }
        }
    }

    /// Carves the front `keep` bytes of the free block `block` into an
    /// allocated block. When the rest is large enough to stand on its own
    /// (a tag pair plus [`MIN_BLOCK_SIZE`]), it stays in the list occupying
    /// `block`'s slot and is returned. Otherwise the whole block is removed
    /// from the list and absorbed into the allocation as internal
    /// fragmentation, and `None` is returned.
    pub(crate) unsafe fn split_tail(&mut self, block: NonNull<u8>, keep: usize) -> Pointer<u8> {
        let size = boundary::size_of_block(block);
        debug_assert!(size >= keep);

        let spare = size - keep;

        if spare < BLOCK_OVERHEAD + MIN_BLOCK_SIZE {
            self.unlink(node_of(block));
            boundary::stamp(block, size, Tag::Allocated);

            return None;
        }

        let remainder = NonNull::new_unchecked(block.as_ptr().add(keep + BLOCK_OVERHEAD));

        self.replace(node_of(block), node_of(remainder));
        boundary::stamp(remainder, spare - BLOCK_OVERHEAD, Tag::Free);
        boundary::stamp(block, keep, Tag::Allocated);

        Some(remainder)
    }

    /// O(n) scan for the biggest free block. Ties resolve to the first one
    /// in address order.
    pub(crate) unsafe fn largest(&self) -> Pointer<u8> {
        let mut best = None;
        let mut best_size = 0;

        for node in self.iter() {
            let block = block_of(node);
            let size = boundary::size_of_block(block);

            if size > best_size {
                best_size = size;
                best = Some(block);
            }
        }

        best
    }

    /// Iterates the list nodes head to tail. The list must not be mutated
    /// while the iterator is alive.
    pub(crate) unsafe fn iter(&self) -> Iter {
        Iter { current: self.head }
    }

    /// Finds the list nodes that would surround `block` in address order.
    /// The head and tail are checked first so that frees at the arena
    /// extremes never pay for the scan; only a block strictly between them
    /// walks the middle of the list.
    unsafe fn neighbors_by_address(
        &self,
        block: NonNull<u8>,
    ) -> (Pointer<FreeLinks>, Pointer<FreeLinks>) {
        let Some(head) = self.head else {
            return (None, None);
        };

        if block < block_of(head) {
            return (None, Some(head));
        }

        let tail = self.tail.expect("non-empty list has a tail");
        if block > block_of(tail) {
            return (Some(tail), None);
        }

        let mut current = head;
        while let Some(next) = current.as_ref().next {
            if block < block_of(next) {
                return (Some(current), Some(next));
            }
            current = next;
        }

        (Some(current), None)
    }

    /// Writes `block`'s links and splices it between `prev` and `next`,
    /// updating `head`/`tail` when it becomes an extreme.
    unsafe fn link_between(
        &mut self,
        block: NonNull<u8>,
        prev: Pointer<FreeLinks>,
        next: Pointer<FreeLinks>,
    ) {
        let node = node_of(block);
        node.as_ptr().write(FreeLinks { prev, next });

        match prev {
            Some(mut prev) => prev.as_mut().next = Some(node),
            None => self.head = Some(node),
        }
        match next {
            Some(mut next) => next.as_mut().prev = Some(node),
            None => self.tail = Some(node),
        }

        self.len += 1;
    }

    /// Takes `old` out of the list, patching its neighbors and the
    /// extremes, including the single-element case.
    unsafe fn unlink(&mut self, old: NonNull<FreeLinks>) {
        let FreeLinks { prev, next } = old.as_ptr().read();

        match prev {
            Some(mut prev) => prev.as_mut().next = next,
            None => self.head = next,
        }
        match next {
            Some(mut next) => next.as_mut().prev = prev,
            None => self.tail = prev,
        }

        self.len -= 1;
    }

    /// `new` takes over `old`'s exact position in the list. Used when a
    /// split leaves the remainder in the original block's slot and when a
    /// freed block absorbs its successor.
    unsafe fn replace(&mut self, old: NonNull<FreeLinks>, new: NonNull<FreeLinks>) {
        let links = old.as_ptr().read();
        new.as_ptr().write(FreeLinks { ..links });

        match links.prev {
            Some(mut prev) => prev.as_mut().next = Some(new),
            None => self.head = Some(new),
        }
        match links.next {
            Some(mut next) => next.as_mut().prev = Some(new),
            None => self.tail = Some(new),
        }
    }
}

pub(crate) struct Iter {
    current: Pointer<FreeLinks>,
}

impl Iterator for Iter {
    type Item = NonNull<FreeLinks>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.current?;
        self.current = unsafe { node.as_ref().next };

        Some(node)
    }
}
