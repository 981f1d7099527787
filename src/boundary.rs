//! Boundary tag codec. This is the only module in the crate that performs
//! raw address arithmetic on block memory; everything else goes through the
//! typed accessors below, so undefined-behavior risk stays confined here.
//!
//! Every block is laid out as `[header][payload][footer]` where header and
//! footer are identical [`BoundaryTag`] values:
//!
//! ```text
//! +--------------------+
//! | tag | size         | <- header
//! +--------------------+
//! |      payload       | <- Block address. `size` bytes.
//! +--------------------+
//! | tag | size         | <- footer
//! +--------------------+
//! | tag | size         | <- header of the next block, if any
//! +--------------------+
//! |        ...         |
//! ```
//!
//! The footer of a block's physical predecessor sits immediately before its
//! own header, and its physical successor's header immediately after its own
//! footer, so both neighbors are found in O(1) without any list traversal.
//!
//! # Safety
//!
//! All functions here require the given address to point at the payload of a
//! live block previously stamped by this codec, inside an arena whose bounds
//! the caller passes in. The codec does not self-validate.

use std::{mem, ptr::NonNull};

use crate::Pointer;

/// Pointer size in bytes on the current machine. Payload sizes and the
/// break delta are always kept as multiples of this, so every payload the
/// allocator hands out is word aligned.
pub(crate) const WORD_SIZE: usize = mem::size_of::<usize>();

/// Size of one header or footer.
pub(crate) const BOUNDARY_TAG_SIZE: usize = mem::size_of::<BoundaryTag>();

/// Per-block metadata cost: one header plus one footer.
pub(crate) const BLOCK_OVERHEAD: usize = 2 * BOUNDARY_TAG_SIZE;

/// Allocation state of a block. The discriminants are distinctive bit
/// patterns rather than 0/1 so that a stale or corrupted tag word is less
/// likely to masquerade as a free block during coalescing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub(crate) enum Tag {
    Free = 0xF9EE_B10C,
    Allocated = 0xA110_B10C,
}

/// The `(tag, size)` pair written on both ends of every block. `size` is the
/// payload length in bytes, excluding both tags.
#[derive(Clone, Copy)]
#[repr(C)]
pub(crate) struct BoundaryTag {
    tag: usize,
    size: usize,
}

/// Rounds `size` up to the next multiple of the machine word size, or
/// `None` when the rounding would wrap around the address space.
pub(crate) fn align_up(size: usize) -> Option<usize> {
    Some(size.checked_add(WORD_SIZE - 1)? & !(WORD_SIZE - 1))
}

#[inline]
unsafe fn header_of(block: NonNull<u8>) -> *mut BoundaryTag {
    block.as_ptr().cast::<BoundaryTag>().offset(-1)
}

#[inline]
unsafe fn footer_of(block: NonNull<u8>, size: usize) -> *mut BoundaryTag {
    block.as_ptr().add(size).cast()
}

/// Writes the header and footer of the block at `block` with the given
/// payload size and tag. No other memory is touched.
pub(crate) unsafe fn stamp(block: NonNull<u8>, size: usize, tag: Tag) {
    let value = BoundaryTag {
        tag: tag as usize,
        size,
    };

    header_of(block).write(value);
    footer_of(block, size).write(value);
}

/// Payload size of the block at `block`, read from its header.
pub(crate) unsafe fn size_of_block(block: NonNull<u8>) -> usize {
    (*header_of(block)).size
}

/// Allocation state of the block at `block`. Any tag word that is not the
/// exact free pattern reads as allocated.
pub(crate) unsafe fn tag_of(block: NonNull<u8>) -> Tag {
    if (*header_of(block)).tag == Tag::Free as usize {
        Tag::Free
    } else {
        Tag::Allocated
    }
}

/// First address past the block's footer. For the highest block in the
/// arena this equals the current break.
pub(crate) unsafe fn block_end(block: NonNull<u8>) -> NonNull<u8> {
    let end = block
        .as_ptr()
        .add(size_of_block(block) + BOUNDARY_TAG_SIZE);

    NonNull::new_unchecked(end)
}

/// Payload address of the physical successor of `block`, or `None` when
/// `block` is the last block before the break. The arena is fully tiled
/// with blocks, so any byte between the footer and `arena_end` belongs to a
/// successor's header.
pub(crate) unsafe fn neighbor_after(block: NonNull<u8>, arena_end: NonNull<u8>) -> Pointer<u8> {
    let footer_end = block_end(block);

    if footer_end < arena_end {
        Some(NonNull::new_unchecked(
            footer_end.as_ptr().add(BOUNDARY_TAG_SIZE),
        ))
    } else {
        None
    }
}

/// Payload address of the physical predecessor of `block`, found by reading
/// the footer that sits immediately before `block`'s header. `None` when
/// `block` is the first block of the arena.
pub(crate) unsafe fn neighbor_before(block: NonNull<u8>, arena_start: NonNull<u8>) -> Pointer<u8> {
    let header = header_of(block).cast::<u8>();

    if header as usize <= arena_start.as_ptr() as usize {
        return None;
    }

    let footer = header.cast::<BoundaryTag>().offset(-1);
    let size = (*footer).size;

    Some(NonNull::new_unchecked(footer.cast::<u8>().sub(size)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::{FixedHeap, HeapBreak};

    #[test]
    fn align_up_rounds_to_word_size() {
        assert_eq!(align_up(0), Some(0));
        assert_eq!(align_up(1), Some(WORD_SIZE));
        assert_eq!(align_up(WORD_SIZE), Some(WORD_SIZE));
        assert_eq!(align_up(WORD_SIZE + 1), Some(2 * WORD_SIZE));
        assert_eq!(align_up(100), Some(104));

        // The last representable aligned size passes; anything above it
        // would wrap and must be refused instead.
        let top = usize::MAX - WORD_SIZE + 1;
        assert_eq!(align_up(top), Some(top));
        assert_eq!(align_up(top + 1), None);
        assert_eq!(align_up(usize::MAX), None);
    }

    #[test]
    fn stamp_and_neighbors_round_trip() {
        let mut brk = FixedHeap::new(4096);

        unsafe {
            let start = brk.grow(4096).unwrap();

            // Tile two adjacent blocks: [hdr][64][ftr][hdr][128][ftr].
            let first = NonNull::new_unchecked(start.as_ptr().add(BOUNDARY_TAG_SIZE));
            stamp(first, 64, Tag::Allocated);

            let second = NonNull::new_unchecked(first.as_ptr().add(64 + BLOCK_OVERHEAD));
            stamp(second, 128, Tag::Free);

            let end = block_end(second);

            assert_eq!(size_of_block(first), 64);
            assert_eq!(tag_of(first), Tag::Allocated);
            assert_eq!(size_of_block(second), 128);
            assert_eq!(tag_of(second), Tag::Free);

            // Forward and backward discovery.
            assert_eq!(neighbor_after(first, end), Some(second));
            assert_eq!(neighbor_before(second, start), Some(first));

            // Extremes have no neighbors.
            assert_eq!(neighbor_before(first, start), None);
            assert_eq!(neighbor_after(second, end), None);

            // Re-stamping changes both ends; the successor still reads the
            // predecessor through the fresh footer.
            stamp(first, 64, Tag::Free);
            assert_eq!(tag_of(first), Tag::Free);
            assert_eq!(neighbor_before(second, start), Some(first));
        }
    }
}
