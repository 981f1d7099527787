//! Arena growth management. The arena is the contiguous range between the
//! break observed at the first growth and the current break; it grows when
//! no free block satisfies a request and gets trimmed when the free block
//! touching the top outgrows the slack target.

use std::ptr::NonNull;

use log::debug;

use crate::{
    boundary::{self, Tag, BLOCK_OVERHEAD},
    error::AllocError,
    freelist::FreeList,
    platform::HeapBreak,
    stats::Totals,
    Pointer,
};

/// Target size of the top-of-arena free block. Every growth leaves a free
/// region of this size above the allocation it serves, so bursts of small
/// allocations are absorbed without touching the break again.
pub(crate) const SLACK: usize = 128 * 1024;

/// The contiguous address range obtained from the break primitive. Bounds
/// are `None` until the first allocation grows the heap.
pub(crate) struct Arena<B: HeapBreak> {
    brk: B,
    start: Pointer<u8>,
    end: Pointer<u8>,
}

impl<B: HeapBreak> Arena<B> {
    pub const fn new(brk: B) -> Self {
        Self {
            brk,
            start: None,
            end: None,
        }
    }

    pub fn start(&self) -> Pointer<u8> {
        self.start
    }

    pub fn end(&self) -> Pointer<u8> {
        self.end
    }

    /// Current arena size in bytes.
    pub fn len(&self) -> usize {
        match (self.start, self.end) {
            (Some(start), Some(end)) => end.as_ptr() as usize - start.as_ptr() as usize,
            _ => 0,
        }
    }

    /// Whether `ptr` points inside the arena. Note that the lowest valid
    /// payload starts one boundary tag past `start`.
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        match (self.start, self.end) {
            (Some(start), Some(end)) => ptr > start && ptr < end,
            _ => false,
        }
    }

    /// Whether `block`'s footer ends exactly at the current break.
    pub unsafe fn is_top(&self, block: NonNull<u8>) -> bool {
        self.end == Some(boundary::block_end(block))
    }

    /// Grows the heap enough to serve a `size`-byte allocation and keep the
    /// slack target above it, and returns the allocated payload already
    /// stamped.
    ///
    /// When the arena currently ends in a free block, that block is pulled
    /// out of the list and reused as the allocation's position, and the
    /// break delta is reduced by its size. This keeps the fresh top free
    /// block at exactly [`SLACK`] bytes and avoids stamping a free region
    /// directly below another one, which would immediately need a coalesce.
    pub(crate) unsafe fn grow_for(
        &mut self,
        size: usize,
        list: &mut FreeList,
        totals: &mut Totals,
    ) -> Result<NonNull<u8>, AllocError> {
        let top_free = list
            .tail_block()
            .filter(|&tail| self.is_top(tail));

        let block = match top_free {
            Some(tail) => {
                let tail_size = boundary::size_of_block(tail);
                // A fitting tail would have been found by the policy.
                debug_assert!(tail_size < size);

                let delta = (size - tail_size)
                    .checked_add(SLACK + BLOCK_OVERHEAD)
                    .ok_or(AllocError::AllocationFailed)?;
                self.extend(delta)?;

                list.remove(tail);
                totals.free -= tail_size;

                boundary::stamp(tail, size, Tag::Allocated);
                totals.live_blocks += 1;

                tail
            }
            None => {
                let delta = size
                    .checked_add(SLACK + 2 * BLOCK_OVERHEAD)
                    .ok_or(AllocError::AllocationFailed)?;
                let old_break = self.extend(delta)?;

                if self.start.is_none() {
                    self.start = Some(old_break);
                }

                let block =
                    NonNull::new_unchecked(old_break.as_ptr().add(boundary::BOUNDARY_TAG_SIZE));
                boundary::stamp(block, size, Tag::Allocated);
                totals.live_blocks += 2;

                block
            }
        };

        let slack = NonNull::new_unchecked(block.as_ptr().add(size + BLOCK_OVERHEAD));
        boundary::stamp(slack, SLACK, Tag::Free);
        list.append(slack);
        totals.free += SLACK;

        debug!("arena grown for {size} bytes, new size {}", self.len());

        Ok(block)
    }

    /// Trims the break when the free block at the top of the arena exceeds
    /// the slack target. The caller guarantees `block` is the top block and
    /// a member of the free list; it stays in the list either way, only its
    /// size changes.
    pub(crate) unsafe fn shrink_if_oversized(
        &mut self,
        block: NonNull<u8>,
        totals: &mut Totals,
    ) -> Result<(), AllocError> {
        debug_assert!(self.is_top(block));

        let size = boundary::size_of_block(block);
        if size <= SLACK {
            return Ok(());
        }

        let excess = size - SLACK;
        if !self.brk.shrink(excess) {
            return Err(AllocError::ShrinkFailed);
        }

        let end = self.end.expect("shrinking an initialized arena");
        self.end = Some(NonNull::new_unchecked(end.as_ptr().sub(excess)));

        boundary::stamp(block, SLACK, Tag::Free);
        totals.free -= excess;

        debug!("arena trimmed by {excess} bytes, new size {}", self.len());

        Ok(())
    }

    /// Moves the break up by `delta` and updates `end`.
    unsafe fn extend(&mut self, delta: usize) -> Result<NonNull<u8>, AllocError> {
        let old_break = self.brk.grow(delta).ok_or(AllocError::AllocationFailed)?;

        self.end = Some(NonNull::new_unchecked(old_break.as_ptr().add(delta)));

        Ok(old_break)
    }
}
