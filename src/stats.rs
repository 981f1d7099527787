use crate::boundary::BLOCK_OVERHEAD;

/// Snapshot of the allocator's bookkeeping, as returned by
/// [`crate::Bralloc::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemStats {
    /// Bytes currently handed out to callers (stamped payload sizes).
    pub total_allocated: usize,
    /// Bytes currently sitting in the free list.
    pub total_free: usize,
    /// Payload size of the biggest free block, 0 when the list is empty.
    pub largest_free: usize,
    /// Number of blocks tiling the arena, free and allocated alike.
    pub live_blocks: usize,
    /// Current arena size in bytes.
    pub arena_size: usize,
}

/// Running totals kept up to date by every operation. At any quiescent
/// point they satisfy
/// `allocated + free + live_blocks * BLOCK_OVERHEAD == arena size`.
pub(crate) struct Totals {
    pub allocated: usize,
    pub free: usize,
    pub live_blocks: usize,
}

impl Totals {
    pub const fn new() -> Self {
        Self {
            allocated: 0,
            free: 0,
            live_blocks: 0,
        }
    }

    /// Total boundary-tag overhead across the arena.
    pub fn overhead(&self) -> usize {
        self.live_blocks * BLOCK_OVERHEAD
    }
}
