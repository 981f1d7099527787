use std::{
    alloc::{GlobalAlloc, Layout},
    ptr::{self, NonNull},
    sync::Mutex,
};

use log::{debug, error, warn};

use crate::{
    arena::Arena,
    boundary::{self, Tag, BLOCK_OVERHEAD, WORD_SIZE},
    error::AllocError,
    freelist::{FreeList, MIN_BLOCK_SIZE},
    platform::HeapBreak,
    policy::{self, Policy},
    stats::{MemStats, Totals},
    Pointer,
};

#[cfg(unix)]
use crate::platform::ProgramBreak;

/// The single-threaded allocator context: arena, free list, policy, cursor
/// and bookkeeping for one allocator instance. There are no process-wide
/// globals; constructing several of these over separate
/// [`crate::FixedHeap`]s gives fully independent heaps, which is how the
/// test suite exercises everything without moving the real break.
///
/// All methods take `&mut self` and raw pointers, so the public surface
/// wraps this in a [`Mutex`]; see [`Bralloc`].
struct AllocatorCore<B: HeapBreak> {
    arena: Arena<B>,
    free_list: FreeList,
    policy: Policy,
    /// Payload address of the most recent allocation; next-fit resumes its
    /// scan here. Never dereferenced, only compared, so a stale value is
    /// harmless.
    cursor: Pointer<u8>,
    totals: Totals,
    last_error: Option<AllocError>,
}

impl<B: HeapBreak> AllocatorCore<B> {
    const fn new(brk: B) -> Self {
        Self {
            arena: Arena::new(brk),
            free_list: FreeList::new(),
            policy: Policy::WorstFit,
            cursor: None,
            totals: Totals::new(),
            last_error: None,
        }
    }

    /// Records `err` as the most recent failure and propagates it.
    fn fail<T>(&mut self, err: AllocError) -> Result<T, AllocError> {
        error!("{err}");
        self.last_error = Some(err);

        Err(err)
    }

    /// Serves a `size`-byte request from the free list, growing the arena
    /// when the list is empty or the policy finds no fit.
    unsafe fn alloc(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        if size == 0 {
            return self.fail(AllocError::InvalidArgument);
        }

        // Every payload must be able to hold the free-list links once the
        // block comes back through `free`.
        let Some(size) = boundary::align_up(size.max(MIN_BLOCK_SIZE)) else {
            return self.fail(AllocError::AllocationFailed);
        };

        let fit = policy::find_fit(&self.free_list, self.policy, size, self.cursor);

        let block = match fit {
            Some(found) => {
                let found_size = boundary::size_of_block(found);

                match self.free_list.split_tail(found, size) {
                    Some(_remainder) => {
                        self.totals.free -= size + BLOCK_OVERHEAD;
                        self.totals.live_blocks += 1;
                    }
                    None => self.totals.free -= found_size,
                }

                found
            }
            None => {
                match self
                    .arena
                    .grow_for(size, &mut self.free_list, &mut self.totals)
                {
                    Ok(block) => block,
                    Err(err) => return self.fail(err),
                }
            }
        };

        self.totals.allocated += boundary::size_of_block(block);
        self.cursor = Some(block);

        debug!("alloc({size}) -> {:?}", block.as_ptr());

        Ok(block)
    }

    /// Returns `ptr`'s block to the free list. Invalid pointers are
    /// reported through the log and [`Self::last_error`] and change no
    /// state; nothing is ever propagated to the caller.
    unsafe fn free(&mut self, ptr: *mut u8) {
        let Some(block) = NonNull::new(ptr) else {
            let _ = self.fail::<()>(AllocError::InvalidFree);
            return;
        };

        if !self.arena.contains(block) || boundary::tag_of(block) == Tag::Free {
            let _ = self.fail::<()>(AllocError::InvalidFree);
            return;
        }

        let size = boundary::size_of_block(block);
        let start = self.arena.start().expect("arena holds a live block");
        let end = self.arena.end().expect("arena holds a live block");

        let merged = self.free_list.insert_and_coalesce(block, start, end);

        // Each merge turns one header/footer pair into free space.
        self.totals.allocated -= size;
        self.totals.free += size + merged.merges * BLOCK_OVERHEAD;
        self.totals.live_blocks -= merged.merges;

        debug!("free({ptr:?}) merged {} neighbor(s)", merged.merges);

        if self.arena.is_top(merged.block) {
            if let Err(err) = self
                .arena
                .shrink_if_oversized(merged.block, &mut self.totals)
            {
                // Non-fatal: the oversized block stays usable in the list.
                warn!("{err}");
                self.last_error = Some(err);
            }
        }
    }

    /// Resizes the allocation at `ptr`. Shrinking re-stamps in place and
    /// frees the cut-off tail when it is big enough to be a block of its
    /// own; growing always moves (no in-place growth into a free
    /// successor, a deliberate simplification).
    unsafe fn realloc(&mut self, ptr: *mut u8, new_size: usize) -> Result<NonNull<u8>, AllocError> {
        let Some(block) = NonNull::new(ptr) else {
            return self.fail(AllocError::InvalidArgument);
        };

        if new_size == 0 {
            return self.fail(AllocError::InvalidArgument);
        }

        let old_size = boundary::size_of_block(block);
        let Some(new_size) = boundary::align_up(new_size.max(MIN_BLOCK_SIZE)) else {
            return self.fail(AllocError::AllocationFailed);
        };

        if new_size == old_size {
            return Ok(block);
        }

        if new_size > old_size {
            let new_block = self.alloc(new_size)?;
            ptr::copy_nonoverlapping(block.as_ptr(), new_block.as_ptr(), old_size);
            self.free(block.as_ptr());

            return Ok(new_block);
        }

        let spare = old_size - new_size;

        if spare < BLOCK_OVERHEAD + MIN_BLOCK_SIZE {
            // Too small to stand on its own: stays as padding inside the
            // block, still accounted to the allocation.
            return Ok(block);
        }

        boundary::stamp(block, new_size, Tag::Allocated);

        let remainder = NonNull::new_unchecked(block.as_ptr().add(new_size + BLOCK_OVERHEAD));
        let remainder_size = spare - BLOCK_OVERHEAD;
        boundary::stamp(remainder, remainder_size, Tag::Allocated);

        self.totals.allocated -= old_size;
        self.totals.allocated += new_size + remainder_size;
        self.totals.live_blocks += 1;

        self.free(remainder.as_ptr());

        Ok(block)
    }

    fn set_policy(&mut self, policy: Policy) {
        self.policy = policy;

        // Next-fit scans start over from the head after a switch.
        if policy == Policy::NextFit {
            self.cursor = None;
        }
    }

    unsafe fn stats(&self) -> MemStats {
        let largest_free = self
            .free_list
            .largest()
            .map_or(0, |block| boundary::size_of_block(block));

        MemStats {
            total_allocated: self.totals.allocated,
            total_free: self.totals.free,
            largest_free,
            live_blocks: self.totals.live_blocks,
            arena_size: self.arena.len(),
        }
    }
}

/// The public allocator: one [`Mutex`] around the whole context per
/// instance. The algorithms are not thread-safe on their own (coalescing
/// touches the list extremes non-locally), so a single coarse lock is the
/// supported way to share an instance.
///
/// # Examples
///
/// Standalone heap over a deterministic backend:
///
/// ```rust
/// use bralloc::{Bralloc, FixedHeap};
///
/// let heap = Bralloc::with_break(FixedHeap::new(1024 * 1024));
///
/// let ptr = heap.alloc(256).unwrap();
/// unsafe {
///     ptr.as_ptr().write_bytes(7, 256);
///     heap.free(ptr.as_ptr());
/// }
/// assert_eq!(heap.stats().total_allocated, 0);
/// ```
///
/// Process-wide allocator over the real break:
///
/// ```no_run
/// use bralloc::Bralloc;
///
/// #[global_allocator]
/// static HEAP: Bralloc = Bralloc::new();
///
/// fn main() {
///     let nums = vec![1, 2, 3];
///     assert_eq!(nums.iter().sum::<i32>(), 6);
/// }
/// ```
pub struct Bralloc<B: HeapBreak = DefaultBreak> {
    inner: Mutex<AllocatorCore<B>>,
}

#[cfg(unix)]
type DefaultBreak = ProgramBreak;
#[cfg(not(unix))]
type DefaultBreak = crate::platform::FixedHeap;

#[cfg(unix)]
impl Bralloc {
    /// An allocator over the real program break. See
    /// [`crate::ProgramBreak`] for the soundness requirements.
    pub const fn new() -> Self {
        Self::with_break(ProgramBreak)
    }
}

#[cfg(unix)]
impl Default for Bralloc {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: HeapBreak> Bralloc<B> {
    /// An allocator over the given break primitive. The arena is created
    /// lazily by the first allocation.
    pub const fn with_break(brk: B) -> Self {
        Self {
            inner: Mutex::new(AllocatorCore::new(brk)),
        }
    }

    /// Allocates `size` bytes and returns the payload address. The payload
    /// is word aligned and at least `size` bytes long.
    pub fn alloc(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        match self.inner.lock() {
            Ok(mut core) => unsafe { core.alloc(size) },
            Err(_) => Err(AllocError::AllocationFailed),
        }
    }

    /// Frees the allocation at `ptr`. Invalid pointers are reported via
    /// [`Bralloc::last_error`] and otherwise ignored.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or an address previously returned by
    /// [`Bralloc::alloc`]/[`Bralloc::realloc`] on this instance and not
    /// freed since.
    pub unsafe fn free(&self, ptr: *mut u8) {
        if let Ok(mut core) = self.inner.lock() {
            core.free(ptr);
        }
    }

    /// Resizes the allocation at `ptr` to `new_size` bytes, moving it if
    /// necessary. On error the original allocation is left untouched.
    ///
    /// # Safety
    ///
    /// Same requirements as [`Bralloc::free`], except that on success `ptr`
    /// is consumed and only the returned address may be used.
    pub unsafe fn realloc(
        &self,
        ptr: *mut u8,
        new_size: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        match self.inner.lock() {
            Ok(mut core) => core.realloc(ptr, new_size),
            Err(_) => Err(AllocError::AllocationFailed),
        }
    }

    /// Switches the placement policy. Switching to [`Policy::NextFit`]
    /// resets its cursor, so the next search begins at the list head.
    pub fn set_policy(&self, policy: Policy) {
        if let Ok(mut core) = self.inner.lock() {
            core.set_policy(policy);
        }
    }

    /// Point-in-time bookkeeping snapshot.
    pub fn stats(&self) -> MemStats {
        match self.inner.lock() {
            Ok(core) => unsafe { core.stats() },
            Err(_) => MemStats::default(),
        }
    }

    /// The most recent failure, overwritten on each new one. Primarily a
    /// diagnostic for `free`, which has no error channel of its own.
    pub fn last_error(&self) -> Option<AllocError> {
        self.inner.lock().map_or(None, |core| core.last_error)
    }
}

unsafe impl<B: HeapBreak> Sync for Bralloc<B> {}

unsafe impl<B: HeapBreak> GlobalAlloc for Bralloc<B> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        // Alignment beyond the word size is not supported.
        if layout.align() > WORD_SIZE {
            return ptr::null_mut();
        }

        match Bralloc::alloc(self, layout.size()) {
            Ok(block) => block.as_ptr(),
            Err(_) => ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        self.free(ptr);
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > WORD_SIZE {
            return ptr::null_mut();
        }

        match Bralloc::realloc(self, ptr, new_size) {
            Ok(block) => block.as_ptr(),
            Err(_) => ptr::null_mut(),
        }
    }
}
