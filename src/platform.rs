use crate::Pointer;

/// Abstraction over the OS heap-break primitive. The allocator only ever
/// moves the break forward to obtain memory and backward to return it; it
/// doesn't care whether that happens through `sbrk`, a kernel syscall or a
/// plain buffer. Keeping this behind a trait lets every test run against an
/// in-memory break ([`FixedHeap`]) instead of fighting over the real one.
///
/// # Contract
///
/// Successive successful [`HeapBreak::grow`] calls must return contiguous
/// memory: each call returns the break *before* the increment, and the next
/// call's return value is exactly `delta` bytes later. This matches POSIX
/// `sbrk` semantics and is what allows the allocator to treat the arena as
/// one contiguous address range.
pub trait HeapBreak {
    /// Moves the break `delta` bytes up and returns its previous position,
    /// or `None` if the underlying primitive refuses.
    unsafe fn grow(&mut self, delta: usize) -> Pointer<u8>;

    /// Moves the break `delta` bytes down, returning whether it succeeded.
    /// Memory beyond the new break must no longer be touched.
    unsafe fn shrink(&mut self, delta: usize) -> bool;
}

/// The real program break, moved through [`libc::sbrk`].
///
/// Only sound when this allocator is the sole owner of the break: the libc
/// allocator of the host process may also use `brk` for its main arena, so a
/// program using this backend should install [`crate::Bralloc`] as its
/// `#[global_allocator]` (or otherwise guarantee nothing else calls `brk`).
#[cfg(unix)]
pub struct ProgramBreak;

#[cfg(unix)]
impl HeapBreak for ProgramBreak {
    unsafe fn grow(&mut self, delta: usize) -> Pointer<u8> {
        // A delta above `intptr_t::MAX` would turn negative in the cast
        // and move the break down instead.
        if delta > libc::intptr_t::MAX as usize {
            return None;
        }

        let previous = libc::sbrk(delta as libc::intptr_t);

        if previous as isize == -1 {
            None
        } else {
            Some(std::ptr::NonNull::new_unchecked(previous.cast()))
        }
    }

    unsafe fn shrink(&mut self, delta: usize) -> bool {
        libc::sbrk(-(delta as libc::intptr_t)) as isize != -1
    }
}

/// A fixed-capacity break backed by the global allocator. This is the
/// equivalent of a tiny process whose heap cannot grow past `capacity`:
/// `grow` hands out contiguous chunks of the buffer and fails once the
/// capacity is exhausted, `shrink` moves the break back down.
///
/// Used by the test suite and under Miri, where FFI calls such as `sbrk`
/// are unavailable, and useful on its own as a deterministic sandbox.
pub struct FixedHeap {
    base: std::ptr::NonNull<u8>,
    capacity: usize,
    brk: usize,
    fail_shrink: bool,
}

impl FixedHeap {
    /// Reserves `capacity` bytes to play the role of the process heap. A
    /// zero capacity is rounded up to one word, since zero-size layouts
    /// cannot be allocated.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(crate::boundary::WORD_SIZE);
        let base = unsafe { std::alloc::alloc(Self::layout(capacity)) };

        Self {
            base: std::ptr::NonNull::new(base).expect("backing allocation failed"),
            capacity,
            brk: 0,
            fail_shrink: false,
        }
    }

    /// Same as [`FixedHeap::new`] but every shrink request is refused, which
    /// is how some kernels behave when the break cannot move down.
    pub fn with_failing_shrink(capacity: usize) -> Self {
        let mut heap = Self::new(capacity);
        heap.fail_shrink = true;
        heap
    }

    /// Current break as an offset from the start of the buffer.
    pub fn break_offset(&self) -> usize {
        self.brk
    }

    fn layout(capacity: usize) -> std::alloc::Layout {
        std::alloc::Layout::from_size_align(capacity, crate::boundary::WORD_SIZE).unwrap()
    }
}

impl HeapBreak for FixedHeap {
    unsafe fn grow(&mut self, delta: usize) -> Pointer<u8> {
        match self.brk.checked_add(delta) {
            Some(next) if next <= self.capacity => {
                let previous = self.base.as_ptr().add(self.brk);
                self.brk = next;

                Some(std::ptr::NonNull::new_unchecked(previous))
            }
            _ => None,
        }
    }

    unsafe fn shrink(&mut self, delta: usize) -> bool {
        if self.fail_shrink || delta > self.brk {
            return false;
        }

        self.brk -= delta;
        true
    }
}

impl Drop for FixedHeap {
    fn drop(&mut self) {
        unsafe { std::alloc::dealloc(self.base.as_ptr(), Self::layout(self.capacity)) };
    }
}

// The buffer is exclusively owned, raw pointers notwithstanding.
unsafe impl Send for FixedHeap {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_heap_break_moves_like_sbrk() {
        let mut brk = FixedHeap::new(4096);

        unsafe {
            let first = brk.grow(1024).unwrap();
            let second = brk.grow(1024).unwrap();

            // Contiguity: the second chunk starts where the first ended.
            assert_eq!(second.as_ptr() as usize, first.as_ptr() as usize + 1024);
            assert_eq!(brk.break_offset(), 2048);

            assert!(brk.shrink(512));
            assert_eq!(brk.break_offset(), 1536);

            // Exhausting the capacity fails without moving the break, and
            // so does a delta that would wrap the offset around.
            assert!(brk.grow(4096).is_none());
            assert!(brk.grow(usize::MAX).is_none());
            assert_eq!(brk.break_offset(), 1536);

            // Can't shrink below the initial break.
            assert!(!brk.shrink(2048));
        }
    }

    #[test]
    fn zero_capacity_still_backs_a_word() {
        let mut brk = FixedHeap::new(0);

        unsafe {
            assert!(brk.grow(crate::boundary::WORD_SIZE).is_some());
            assert!(brk.grow(1).is_none());
        }
    }

    #[test]
    fn failing_shrink_refuses_but_grows_fine() {
        let mut brk = FixedHeap::with_failing_shrink(4096);

        unsafe {
            assert!(brk.grow(1024).is_some());
            assert!(!brk.shrink(512));
            assert_eq!(brk.break_offset(), 1024);
        }
    }
}
