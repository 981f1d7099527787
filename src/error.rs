use std::{error::Error, fmt};

/// Failures reported by the allocator. None of them are fatal: `alloc` and
/// `realloc` surface them as an `Err` result, `free` only records them (see
/// [`crate::Bralloc::last_error`]) because a deallocation has no useful
/// error channel back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The heap-break primitive refused to grow the arena.
    AllocationFailed,
    /// `free` was called with a null pointer, a pointer outside the arena,
    /// or a pointer to a block that is already free.
    InvalidFree,
    /// `realloc` was called with a null pointer or a zero size, or `alloc`
    /// with a zero size.
    InvalidArgument,
    /// The heap-break primitive refused to trim the arena. The oversized
    /// free block is kept in memory, so this only costs address space.
    ShrinkFailed,
}

impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllocationFailed => write!(f, "memory allocation failed"),
            Self::InvalidFree => write!(f, "attempt to free unallocated space"),
            Self::InvalidArgument => write!(f, "invalid allocation argument"),
            Self::ShrinkFailed => write!(f, "failed to return memory to the OS"),
        }
    }
}

impl Error for AllocError {}
