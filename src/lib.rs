//! Dynamic memory allocator built directly on the process heap break.
//!
//! The allocator manages a single contiguous arena obtained from an
//! `sbrk`-style primitive and carves it into blocks surrounded by boundary
//! tags:
//!
//! ```text
//! +----------------------------+
//! | header (tag, size)         |
//! +----------------------------+
//! |                            |
//! |          payload           | <- Addresses handed to the caller point
//! |                            |    here. While the block is free, the
//! +----------------------------+    first two words hold the free list
//! | footer (tag, size)         |    links instead.
//! +----------------------------+
//! ```
//!
//! Because the size is stored on both ends of every block, both physical
//! neighbors of any block can be found in constant time, which is what makes
//! coalescing on [`Bralloc::free`] cheap. Free blocks are additionally
//! linked into an address-ordered doubly linked list that the placement
//! policies ([`Policy::WorstFit`], [`Policy::NextFit`]) search.
//!
//! The arena always ends in a free "slack" block kept near a 128 KiB target:
//! growth requests extend the break past the requested size so the next few
//! allocations don't need a system call, and oversized top blocks give the
//! excess back to the OS.
//!
//! # Examples
//!
//! ```rust
//! use bralloc::{Bralloc, FixedHeap, Policy};
//!
//! // A deterministic in-memory break; real programs use `Bralloc::new()`,
//! // which moves the actual program break through `sbrk`.
//! let heap = Bralloc::with_break(FixedHeap::new(1024 * 1024));
//! heap.set_policy(Policy::WorstFit);
//!
//! let block = heap.alloc(128).unwrap();
//! unsafe {
//!     block.as_ptr().write_bytes(0xAB, 128);
//!     assert_eq!(*block.as_ptr(), 0xAB);
//!     heap.free(block.as_ptr());
//! }
//!
//! let stats = heap.stats();
//! assert_eq!(stats.total_allocated, 0);
//! ```

use std::ptr::NonNull;

mod allocator;
mod arena;
mod boundary;
mod error;
mod freelist;
mod platform;
mod policy;
mod stats;

/// Non-null pointer to `T`. We use this in most cases instead of `*mut T`
/// because the compiler forces us to handle the `None` case everywhere a
/// link or bound might be absent, which is exactly where null-pointer bugs
/// tend to live.
pub(crate) type Pointer<T> = Option<NonNull<T>>;

pub use allocator::Bralloc;
pub use error::AllocError;
pub use platform::{FixedHeap, HeapBreak};
pub use policy::Policy;
pub use stats::MemStats;

#[cfg(unix)]
pub use platform::ProgramBreak;
