/*!
 * General Heap
 *
 * Backing allocator behind the per-context caches. Pluggable so tests can
 * observe exactly when the cache falls through to it.
 */

use std::alloc::{self, handle_alloc_error, Layout};
use std::ptr::NonNull;

/// Source of fresh blocks and sink for blocks the cache will not keep
pub trait Heap {
    /// Allocate a block; out-of-memory is fatal, as for the global allocator
    fn allocate(&self, layout: Layout) -> NonNull<u8>;

    /// Return a block obtained from `allocate` with the same layout
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` on this heap with `layout`.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// The process global allocator
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemHeap;

impl Heap for SystemHeap {
    #[inline]
    fn allocate(&self, layout: Layout) -> NonNull<u8> {
        // SAFETY: callers never request zero-sized layouts; every block has a header.
        let ptr = unsafe { alloc::alloc(layout) };
        NonNull::new(ptr).unwrap_or_else(|| handle_alloc_error(layout))
    }

    #[inline]
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        alloc::dealloc(ptr.as_ptr(), layout);
    }
}
