/*!
 * Memory Module
 * Context-routed small-object allocation
 *
 * `alloc` and `free` go through the calling thread's context cache. When
 * thread-local state is gone (thread teardown) they fall back to the
 * general heap with an uncached block.
 */

pub mod cache;
pub mod heap;

pub use cache::{size_class, AllocatorCache, Bucket, HEADER_SIZE};
pub use heap::{Heap, SystemHeap};

use crate::scheduler::context::with_allocator;
use std::ptr::NonNull;

/// Allocate `size` bytes from the calling thread's cache
pub fn alloc(size: usize) -> NonNull<u8> {
    with_allocator(|cache| cache.allocate(size))
        .unwrap_or_else(|_| cache::allocate_uncached(&SystemHeap, size))
}

/// Free a block from `alloc`, possibly keeping it in this thread's cache
///
/// # Safety
///
/// `ptr` must come from `alloc` and must not be used afterwards.
pub unsafe fn free(ptr: NonNull<u8>) {
    if with_allocator(|cache| unsafe { cache.deallocate(ptr) }).is_err() {
        cache::release_to_heap(&SystemHeap, ptr);
    }
}
