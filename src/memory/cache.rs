/*!
 * Allocator Cache
 *
 * Per-context small-object cache with power-of-two size classes.
 *
 * # Layout
 *
 * Every block starts with a header naming its bucket: a size class, or
 * `Uncached` for blocks too large for any class. The caller's payload
 * follows the header, `BLOCK_ALIGN`-aligned.
 *
 * Freed blocks of a class are kept on that class's free list, up to
 * `MAX_CACHE_DEPTH`; beyond that, and for uncached blocks, they go back to
 * the heap. A cache is owned by one thread and never locked.
 */

use super::heap::{Heap, SystemHeap};
use crate::core::limits::{BLOCK_ALIGN, MAX_CACHE_DEPTH, MIN_SIZE_CLASS_SHIFT, SIZE_CLASS_COUNT};
use std::alloc::{handle_alloc_error, Layout};
use std::mem;
use std::ptr::{self, NonNull};

/// Which free list a block belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    /// Size class index
    Class(u8),
    /// Straight from the heap, never cached
    Uncached,
}

#[repr(C, align(16))]
struct BlockHeader {
    bucket: Bucket,
    /// Total block size, header included
    size: usize,
}

/// Bytes in front of every payload
pub const HEADER_SIZE: usize = mem::size_of::<BlockHeader>();

const _: () = assert!(HEADER_SIZE % BLOCK_ALIGN == 0);

/// Block size of a class
#[inline]
pub const fn class_size(class: usize) -> usize {
    1 << (MIN_SIZE_CLASS_SHIFT as usize + class)
}

/// Smallest class whose blocks fit `size` payload bytes plus the header
pub fn size_class(size: usize) -> Option<usize> {
    let total = size.checked_add(HEADER_SIZE)?;
    (0..SIZE_CLASS_COUNT).find(|&class| total <= class_size(class))
}

#[inline]
fn block_layout(total: usize) -> Layout {
    Layout::from_size_align(total, BLOCK_ALIGN)
        .unwrap_or_else(|_| handle_alloc_error(Layout::new::<BlockHeader>()))
}

/// Carve a fresh block from `heap` and stamp its header
fn fresh_block<H: Heap>(heap: &H, bucket: Bucket, total: usize) -> NonNull<u8> {
    let block = heap.allocate(block_layout(total)).cast::<BlockHeader>();
    // SAFETY: the block is at least HEADER_SIZE bytes and suitably aligned.
    unsafe {
        ptr::write(block.as_ptr(), BlockHeader { bucket, size: total });
        payload_of(block)
    }
}

#[inline]
unsafe fn payload_of(block: NonNull<BlockHeader>) -> NonNull<u8> {
    NonNull::new_unchecked(block.as_ptr().cast::<u8>().add(HEADER_SIZE))
}

#[inline]
unsafe fn header_of(payload: NonNull<u8>) -> NonNull<BlockHeader> {
    NonNull::new_unchecked(payload.as_ptr().sub(HEADER_SIZE).cast::<BlockHeader>())
}

/// Allocate an uncached block directly from `heap`
pub fn allocate_uncached<H: Heap>(heap: &H, size: usize) -> NonNull<u8> {
    let total = size
        .checked_add(HEADER_SIZE)
        .unwrap_or_else(|| handle_alloc_error(Layout::new::<BlockHeader>()));
    fresh_block(heap, Bucket::Uncached, total)
}

/// Return any block straight to `heap`, whatever its bucket
///
/// # Safety
///
/// `payload` must come from this module's allocation functions over a heap
/// compatible with `heap`, and must not be used afterwards.
pub unsafe fn release_to_heap<H: Heap>(heap: &H, payload: NonNull<u8>) {
    let block = header_of(payload);
    let size = (*block.as_ptr()).size;
    heap.deallocate(block.cast(), block_layout(size));
}

/// Bucket recorded in a block's header
///
/// # Safety
///
/// `payload` must be a live block from this module.
pub unsafe fn bucket_of(payload: NonNull<u8>) -> Bucket {
    (*header_of(payload).as_ptr()).bucket
}

/// Size-classed free lists over a backing heap
pub struct AllocatorCache<H: Heap = SystemHeap> {
    heap: H,
    free: [Vec<NonNull<BlockHeader>>; SIZE_CLASS_COUNT],
}

impl AllocatorCache<SystemHeap> {
    pub fn new() -> Self {
        Self::with_heap(SystemHeap)
    }
}

impl Default for AllocatorCache<SystemHeap> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Heap> AllocatorCache<H> {
    /// Empty cache drawing from `heap`
    pub fn with_heap(heap: H) -> Self {
        Self {
            heap,
            free: std::array::from_fn(|_| Vec::new()),
        }
    }

    /// Allocate `size` bytes, reusing a cached block when one fits
    pub fn allocate(&mut self, size: usize) -> NonNull<u8> {
        let Some(class) = size_class(size) else {
            return allocate_uncached(&self.heap, size);
        };

        match self.free[class].pop() {
            // SAFETY: cached blocks keep their header; only the bucket is restamped.
            Some(block) => unsafe {
                (*block.as_ptr()).bucket = Bucket::Class(class as u8);
                payload_of(block)
            },
            None => fresh_block(&self.heap, Bucket::Class(class as u8), class_size(class)),
        }
    }

    /// Free a block, keeping it if its class has room
    ///
    /// # Safety
    ///
    /// `payload` must come from `allocate` (on any cache over a compatible
    /// heap) and must not be used afterwards.
    pub unsafe fn deallocate(&mut self, payload: NonNull<u8>) {
        let block = header_of(payload);
        match (*block.as_ptr()).bucket {
            Bucket::Class(class) if self.free[class as usize].len() < MAX_CACHE_DEPTH => {
                self.free[class as usize].push(block);
            }
            _ => release_to_heap(&self.heap, payload),
        }
    }

    /// Blocks currently cached for `class`
    pub fn cached(&self, class: usize) -> usize {
        self.free.get(class).map_or(0, Vec::len)
    }

    /// Blocks currently cached across all classes
    pub fn total_cached(&self) -> usize {
        self.free.iter().map(Vec::len).sum()
    }

    pub fn heap(&self) -> &H {
        &self.heap
    }
}

impl<H: Heap> Drop for AllocatorCache<H> {
    fn drop(&mut self) {
        let cached = self.total_cached();
        for (class, list) in self.free.iter_mut().enumerate() {
            for block in list.drain(..) {
                // SAFETY: cached blocks came from this heap with their class size.
                unsafe { self.heap.deallocate(block.cast(), block_layout(class_size(class))) };
            }
        }
        if cached > 0 {
            tracing::trace!(cached, "Allocator cache released cached blocks");
        }
    }
}

impl<H: Heap> std::fmt::Debug for AllocatorCache<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let depths: Vec<usize> = self.free.iter().map(Vec::len).collect();
        f.debug_struct("AllocatorCache")
            .field("depths", &depths)
            .finish_non_exhaustive()
    }
}
