/*!
 * Reader-Writer Lock
 *
 * Writer-preferring shared/exclusive lock built from a writer FIFO, a
 * reader batch list and one atomic counter.
 *
 * # Design
 *
 * `count` holds the number of admitted readers in its low bits and
 * `WRITER_WAITING` in its top bit. A reader is admitted only by
 * incrementing `count` while the bit is clear, so once a writer has set it
 * no new reader gets in ahead of that writer.
 *
 * Writers queue exactly like `CriticalSection`, including its heap-held
 * `active` node. The first writer in line
 * sets the bit and, if readers are still inside, parks until the last of
 * them leaves. A writer that finds another writer queued behind it hands
 * the lock over directly, keeping the bit set.
 *
 * Readers that find the bit set push themselves onto a lock-free batch
 * list and park. When the last writer leaves it clears the bit and admits
 * the whole batch at once. A reader that pushes itself just after the bit
 * clears drains the batch itself, re-queuing whatever it cannot admit if a
 * new writer arrives in the meantime.
 */

use super::keyed_event::{key_of, keyed_event};
use super::spinwait::spin_until;
use crate::core::errors::{ConcurrencyError, ConcurrencyResult};
use crate::core::id::{current_thread_token, NO_THREAD};
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicU32, AtomicU64, Ordering};

/// Top bit of `count`: a writer holds the lock or waits for readers to leave
const WRITER_WAITING: u32 = 0x8000_0000;

#[derive(Debug)]
struct RwNode {
    next: AtomicPtr<RwNode>,
}

impl RwNode {
    const fn new() -> Self {
        Self {
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }

    #[inline]
    fn as_ptr(&self) -> *mut RwNode {
        self as *const RwNode as *mut RwNode
    }

    #[inline]
    fn wait_for_next(&self) -> *mut RwNode {
        spin_until(|| {
            let next = self.next.load(Ordering::Acquire);
            (!next.is_null()).then_some(next)
        })
    }
}

#[inline]
fn park(node: *const RwNode) {
    keyed_event().wait(key_of(node), None);
}

#[inline]
fn wake(node: *const RwNode) {
    keyed_event().wake(key_of(node));
}

/// Writer-preferring reader-writer lock
#[derive(Debug)]
pub struct ReaderWriterLock {
    count: AtomicU32,
    holder: AtomicU64,
    /// Owned allocation from `Box::into_raw`, freed in `Drop`
    active: NonNull<RwNode>,
    writer_head: AtomicPtr<RwNode>,
    writer_tail: AtomicPtr<RwNode>,
    reader_head: AtomicPtr<RwNode>,
}

// SAFETY: `active` is only touched through atomics and is owned by the lock.
unsafe impl Send for ReaderWriterLock {}
unsafe impl Sync for ReaderWriterLock {}

impl ReaderWriterLock {
    pub fn new() -> Self {
        let active = Box::into_raw(Box::new(RwNode::new()));
        Self {
            count: AtomicU32::new(0),
            holder: AtomicU64::new(NO_THREAD),
            // SAFETY: `Box::into_raw` never returns null.
            active: unsafe { NonNull::new_unchecked(active) },
            writer_head: AtomicPtr::new(ptr::null_mut()),
            writer_tail: AtomicPtr::new(ptr::null_mut()),
            reader_head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    #[inline]
    fn held_by_current_thread(&self) -> bool {
        self.holder.load(Ordering::Relaxed) == current_thread_token()
    }

    #[inline]
    fn active(&self) -> &RwNode {
        // SAFETY: the allocation lives until `Drop`.
        unsafe { self.active.as_ref() }
    }

    // ------------------------------------------------------------------------
    // Writers
    // ------------------------------------------------------------------------

    /// Acquire exclusively, waiting behind earlier writers and current readers
    pub fn lock(&self) -> ConcurrencyResult<WriteGuard<'_>> {
        if self.held_by_current_thread() {
            return Err(ConcurrencyError::improper_lock("already locked"));
        }

        let node = RwNode::new();
        let last = self.writer_tail.swap(node.as_ptr(), Ordering::AcqRel);

        if !last.is_null() {
            // SAFETY: the previous writer keeps its node alive until it sees our link.
            unsafe { (*last).next.store(node.as_ptr(), Ordering::Release) };
            park(&node);
        } else {
            self.writer_head.store(node.as_ptr(), Ordering::Release);
            if self.count.fetch_or(WRITER_WAITING, Ordering::AcqRel) != 0 {
                // Last reader out wakes `writer_head`
                park(&node);
            }
        }

        self.become_writer(&node);
        Ok(WriteGuard::new(self))
    }

    /// Acquire exclusively only if no writer is queued and no reader is inside
    pub fn try_lock(&self) -> Option<WriteGuard<'_>> {
        if self.held_by_current_thread() {
            return None;
        }

        let node = RwNode::new();
        self.writer_tail
            .compare_exchange(ptr::null_mut(), node.as_ptr(), Ordering::AcqRel, Ordering::Relaxed)
            .ok()?;
        self.writer_head.store(node.as_ptr(), Ordering::Release);

        if self
            .count
            .compare_exchange(0, WRITER_WAITING, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            self.become_writer(&node);
            return Some(WriteGuard::new(self));
        }

        // Readers are inside: back out
        if self
            .writer_tail
            .compare_exchange(node.as_ptr(), ptr::null_mut(), Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            return None;
        }

        // A writer queued behind us meanwhile and now owns our place in line
        let next = node.wait_for_next();
        self.writer_head.store(next, Ordering::Release);
        if self.count.fetch_or(WRITER_WAITING, Ordering::AcqRel) == 0 {
            // Readers left in the meantime: take the lock ahead of `next`
            self.holder.store(current_thread_token(), Ordering::Relaxed);
            self.writer_head.store(self.active.as_ptr(), Ordering::Release);
            self.active().next.store(next, Ordering::Release);
            return Some(WriteGuard::new(self));
        }
        None
    }

    /// Move the holder from its own queue node onto `active`
    fn become_writer(&self, node: &RwNode) {
        let active = self.active();
        self.holder.store(current_thread_token(), Ordering::Relaxed);
        self.writer_head.store(active.as_ptr(), Ordering::Release);
        active
            .next
            .store(node.next.load(Ordering::Acquire), Ordering::Relaxed);

        if self
            .writer_tail
            .compare_exchange(
                node.as_ptr(),
                active.as_ptr(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            let next = node.wait_for_next();
            active.next.store(next, Ordering::Release);
        }
    }

    fn unlock_exclusive(&self) {
        self.holder.store(NO_THREAD, Ordering::Relaxed);

        let next = self.active().next.load(Ordering::Acquire);
        if !next.is_null() {
            // Writer-to-writer hand-off keeps WRITER_WAITING set
            wake(next);
            return;
        }

        self.count.fetch_and(!WRITER_WAITING, Ordering::AcqRel);
        self.admit_batch();

        if self
            .writer_tail
            .compare_exchange(
                self.active.as_ptr(),
                ptr::null_mut(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            return;
        }

        // A writer enqueued behind us while the batch was being admitted
        let next = self.active().wait_for_next();
        self.writer_head.store(next, Ordering::Release);
        if self.count.fetch_or(WRITER_WAITING, Ordering::AcqRel) == 0 {
            wake(next);
        }
    }

    /// Admit every batched reader; only called by a leaving writer that
    /// still owns the writer queue, so no writer can slip in meanwhile
    fn admit_batch(&self) {
        let mut head = self.reader_head.swap(ptr::null_mut(), Ordering::AcqRel);
        let mut admitted = 0u32;
        while !head.is_null() {
            // SAFETY: batched readers stay parked, keeping their nodes alive,
            // until woken below. `next` is read before the wake.
            let next = unsafe { (*head).next.load(Ordering::Acquire) };
            self.count.fetch_add(1, Ordering::AcqRel);
            wake(head);
            admitted += 1;
            head = next;
        }
        if admitted > 0 {
            tracing::trace!(admitted, "Writer released reader batch");
        }
    }

    // ------------------------------------------------------------------------
    // Readers
    // ------------------------------------------------------------------------

    /// Increment the reader count unless a writer is waiting
    #[inline]
    fn try_admit(&self) -> bool {
        let mut count = self.count.load(Ordering::Relaxed);
        loop {
            if count & WRITER_WAITING != 0 {
                return false;
            }
            match self.count.compare_exchange_weak(
                count,
                count + 1,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(current) => count = current,
            }
        }
    }

    /// Acquire shared, queuing behind any waiting writer
    pub fn lock_read(&self) -> ConcurrencyResult<ReadGuard<'_>> {
        if self.held_by_current_thread() {
            return Err(ConcurrencyError::improper_lock("already locked as writer"));
        }

        if self.try_admit() {
            return Ok(ReadGuard::new(self));
        }

        let node = RwNode::new();
        self.push_batch(node.as_ptr(), node.as_ptr());

        // With the bit still set, the writer that owns it admits us on its way out
        if self.count.load(Ordering::Acquire) & WRITER_WAITING == 0 && self.drain_batch(&node) {
            return Ok(ReadGuard::new(self));
        }

        park(&node);
        Ok(ReadGuard::new(self))
    }

    /// Acquire shared only if no writer holds or waits
    pub fn try_lock_read(&self) -> Option<ReadGuard<'_>> {
        self.try_admit().then(|| ReadGuard::new(self))
    }

    /// Push the chain `first..=last` onto the reader batch
    fn push_batch(&self, first: *mut RwNode, last: *mut RwNode) {
        let mut head = self.reader_head.load(Ordering::Relaxed);
        loop {
            // SAFETY: `last` belongs to a parked or pushing reader.
            unsafe { (*last).next.store(head, Ordering::Relaxed) };
            match self.reader_head.compare_exchange_weak(
                head,
                first,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(current) => head = current,
            }
        }
    }

    /// Admit batched readers while no writer waits; reports whether `me`
    /// was among those admitted
    fn drain_batch(&self, me: &RwNode) -> bool {
        let me = me.as_ptr();
        let mut admitted_self = false;

        loop {
            let mut head = self.reader_head.swap(ptr::null_mut(), Ordering::AcqRel);
            while !head.is_null() {
                if !self.try_admit() {
                    // A writer arrived: hand the rest back to it
                    self.requeue(head);
                    break;
                }
                // SAFETY: nodes in a detached chain belong to readers that
                // cannot return before being admitted. `next` is read first.
                let next = unsafe { (*head).next.load(Ordering::Acquire) };
                if head == me {
                    admitted_self = true;
                } else {
                    wake(head);
                }
                head = next;
            }

            if head.is_null() || self.count.load(Ordering::Acquire) & WRITER_WAITING != 0 {
                return admitted_self;
            }
            // The writer left before the chain was back in place; drain again
        }
    }

    fn requeue(&self, first: *mut RwNode) {
        let mut last = first;
        loop {
            // SAFETY: see `drain_batch`.
            let next = unsafe { (*last).next.load(Ordering::Acquire) };
            if next.is_null() {
                break;
            }
            last = next;
        }
        self.push_batch(first, last);
    }

    fn unlock_shared(&self) {
        let remaining = self.count.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == WRITER_WAITING {
            wake(self.writer_head.load(Ordering::Acquire));
        }
    }

    // ------------------------------------------------------------------------
    // Raw release
    // ------------------------------------------------------------------------

    /// Release whichever mode the lock is currently held in
    ///
    /// # Safety
    ///
    /// The calling thread must hold the lock, in the mode this call will
    /// infer: shared if any reader is inside, exclusive otherwise. Intended
    /// for guards leaked with `mem::forget`.
    pub unsafe fn unlock(&self) {
        if self.count.load(Ordering::Acquire) & !WRITER_WAITING != 0 {
            self.unlock_shared();
        } else {
            self.unlock_exclusive();
        }
    }

    /// Readers currently inside
    pub fn reader_count(&self) -> u32 {
        self.count.load(Ordering::Acquire) & !WRITER_WAITING
    }

    /// Whether a writer holds the lock or waits for readers to leave
    pub fn is_writer_waiting(&self) -> bool {
        self.count.load(Ordering::Acquire) & WRITER_WAITING != 0
    }
}

impl Default for ReaderWriterLock {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ReaderWriterLock {
    fn drop(&mut self) {
        if *self.count.get_mut() != 0 || !self.writer_tail.get_mut().is_null() {
            tracing::error!(
                count = *self.count.get_mut(),
                "Reader-writer lock destroyed while held"
            );
        }
        // SAFETY: allocated in `new`; `&mut self` rules out queued waiters.
        drop(unsafe { Box::from_raw(self.active.as_ptr()) });
    }
}

/// Exclusive access; releases on drop
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct WriteGuard<'a> {
    lock: &'a ReaderWriterLock,
    _not_send: PhantomData<*const ()>,
}

impl<'a> WriteGuard<'a> {
    fn new(lock: &'a ReaderWriterLock) -> Self {
        Self {
            lock,
            _not_send: PhantomData,
        }
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock_exclusive();
    }
}

/// Shared access; releases on drop
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ReadGuard<'a> {
    lock: &'a ReaderWriterLock,
    _not_send: PhantomData<*const ()>,
}

impl<'a> ReadGuard<'a> {
    fn new(lock: &'a ReaderWriterLock) -> Self {
        Self {
            lock,
            _not_send: PhantomData,
        }
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.lock.unlock_shared();
    }
}
