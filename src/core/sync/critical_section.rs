/*!
 * Critical Section
 *
 * Fair, non-reentrant queue lock in the MCS style.
 *
 * # Design
 *
 * Waiters append a node to an intrusive FIFO by swapping it into `tail`
 * and park on the node's address until the previous holder wakes them.
 * The holder then swaps its own node out for the lock's `active` node, so
 * the node a waiter built on its stack is dead once `lock` returns and
 * nothing else refers to it. `active` lives on the heap: `tail` may point
 * at it while the lock itself is moved.
 *
 * Timed waiters build their node on the heap. On timeout they try to
 * claim the node's `free` flag; winning abandons the node in place and the
 * next unlock frees it, losing means an unlock already handed them the
 * lock and its wake must be consumed.
 *
 * # Guarantees
 *
 * - Grants follow enqueue order exactly
 * - Re-locking from the holding thread is an error, never a deadlock
 * - Uncontended lock and unlock are a single atomic swap and CAS
 */

use super::keyed_event::{key_of, keyed_event};
use super::spinwait::spin_until;
use super::wait::deadline_after;
use crate::core::errors::{ConcurrencyError, ConcurrencyResult};
use crate::core::id::{current_thread_token, NO_THREAD};
use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

/// One waiter in the lock queue
#[derive(Debug)]
struct QueueNode {
    next: AtomicPtr<QueueNode>,
    /// Claimed exactly once, by the unlock that grants or the timeout that abandons
    free: AtomicBool,
}

impl QueueNode {
    const fn new() -> Self {
        Self {
            next: AtomicPtr::new(ptr::null_mut()),
            free: AtomicBool::new(false),
        }
    }

    #[inline]
    fn as_ptr(&self) -> *mut QueueNode {
        self as *const QueueNode as *mut QueueNode
    }

    /// Wait for a successor that has swapped `tail` to publish its link
    #[inline]
    fn wait_for_next(&self) -> *mut QueueNode {
        spin_until(|| {
            let next = self.next.load(Ordering::Acquire);
            (!next.is_null()).then_some(next)
        })
    }
}

/// Fair mutual-exclusion lock
///
/// # Example
///
/// ```
/// use concrt::core::sync::CriticalSection;
///
/// let cs = CriticalSection::new();
/// {
///     let _guard = cs.lock().unwrap();
///     assert!(cs.lock().is_err()); // not reentrant
/// }
/// assert!(cs.try_lock().is_some());
/// ```
#[derive(Debug)]
pub struct CriticalSection {
    tail: AtomicPtr<QueueNode>,
    /// Owned allocation from `Box::into_raw`, freed in `Drop`
    active: NonNull<QueueNode>,
    holder: AtomicU64,
    waiters: AtomicU32,
}

// SAFETY: `active` is only touched through atomics and is owned by the lock.
unsafe impl Send for CriticalSection {}
unsafe impl Sync for CriticalSection {}

impl CriticalSection {
    pub fn new() -> Self {
        let active = Box::into_raw(Box::new(QueueNode::new()));
        Self {
            tail: AtomicPtr::new(ptr::null_mut()),
            // SAFETY: `Box::into_raw` never returns null.
            active: unsafe { NonNull::new_unchecked(active) },
            holder: AtomicU64::new(NO_THREAD),
            waiters: AtomicU32::new(0),
        }
    }

    #[inline]
    fn active(&self) -> &QueueNode {
        // SAFETY: the allocation lives until `Drop`.
        unsafe { self.active.as_ref() }
    }

    #[inline]
    fn held_by_current_thread(&self) -> bool {
        self.holder.load(Ordering::Relaxed) == current_thread_token()
    }

    /// Acquire, parking in FIFO order behind earlier callers
    pub fn lock(&self) -> ConcurrencyResult<CriticalSectionGuard<'_>> {
        if self.held_by_current_thread() {
            return Err(ConcurrencyError::improper_lock("already locked"));
        }
        self.acquire();
        Ok(CriticalSectionGuard::new(self))
    }

    /// Acquire only if nobody holds or waits for the lock
    pub fn try_lock(&self) -> Option<CriticalSectionGuard<'_>> {
        if self.held_by_current_thread() {
            return None;
        }

        let node = QueueNode::new();
        self.tail
            .compare_exchange(ptr::null_mut(), node.as_ptr(), Ordering::AcqRel, Ordering::Relaxed)
            .ok()?;
        self.set_head(&node);
        Some(CriticalSectionGuard::new(self))
    }

    /// Acquire within `timeout`; `Ok(None)` when the deadline passes first
    pub fn try_lock_for(
        &self,
        timeout: Duration,
    ) -> ConcurrencyResult<Option<CriticalSectionGuard<'_>>> {
        if self.held_by_current_thread() {
            return Err(ConcurrencyError::improper_lock("already locked"));
        }

        let deadline = deadline_after(Some(timeout));
        let node = Box::into_raw(Box::new(QueueNode::new()));
        let last = self.tail.swap(node, Ordering::AcqRel);

        if !last.is_null() {
            // SAFETY: `last` stays alive until its owner observes our link.
            // `node` is ours until either we free it below or we abandon it.
            unsafe {
                (*last).next.store(node, Ordering::Release);
                self.waiters.fetch_add(1, Ordering::AcqRel);
                let timed_out = keyed_event().wait(key_of(node), deadline).is_timed_out();
                if timed_out {
                    if !(*node).free.swap(true, Ordering::AcqRel) {
                        self.waiters.fetch_sub(1, Ordering::AcqRel);
                        tracing::trace!("Timed lock acquisition abandoned its queue node");
                        return Ok(None);
                    }
                    // An unlock claimed the node first; absorb its wake
                    keyed_event().wait(key_of(node), None);
                }
                self.waiters.fetch_sub(1, Ordering::AcqRel);
            }
        }

        // SAFETY: we hold the lock, so nobody else frees `node`.
        unsafe {
            self.set_head(&*node);
            drop(Box::from_raw(node));
        }
        Ok(Some(CriticalSectionGuard::new(self)))
    }

    /// Unchecked acquisition for internal locks that are never re-entered
    pub(crate) fn acquire(&self) {
        let node = QueueNode::new();
        let last = self.tail.swap(node.as_ptr(), Ordering::AcqRel);

        if !last.is_null() {
            // SAFETY: the previous tail is kept alive until its owner sees our link.
            unsafe { (*last).next.store(node.as_ptr(), Ordering::Release) };
            self.waiters.fetch_add(1, Ordering::AcqRel);
            keyed_event().wait(key_of(node.as_ptr()), None);
            self.waiters.fetch_sub(1, Ordering::AcqRel);
        }

        self.set_head(&node);
    }

    /// Move ownership from the caller's queue node to the lock's `active` one
    fn set_head(&self, node: &QueueNode) {
        self.holder.store(current_thread_token(), Ordering::Relaxed);
        let active = self.active();
        active
            .next
            .store(node.next.load(Ordering::Acquire), Ordering::Relaxed);

        if self
            .tail
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

    /// Release the lock and wake the next live waiter
    ///
    /// # Safety
    ///
    /// The calling thread must hold the lock and must not also release it
    /// through a guard. Intended for guards that were leaked with
    /// `mem::forget`.
    pub unsafe fn unlock(&self) {
        self.holder.store(NO_THREAD, Ordering::Relaxed);

        if self
            .tail
            .compare_exchange(
                self.active.as_ptr(),
                ptr::null_mut(),
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_ok()
        {
            return;
        }

        let mut next = self.active().wait_for_next();
        loop {
            if !(*next).free.swap(true, Ordering::AcqRel) {
                break;
            }

            // The waiter timed out and left its heap node behind; it is ours now
            let abandoned = Box::from_raw(next);
            if self
                .tail
                .compare_exchange(next, ptr::null_mut(), Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                return;
            }
            next = abandoned.wait_for_next();
        }

        keyed_event().wake(key_of(next));
    }

    /// Whether any thread holds or waits for the lock
    pub fn is_locked(&self) -> bool {
        !self.tail.load(Ordering::Acquire).is_null()
    }

    /// Threads linked into the queue and parked behind the holder
    pub fn waiter_count(&self) -> u32 {
        self.waiters.load(Ordering::Acquire)
    }
}

impl Default for CriticalSection {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CriticalSection {
    fn drop(&mut self) {
        if !self.tail.get_mut().is_null() {
            tracing::error!("Critical section destroyed while locked");
        }
        // SAFETY: allocated in `new`; `&mut self` rules out queued waiters.
        drop(unsafe { Box::from_raw(self.active.as_ptr()) });
    }
}

/// RAII guard releasing a `CriticalSection` on drop
///
/// Not `Send`: the lock must be released by the thread that acquired it.
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct CriticalSectionGuard<'a> {
    lock: &'a CriticalSection,
    _not_send: PhantomData<*const ()>,
}

impl<'a> CriticalSectionGuard<'a> {
    fn new(lock: &'a CriticalSection) -> Self {
        Self {
            lock,
            _not_send: PhantomData,
        }
    }

    /// The lock this guard holds
    pub fn critical_section(&self) -> &'a CriticalSection {
        self.lock
    }
}

impl Drop for CriticalSectionGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: the guard exists only while this thread holds the lock.
        unsafe { self.lock.unlock() }
    }
}

impl std::fmt::Debug for CriticalSectionGuard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CriticalSectionGuard").finish_non_exhaustive()
    }
}

/// Value protected by an internal `CriticalSection`
pub(crate) struct LockedCell<T> {
    lock: CriticalSection,
    value: UnsafeCell<T>,
}

// SAFETY: access to `value` is serialized by `lock`.
unsafe impl<T: Send> Sync for LockedCell<T> {}

impl<T> LockedCell<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            lock: CriticalSection::new(),
            value: UnsafeCell::new(value),
        }
    }

    /// Run `f` with exclusive access; `f` must not re-enter this cell
    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        self.lock.acquire();
        let _guard = CriticalSectionGuard::new(&self.lock);
        // SAFETY: the lock is held for the lifetime of the borrow.
        f(unsafe { &mut *self.value.get() })
    }

    pub(crate) fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_lock_is_not_reentrant() {
        let cs = CriticalSection::new();
        let guard = cs.lock().unwrap();
        assert!(matches!(cs.lock(), Err(ConcurrencyError::ImproperLock { .. })));
        assert!(matches!(
            cs.try_lock_for(Duration::from_millis(1)),
            Err(ConcurrencyError::ImproperLock { .. })
        ));
        assert!(cs.try_lock().is_none());
        drop(guard);
        assert!(!cs.is_locked());
    }

    #[test]
    fn test_try_lock_fails_while_held_elsewhere() {
        let cs = Arc::new(CriticalSection::new());
        let _guard = cs.lock().unwrap();

        let other = Arc::clone(&cs);
        let acquired = thread::spawn(move || other.try_lock().is_some())
            .join()
            .unwrap();
        assert!(!acquired);
    }

    #[test]
    fn test_timed_lock_times_out_then_lock_still_works() {
        let cs = Arc::new(CriticalSection::new());
        let guard = cs.lock().unwrap();

        let other = Arc::clone(&cs);
        let waiter = thread::spawn(move || {
            let start = Instant::now();
            let acquired = other.try_lock_for(Duration::from_millis(30)).unwrap().is_some();
            (acquired, start.elapsed())
        });

        let (acquired, elapsed) = waiter.join().unwrap();
        assert!(!acquired);
        assert!(elapsed >= Duration::from_millis(25));

        // Unlock must skip the abandoned node
        drop(guard);
        assert!(!cs.is_locked());
        assert!(cs.try_lock().is_some());
    }

    #[test]
    fn test_timed_lock_succeeds_when_released() {
        let cs = Arc::new(CriticalSection::new());
        let guard = cs.lock().unwrap();

        let other = Arc::clone(&cs);
        let waiter = thread::spawn(move || {
            other
                .try_lock_for(Duration::from_secs(5))
                .unwrap()
                .is_some()
        });

        thread::sleep(Duration::from_millis(30));
        drop(guard);
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn test_abandoned_node_is_skipped_for_next_waiter() {
        let cs = Arc::new(CriticalSection::new());
        let guard = cs.lock().unwrap();

        let timed = {
            let cs = Arc::clone(&cs);
            thread::spawn(move || cs.try_lock_for(Duration::from_millis(20)).unwrap().is_some())
        };
        thread::sleep(Duration::from_millis(5));

        let blocking = {
            let cs = Arc::clone(&cs);
            thread::spawn(move || {
                let _guard = cs.lock().unwrap();
            })
        };

        assert!(!timed.join().unwrap());
        thread::sleep(Duration::from_millis(20));
        drop(guard);
        blocking.join().unwrap();
        assert!(!cs.is_locked());
    }

    #[test]
    fn test_mutual_exclusion() {
        let cs = Arc::new(CriticalSection::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let total = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cs = Arc::clone(&cs);
                let inside = Arc::clone(&inside);
                let total = Arc::clone(&total);
                thread::spawn(move || {
                    for _ in 0..500 {
                        let _guard = cs.lock().unwrap();
                        assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                        total.fetch_add(1, Ordering::Relaxed);
                        inside.fetch_sub(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(total.load(Ordering::Relaxed), 8 * 500);
    }

    /// Spin until `count` threads are parked in the queue
    fn wait_for_waiters(cs: &CriticalSection, count: u32) {
        while cs.waiter_count() < count {
            thread::yield_now();
        }
    }

    #[test]
    fn test_grants_follow_enqueue_order() {
        let cs = Arc::new(CriticalSection::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        let guard = cs.lock().unwrap();

        let mut handles = Vec::new();
        for i in 0..4 {
            let order = Arc::clone(&order);
            handles.push(thread::spawn({
                let cs = Arc::clone(&cs);
                move || {
                let _guard = cs.lock().unwrap();
                order.lock().push(i);
            }}));
            wait_for_waiters(&cs, i + 1);
        }

        drop(guard);
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
        assert_eq!(cs.waiter_count(), 0);
    }

    #[test]
    fn test_raw_unlock_after_forgotten_guard() {
        let cs = CriticalSection::new();
        std::mem::forget(cs.lock().unwrap());
        assert!(cs.is_locked());

        thread::scope(|scope| {
            let waiter = scope.spawn(|| cs.lock().map(drop).is_ok());
            wait_for_waiters(&cs, 1);
            // SAFETY: this thread acquired the lock above and leaked the guard.
            unsafe { cs.unlock() };
            assert!(waiter.join().unwrap());
        });
        assert!(!cs.is_locked());
    }

    #[test]
    fn test_lock_moved_while_held_stays_usable() {
        let boxed = Box::new(CriticalSection::new());
        std::mem::forget(boxed.lock().unwrap());
        // Frees the box that held the lock; the queue must not point into it
        let moved = *boxed;

        thread::scope(|scope| {
            let waiter = scope.spawn(|| {
                let _guard = moved.lock().unwrap();
            });
            wait_for_waiters(&moved, 1);
            // SAFETY: the leaked guard was taken on this thread.
            unsafe { moved.unlock() };
            waiter.join().unwrap();
        });
        assert!(!moved.is_locked());
        assert!(moved.try_lock().is_some());
    }

    #[test]
    fn test_locked_cell_serializes_access() {
        let cell = Arc::new(LockedCell::new(0u64));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let cell = Arc::clone(&cell);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        cell.with(|v| *v += 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cell.with(|v| *v), 4000);
    }
}
