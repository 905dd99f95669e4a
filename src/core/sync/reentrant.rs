/*!
 * Reentrant Lock
 *
 * Recursive lock layered on `CriticalSection`: the owning thread may
 * acquire it again, each acquisition needing a matching release.
 */

use super::critical_section::CriticalSection;
use crate::core::id::{current_thread_token, NO_THREAD};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// Lock that the holder may re-acquire
#[derive(Debug, Default)]
pub struct ReentrantLock {
    section: CriticalSection,
    owner: AtomicU64,
    count: AtomicU32,
}

impl ReentrantLock {
    pub fn new() -> Self {
        Self {
            section: CriticalSection::new(),
            owner: AtomicU64::new(NO_THREAD),
            count: AtomicU32::new(0),
        }
    }

    /// Acquire, or bump the recursion count if already held here
    pub fn acquire(&self) {
        let me = current_thread_token();
        if self.owner.load(Ordering::Relaxed) == me {
            self.count.fetch_add(1, Ordering::Relaxed);
            return;
        }

        self.section.acquire();
        self.count.store(1, Ordering::Relaxed);
        self.owner.store(me, Ordering::Relaxed);
    }

    /// Acquire without blocking; `false` when another thread holds or waits
    pub fn try_acquire(&self) -> bool {
        let me = current_thread_token();
        if self.owner.load(Ordering::Relaxed) == me {
            self.count.fetch_add(1, Ordering::Relaxed);
            return true;
        }

        match self.section.try_lock() {
            Some(guard) => {
                // Ownership passes to `owner`/`count`; `release` unlocks
                std::mem::forget(guard);
                self.count.store(1, Ordering::Relaxed);
                self.owner.store(me, Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Guard-returning form of `try_acquire`
    pub fn try_lock(&self) -> Option<ReentrantGuard<'_>> {
        self.try_acquire().then(|| ReentrantGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    /// Drop one level of recursion, releasing the lock at zero
    ///
    /// # Safety
    ///
    /// The calling thread must hold the lock, once per outstanding `acquire`.
    pub unsafe fn release(&self) {
        if self.count.fetch_sub(1, Ordering::Relaxed) == 1 {
            self.owner.store(NO_THREAD, Ordering::Relaxed);
            self.section.unlock();
        }
    }

    /// Acquire and return a guard that releases one level on drop
    pub fn lock(&self) -> ReentrantGuard<'_> {
        self.acquire();
        ReentrantGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }

    /// Recursion depth held by the calling thread (0 if not the owner)
    pub fn depth(&self) -> u32 {
        if self.owner.load(Ordering::Relaxed) == current_thread_token() {
            self.count.load(Ordering::Relaxed)
        } else {
            0
        }
    }
}

/// RAII guard for one level of a `ReentrantLock`
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct ReentrantGuard<'a> {
    lock: &'a ReentrantLock,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ReentrantGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: each guard stands for one acquisition by this thread.
        unsafe { self.lock.release() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_recursive_acquisition() {
        let lock = ReentrantLock::new();
        let outer = lock.lock();
        let inner = lock.lock();
        assert_eq!(lock.depth(), 2);
        drop(inner);
        assert_eq!(lock.depth(), 1);
        drop(outer);
        assert_eq!(lock.depth(), 0);
    }

    #[test]
    fn test_try_acquire_when_unowned() {
        let lock = ReentrantLock::new();
        assert!(lock.try_acquire());
        assert_eq!(lock.depth(), 1);
        // SAFETY: acquired above on this thread.
        unsafe { lock.release() };
        assert_eq!(lock.depth(), 0);
        assert!(lock.try_lock().is_some());
    }

    #[test]
    fn test_try_acquire_by_owner_nests() {
        let lock = ReentrantLock::new();
        let _outer = lock.lock();
        assert!(lock.try_acquire());
        assert_eq!(lock.depth(), 2);
        // SAFETY: balances the `try_acquire` above.
        unsafe { lock.release() };
        assert_eq!(lock.depth(), 1);
    }

    #[test]
    fn test_try_acquire_fails_for_other_thread() {
        let lock = Arc::new(ReentrantLock::new());
        let _guard = lock.lock();

        let other = Arc::clone(&lock);
        let acquired = thread::spawn(move || (other.try_acquire(), other.try_lock().is_some()))
            .join()
            .unwrap();
        assert_eq!(acquired, (false, false));
        assert_eq!(lock.depth(), 1);
    }

    #[test]
    fn test_excludes_other_threads_until_fully_released() {
        let lock = Arc::new(ReentrantLock::new());
        let outer = lock.lock();
        let inner = lock.lock();

        let other = Arc::clone(&lock);
        let waiter = thread::spawn(move || {
            let _guard = other.lock();
            other.depth()
        });

        thread::sleep(Duration::from_millis(20));
        drop(inner);
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());
        drop(outer);

        assert_eq!(waiter.join().unwrap(), 1);
    }
}
