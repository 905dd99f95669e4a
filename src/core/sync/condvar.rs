/*!
 * Condition Variable
 *
 * Wait queue of one-shot tokens associated with an external
 * `CriticalSection`.
 *
 * # Design
 *
 * Each waiter queues a token and parks on its address. A token's
 * `expired` flag is claimed exactly once: by the notifier that wakes it,
 * or by a timed waiter giving up. A timed waiter that loses the claim has
 * a wake on its way and parks once more to absorb it, so every token is
 * woken at most once and no wake is left behind.
 *
 * The queue itself is guarded by the condition's own internal lock, never
 * by the caller's lock.
 */

use super::critical_section::{CriticalSectionGuard, LockedCell};
use super::keyed_event::{key_of, keyed_event};
use super::wait::{deadline_after, WaitError, WaitResult};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// One pending wait
#[derive(Debug)]
struct WaitToken {
    expired: AtomicBool,
}

impl WaitToken {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            expired: AtomicBool::new(false),
        })
    }

    /// Claim the token; `true` for whoever flips it first
    #[inline]
    fn claim(&self) -> bool {
        !self.expired.swap(true, Ordering::AcqRel)
    }

    #[inline]
    fn key(self: &Arc<Self>) -> usize {
        key_of(Arc::as_ptr(self))
    }
}

/// Condition variable paired with a `CriticalSection`
///
/// # Example
///
/// ```
/// use concrt::core::sync::{ConditionVariable, CriticalSection};
/// use std::time::Duration;
///
/// let cs = CriticalSection::new();
/// let cv = ConditionVariable::new();
/// let mut guard = cs.lock().unwrap();
/// assert!(cv.wait_for(&mut guard, Duration::from_millis(1)).is_err());
/// ```
pub struct ConditionVariable {
    queue: LockedCell<VecDeque<Arc<WaitToken>>>,
}

impl ConditionVariable {
    pub fn new() -> Self {
        Self {
            queue: LockedCell::new(VecDeque::new()),
        }
    }

    fn enqueue(&self) -> Arc<WaitToken> {
        let token = WaitToken::new();
        self.queue.with(|queue| queue.push_back(Arc::clone(&token)));
        token
    }

    /// Release `guard`'s lock, wait for a notification, then re-acquire it
    pub fn wait(&self, guard: &mut CriticalSectionGuard<'_>) {
        let token = self.enqueue();
        let section = guard.critical_section();

        // SAFETY: the guard proves this thread holds the lock; it is
        // re-acquired before the guard is usable again.
        unsafe { section.unlock() };
        keyed_event().wait(token.key(), None);
        section.acquire();
    }

    /// Like `wait`, giving up after `timeout`
    ///
    /// The lock is re-acquired on both outcomes.
    pub fn wait_for(
        &self,
        guard: &mut CriticalSectionGuard<'_>,
        timeout: Duration,
    ) -> WaitResult<()> {
        let deadline = deadline_after(Some(timeout));
        let token = self.enqueue();
        let section = guard.critical_section();

        // SAFETY: as in `wait`.
        unsafe { section.unlock() };

        let mut result = Ok(());
        if keyed_event().wait(token.key(), deadline).is_timed_out() {
            if token.claim() {
                self.queue
                    .with(|queue| queue.retain(|queued| !Arc::ptr_eq(queued, &token)));
                result = Err(WaitError::Timeout);
            } else {
                // A notifier claimed the token first; absorb its wake
                keyed_event().wait(token.key(), None);
            }
        }

        section.acquire();
        result
    }

    /// Wake the oldest waiter that has not timed out
    pub fn notify_one(&self) {
        let woken = self.queue.with(|queue| {
            while let Some(token) = queue.pop_front() {
                if token.claim() {
                    return Some(token);
                }
            }
            None
        });

        if let Some(token) = woken {
            keyed_event().wake(token.key());
        }
    }

    /// Wake every waiter
    pub fn notify_all(&self) {
        let detached = self.queue.with(std::mem::take);
        let mut woken = 0usize;
        for token in detached {
            if token.claim() {
                keyed_event().wake(token.key());
                woken += 1;
            }
        }
        tracing::trace!(woken, "Condition variable notified all waiters");
    }

    /// Waiters currently queued
    pub fn waiter_count(&self) -> usize {
        self.queue.with(|queue| queue.len())
    }
}

impl Default for ConditionVariable {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConditionVariable {
    fn drop(&mut self) {
        let outstanding = self
            .queue
            .get_mut()
            .iter()
            .filter(|token| !token.expired.load(Ordering::Acquire))
            .count();
        if outstanding > 0 {
            tracing::error!(outstanding, "Condition variable destroyed with active waits");
        }
    }
}

impl std::fmt::Debug for ConditionVariable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConditionVariable").finish_non_exhaustive()
    }
}
