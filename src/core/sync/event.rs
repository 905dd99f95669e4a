/*!
 * Events and Multi-Wait
 *
 * Manual-reset binary event plus a coordinator for waiting on any or all
 * of a set of events.
 *
 * # Design
 *
 * A waiter builds one shared descriptor and registers it with every event
 * it waits on. The descriptor holds:
 * - `pending`: signals still needed (1 for wait-any, N for wait-all)
 * - `signaled`: `RUNNING` while registering, `PARKED` once asleep, or the
 *   identity of the event that satisfied it
 *
 * `set` decrements `pending` of each registered descriptor and claims the
 * ones reaching zero by swapping in its own identity. Only a claim that
 * replaces `PARKED` issues a wake; a waiter still registering sees the
 * identity when it tries to park and returns without sleeping. A timed-out
 * waiter that loses the race back to `RUNNING` absorbs the wake that is on
 * its way. Every registration is removed again before the wait returns,
 * on success and on timeout alike.
 */

use super::critical_section::LockedCell;
use super::keyed_event::{key_of, keyed_event};
use super::wait::{deadline_after, is_poll, WaitError, WaitResult};
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const WAIT_PARKED: usize = 0;
const WAIT_RUNNING: usize = 1;

/// One multi-wait in progress, shared by all events it is registered with
#[derive(Debug)]
struct WaitDescriptor {
    signaled: AtomicUsize,
    pending: AtomicIsize,
}

impl WaitDescriptor {
    fn key(self: &Arc<Self>) -> usize {
        key_of(Arc::as_ptr(self))
    }
}

#[derive(Debug, Default)]
struct EventState {
    signaled: bool,
    waiters: Vec<Arc<WaitDescriptor>>,
}

/// Successful outcome of `Event::wait_for_multiple`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signaled {
    /// Wait-any: index of the event that satisfied the wait
    ///
    /// Events are registered in list order and registration stops at the
    /// first one already set, so when several are set on entry the lowest
    /// index is reported.
    Index(usize),
    /// Wait-all: every event was set
    All,
}

/// Manual-reset event
///
/// # Example
///
/// ```
/// use concrt::core::sync::Event;
/// use std::time::Duration;
///
/// let event = Event::new();
/// assert!(event.wait(Some(Duration::ZERO)).is_err());
/// event.set();
/// assert!(event.wait(None).is_ok());
/// ```
pub struct Event {
    state: LockedCell<EventState>,
}

impl Event {
    pub fn new() -> Self {
        Self {
            state: LockedCell::new(EventState {
                signaled: false,
                waiters: Vec::new(),
            }),
        }
    }

    /// Value stored in a descriptor's `signaled` slot when this event claims it
    #[inline]
    fn identity(&self) -> usize {
        key_of(self as *const Event)
    }

    /// Signal the event, releasing every wait it completes
    pub fn set(&self) {
        let identity = self.identity();
        let wakeups = self.state.with(|state| {
            let mut wakeups = Vec::new();
            if state.signaled {
                return wakeups;
            }
            state.signaled = true;

            state.waiters.retain(|wait| {
                if wait.pending.fetch_sub(1, Ordering::AcqRel) != 1 {
                    return true;
                }
                if wait.signaled.swap(identity, Ordering::AcqRel) != WAIT_PARKED {
                    // Waiter is still registering and will notice on its own
                    return true;
                }
                wakeups.push(Arc::clone(wait));
                false
            });
            wakeups
        });

        for wait in wakeups {
            keyed_event().wake(wait.key());
        }
    }

    /// Clear the event, re-arming every registered wait
    pub fn reset(&self) {
        self.state.with(|state| {
            if state.signaled {
                state.signaled = false;
                for wait in &state.waiters {
                    wait.pending.fetch_add(1, Ordering::AcqRel);
                }
            }
        });
    }

    pub fn is_set(&self) -> bool {
        self.state.with(|state| state.signaled)
    }

    /// Waits currently registered with this event
    pub fn waiter_count(&self) -> usize {
        self.state.with(|state| state.waiters.len())
    }

    /// Wait until set; `Some(Duration::ZERO)` polls
    pub fn wait(&self, timeout: Option<Duration>) -> WaitResult<()> {
        if self.is_set() {
            return Ok(());
        }
        if is_poll(timeout) {
            return Err(WaitError::Timeout);
        }

        wait_on(&[self], false, timeout)
            .map(|_| ())
            .ok_or(WaitError::Timeout)
    }

    /// Wait for any (`wait_all == false`) or all of `events`
    ///
    /// An empty list is satisfied immediately.
    pub fn wait_for_multiple(
        events: &[&Event],
        wait_all: bool,
        timeout: Option<Duration>,
    ) -> WaitResult<Signaled> {
        if events.is_empty() {
            return Ok(Signaled::All);
        }

        match wait_on(events, wait_all, timeout) {
            Some(_) if wait_all => Ok(Signaled::All),
            Some(index) => Ok(Signaled::Index(index)),
            None => Err(WaitError::Timeout),
        }
    }
}

/// Register with every event, park unless already satisfied, then unregister
///
/// Returns the index of the event that satisfied the wait.
fn wait_on(events: &[&Event], wait_all: bool, timeout: Option<Duration>) -> Option<usize> {
    let needed = if wait_all { events.len() } else { 1 };
    let wait = Arc::new(WaitDescriptor {
        signaled: AtomicUsize::new(WAIT_RUNNING),
        pending: AtomicIsize::new(isize::try_from(needed).unwrap_or(isize::MAX)),
    });

    for (i, event) in events.iter().enumerate() {
        let satisfied = event.state.with(|state| {
            state.waiters.push(Arc::clone(&wait));
            if state.signaled && wait.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                wait.signaled.store(event.identity(), Ordering::Release);
                return true;
            }
            false
        });
        if satisfied {
            return end_wait(&wait, &events[..=i]);
        }
    }

    if !is_poll(timeout)
        && wait
            .signaled
            .compare_exchange(WAIT_RUNNING, WAIT_PARKED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    {
        let deadline = deadline_after(timeout);
        if keyed_event().wait(wait.key(), deadline).is_timed_out()
            && wait
                .signaled
                .compare_exchange(WAIT_PARKED, WAIT_RUNNING, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            // An event claimed us as the deadline passed; absorb its wake
            keyed_event().wait(wait.key(), None);
        }
    }

    end_wait(&wait, events)
}

fn end_wait(wait: &Arc<WaitDescriptor>, events: &[&Event]) -> Option<usize> {
    let mut index = None;
    for (i, event) in events.iter().enumerate() {
        let claimed_here = event.state.with(|state| {
            if let Some(pos) = state.waiters.iter().position(|w| Arc::ptr_eq(w, wait)) {
                state.waiters.swap_remove(pos);
            }
            wait.signaled.load(Ordering::Acquire) == event.identity()
        });
        if claimed_here && index.is_none() {
            index = Some(i);
        }
    }
    index
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        let waiters = self.state.get_mut().waiters.len();
        if waiters > 0 {
            tracing::error!(waiters, "Event destroyed with registered waits");
        }
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("signaled", &self.is_set())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_wait_on_set_event_returns_immediately() {
        let event = Event::new();
        event.set();
        assert!(event.is_set());
        assert_eq!(event.wait(Some(Duration::ZERO)), Ok(()));
        assert_eq!(event.wait(None), Ok(()));
    }

    #[test]
    fn test_reset_then_wait_times_out() {
        let event = Event::new();
        event.set();
        event.reset();

        let start = Instant::now();
        assert_eq!(
            event.wait(Some(Duration::from_millis(20))),
            Err(WaitError::Timeout)
        );
        assert!(start.elapsed() >= Duration::from_millis(15));
        assert_eq!(event.waiter_count(), 0);
    }

    #[test]
    fn test_set_wakes_waiter() {
        let event = Arc::new(Event::new());
        let waiter = {
            let event = Arc::clone(&event);
            thread::spawn(move || event.wait(Some(Duration::from_secs(5))))
        };

        thread::sleep(Duration::from_millis(30));
        event.set();
        assert_eq!(waiter.join().unwrap(), Ok(()));
        assert_eq!(event.waiter_count(), 0);
    }

    #[test]
    fn test_poll_multiple_reports_signaled_index() {
        let events = [Event::new(), Event::new(), Event::new()];
        events[1].set();
        let refs: Vec<&Event> = events.iter().collect();

        assert_eq!(
            Event::wait_for_multiple(&refs, false, Some(Duration::ZERO)),
            Ok(Signaled::Index(1))
        );
        assert_eq!(
            Event::wait_for_multiple(&refs, true, Some(Duration::ZERO)),
            Err(WaitError::Timeout)
        );
        assert!(events.iter().all(|e| e.waiter_count() == 0));
    }

    #[test]
    fn test_wait_any_reports_lowest_set_index() {
        let events = [Event::new(), Event::new(), Event::new(), Event::new()];
        events[3].set();
        events[1].set();
        events[2].set();
        let refs: Vec<&Event> = events.iter().collect();

        assert_eq!(
            Event::wait_for_multiple(&refs, false, None),
            Ok(Signaled::Index(1))
        );
        assert!(events.iter().all(|e| e.waiter_count() == 0));
    }

    #[test]
    fn test_empty_wait_is_satisfied() {
        assert_eq!(
            Event::wait_for_multiple(&[], false, Some(Duration::ZERO)),
            Ok(Signaled::All)
        );
    }

    #[test]
    fn test_reset_rearms_registered_waits() {
        let a = Event::new();
        let b = Event::new();
        a.set();
        a.reset();
        b.set();

        assert_eq!(
            Event::wait_for_multiple(&[&a, &b], true, Some(Duration::from_millis(10))),
            Err(WaitError::Timeout)
        );
        a.set();
        assert_eq!(
            Event::wait_for_multiple(&[&a, &b], true, Some(Duration::ZERO)),
            Ok(Signaled::All)
        );
    }
}
