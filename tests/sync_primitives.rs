/*!
 * Synchronization Primitives Integration Tests
 *
 * Cross-thread behavior of the queue lock, reader-writer lock, condition
 * variable and events
 */

use concrt::core::sync::{
    ConditionVariable, CriticalSection, Event, ReaderWriterLock, Signaled, WaitError,
};
use concrt::ConcurrencyError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_critical_section_mutual_exclusion() {
    let cs = Arc::new(CriticalSection::new());
    let inside = Arc::new(AtomicBool::new(false));
    let total = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let (cs, inside, total) = (Arc::clone(&cs), Arc::clone(&inside), Arc::clone(&total));
            thread::spawn(move || {
                for _ in 0..500 {
                    let _guard = cs.lock().unwrap();
                    assert!(!inside.swap(true, Ordering::SeqCst), "overlapping holders");
                    total.fetch_add(1, Ordering::Relaxed);
                    inside.store(false, Ordering::SeqCst);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(total.load(Ordering::SeqCst), 4000);
    assert!(!cs.is_locked());
}

#[test]
fn test_critical_section_grants_in_enqueue_order() {
    let cs = Arc::new(CriticalSection::new());
    let order = Arc::new(Mutex::new(Vec::new()));
    let guard = cs.lock().unwrap();

    // Each waiter is started, then observed parked, before the next one
    let handles: Vec<_> = (0..4u32)
        .map(|i| {
            let (cs, order) = (Arc::clone(&cs), Arc::clone(&order));
            let started = Arc::new(Barrier::new(2));
            let handle = {
                let started = Arc::clone(&started);
                let cs = Arc::clone(&cs);
                thread::spawn(move || {
                    started.wait();
                    let _guard = cs.lock().unwrap();
                    order.lock().push(i);
                })
            };
            started.wait();
            while cs.waiter_count() <= i {
                thread::yield_now();
            }
            handle
        })
        .collect();

    assert_eq!(cs.waiter_count(), 4);
    drop(guard);
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    assert!(!cs.is_locked());
}

#[test]
fn test_critical_section_raw_unlock_after_forget() {
    let cs = CriticalSection::new();
    std::mem::forget(cs.lock().unwrap());

    thread::scope(|scope| {
        let waiter = scope.spawn(|| cs.try_lock_for(Duration::from_secs(5)).unwrap().is_some());
        while cs.waiter_count() == 0 {
            thread::yield_now();
        }
        // SAFETY: the guard leaked above was acquired on this thread.
        unsafe { cs.unlock() };
        assert!(waiter.join().unwrap());
    });
    assert!(!cs.is_locked());
}

#[test]
fn test_critical_section_rejects_reentry() {
    let cs = CriticalSection::new();
    let _guard = cs.lock().unwrap();
    assert!(matches!(cs.lock(), Err(ConcurrencyError::ImproperLock { .. })));
    assert!(cs.try_lock().is_none());
}

#[test]
fn test_timed_lock_gives_up_then_succeeds() {
    let cs = Arc::new(CriticalSection::new());
    let holder = {
        let cs = Arc::clone(&cs);
        thread::spawn(move || {
            let _guard = cs.lock().unwrap();
            thread::sleep(Duration::from_millis(100));
        })
    };
    thread::sleep(Duration::from_millis(20));

    let contender = {
        let cs = Arc::clone(&cs);
        thread::spawn(move || {
            let first = cs.try_lock_for(Duration::from_millis(10)).unwrap().is_some();
            let second = cs.try_lock_for(Duration::from_secs(5)).unwrap().is_some();
            (first, second)
        })
    };

    holder.join().unwrap();
    assert_eq!(contender.join().unwrap(), (false, true));
    assert!(!cs.is_locked());
}

#[test]
fn test_rwlock_readers_never_overlap_writers() {
    let lock = Arc::new(ReaderWriterLock::new());
    let readers = Arc::new(AtomicUsize::new(0));
    let writing = Arc::new(AtomicBool::new(false));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let (lock, readers, writing) =
                (Arc::clone(&lock), Arc::clone(&readers), Arc::clone(&writing));
            thread::spawn(move || {
                for round in 0..300 {
                    if (i + round) % 4 == 0 {
                        let _guard = lock.lock().unwrap();
                        assert!(!writing.swap(true, Ordering::SeqCst));
                        assert_eq!(readers.load(Ordering::SeqCst), 0);
                        writing.store(false, Ordering::SeqCst);
                    } else {
                        let _guard = lock.lock_read().unwrap();
                        readers.fetch_add(1, Ordering::SeqCst);
                        assert!(!writing.load(Ordering::SeqCst));
                        readers.fetch_sub(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(lock.reader_count(), 0);
    assert!(!lock.is_writer_waiting());
}

#[test]
fn test_rwlock_waiting_writer_blocks_new_readers() {
    let lock = Arc::new(ReaderWriterLock::new());
    let events = Arc::new(Mutex::new(Vec::new()));
    let read = lock.lock_read().unwrap();

    let writer = {
        let (lock, events) = (Arc::clone(&lock), Arc::clone(&events));
        thread::spawn(move || {
            let _guard = lock.lock().unwrap();
            events.lock().push("writer");
        })
    };
    thread::sleep(Duration::from_millis(40));
    assert!(lock.is_writer_waiting());
    assert!(lock.try_lock_read().is_none());

    let late_reader = {
        let (lock, events) = (Arc::clone(&lock), Arc::clone(&events));
        thread::spawn(move || {
            let _guard = lock.lock_read().unwrap();
            events.lock().push("reader");
        })
    };
    thread::sleep(Duration::from_millis(40));

    drop(read);
    writer.join().unwrap();
    late_reader.join().unwrap();
    assert_eq!(*events.lock(), vec!["writer", "reader"]);
}

#[test]
fn test_condvar_producer_consumer() {
    struct Queue {
        cs: CriticalSection,
        cv: ConditionVariable,
        items: Mutex<Vec<u32>>,
    }

    let queue = Arc::new(Queue {
        cs: CriticalSection::new(),
        cv: ConditionVariable::new(),
        items: Mutex::new(Vec::new()),
    });

    let consumer = {
        let queue = Arc::clone(&queue);
        thread::spawn(move || {
            let mut received = Vec::new();
            let mut guard = queue.cs.lock().unwrap();
            while received.len() < 10 {
                let next = queue.items.lock().pop();
                match next {
                    Some(item) => received.push(item),
                    None => queue.cv.wait(&mut guard),
                }
            }
            received
        })
    };

    for i in 0..10 {
        let _guard = queue.cs.lock().unwrap();
        queue.items.lock().push(i);
        queue.cv.notify_one();
    }

    let mut received = consumer.join().unwrap();
    received.sort_unstable();
    assert_eq!(received, (0..10).collect::<Vec<_>>());
}

#[test]
fn test_condvar_timeout_racing_notify_resumes_once() {
    // Timeouts land right around the notify; each waiter must return exactly once
    for _ in 0..20 {
        let shared = Arc::new((CriticalSection::new(), ConditionVariable::new()));
        let returned = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(2));

        let waiter = {
            let (shared, returned, barrier) =
                (Arc::clone(&shared), Arc::clone(&returned), Arc::clone(&barrier));
            thread::spawn(move || {
                let mut guard = shared.0.lock().unwrap();
                barrier.wait();
                let result = shared.1.wait_for(&mut guard, Duration::from_millis(2));
                returned.fetch_add(1, Ordering::SeqCst);
                result
            })
        };

        barrier.wait();
        thread::sleep(Duration::from_millis(2));
        shared.1.notify_one();

        let result = waiter.join().unwrap();
        assert!(result.is_ok() || result == Err(WaitError::Timeout));
        assert_eq!(returned.load(Ordering::SeqCst), 1);
        assert_eq!(shared.1.waiter_count(), 0);
    }
}

#[test]
fn test_event_reset_then_wait_times_out() {
    let event = Event::new();
    event.reset();
    let start = Instant::now();
    assert_eq!(event.wait(Some(Duration::from_millis(10))), Err(WaitError::Timeout));
    assert!(start.elapsed() >= Duration::from_millis(5));
}

#[test]
fn test_wait_any_reports_index() {
    let events: Arc<[Event; 3]> = Arc::new([Event::new(), Event::new(), Event::new()]);
    let waiter = {
        let events = Arc::clone(&events);
        thread::spawn(move || {
            let refs: Vec<&Event> = events.iter().collect();
            Event::wait_for_multiple(&refs, false, Some(Duration::from_secs(5)))
        })
    };

    thread::sleep(Duration::from_millis(30));
    events[2].set();
    assert_eq!(waiter.join().unwrap(), Ok(Signaled::Index(2)));
    assert!(events.iter().all(|event| event.waiter_count() == 0));
}

#[test]
fn test_wait_all_needs_every_event() {
    let events: Arc<[Event; 3]> = Arc::new([Event::new(), Event::new(), Event::new()]);
    let done = Arc::new(AtomicBool::new(false));
    let waiter = {
        let (events, done) = (Arc::clone(&events), Arc::clone(&done));
        thread::spawn(move || {
            let refs: Vec<&Event> = events.iter().collect();
            let result = Event::wait_for_multiple(&refs, true, Some(Duration::from_secs(5)));
            done.store(true, Ordering::SeqCst);
            result
        })
    };

    thread::sleep(Duration::from_millis(20));
    events[0].set();
    events[1].set();
    thread::sleep(Duration::from_millis(30));
    assert!(!done.load(Ordering::SeqCst));

    events[2].set();
    assert_eq!(waiter.join().unwrap(), Ok(Signaled::All));
}

#[test]
fn test_wait_all_timeout_unregisters() {
    let a = Event::new();
    let b = Event::new();
    a.set();
    assert_eq!(
        Event::wait_for_multiple(&[&a, &b], true, Some(Duration::from_millis(10))),
        Err(WaitError::Timeout)
    );
    assert_eq!(a.waiter_count(), 0);
    assert_eq!(b.waiter_count(), 0);
}

#[test]
fn test_rwlock_random_mix_keeps_counter_consistent() {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    let lock = Arc::new(ReaderWriterLock::new());
    let value = Arc::new(AtomicUsize::new(0));
    let writes = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..6u64)
        .map(|seed| {
            let (lock, value, writes) = (Arc::clone(&lock), Arc::clone(&value), Arc::clone(&writes));
            thread::spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed);
                for _ in 0..400 {
                    if rng.gen_bool(0.3) {
                        let _guard = lock.lock().unwrap();
                        // Non-atomic read-modify-write is safe only under exclusion
                        let current = value.load(Ordering::Relaxed);
                        thread::yield_now();
                        value.store(current + 1, Ordering::Relaxed);
                        writes.fetch_add(1, Ordering::Relaxed);
                    } else if let Some(_guard) = lock.try_lock_read() {
                        let _ = value.load(Ordering::Relaxed);
                    } else {
                        let _guard = lock.lock_read().unwrap();
                        let _ = value.load(Ordering::Relaxed);
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(value.load(Ordering::SeqCst), writes.load(Ordering::SeqCst));
}
