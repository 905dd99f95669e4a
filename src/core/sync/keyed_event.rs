/*!
 * Keyed Event Parking Primitive
 *
 * Address-keyed block/wake rendezvous built on parking_lot_core.
 * Every blocking primitive in this crate parks here after spinning.
 *
 * # Design
 *
 * A wake issued before the matching wait is not lost: when `wake` finds
 * nobody parked on the key it records a pending wake, and the next `wait`
 * on that key consumes it without sleeping. Both sides run their
 * bookkeeping inside parking_lot_core callbacks, which execute under the
 * bucket lock for the key, so the check-then-park is atomic.
 *
 * Pending wakes live in a fixed sharded table guarded by spin mutexes.
 * parking_lot_core forbids calling back into parking_lot from its callbacks,
 * so the table must never park.
 *
 * Callers guarantee that every `wake` is matched by exactly one `wait` on
 * the same key, which keeps the table empty at quiescence.
 */

use ahash::RandomState;
use parking_lot_core::{park, unpark_one, ParkResult, DEFAULT_PARK_TOKEN, DEFAULT_UNPARK_TOKEN};
use spin::mutex::SpinMutex;
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash, Hasher};
use std::sync::OnceLock;
use std::time::Instant;

/// Number of pending-wake shards (power of 2 for fast modulo via bitwise AND)
const WAKE_SHARDS: usize = 64;
const SHARD_MASK: usize = WAKE_SHARDS - 1;

static KEYED_EVENT: OnceLock<KeyedEvent> = OnceLock::new();

/// Process-wide keyed event, created on first use
pub fn keyed_event() -> &'static KeyedEvent {
    KEYED_EVENT.get_or_init(|| {
        tracing::debug!(shards = WAKE_SHARDS, "Keyed event initialized");
        KeyedEvent::new()
    })
}

/// Parking key for an object: its address
#[inline]
pub(crate) fn key_of<T>(ptr: *const T) -> usize {
    ptr as usize
}

/// Outcome of a keyed wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParkOutcome {
    /// A matching `wake` arrived, before or during the wait
    Woken,
    /// The deadline passed with no wake
    TimedOut,
}

impl ParkOutcome {
    #[inline(always)]
    pub fn is_timed_out(self) -> bool {
        matches!(self, ParkOutcome::TimedOut)
    }
}

/// Pending wakes for the keys hashing to this shard
#[repr(C, align(64))] // Cache-line aligned to prevent false sharing
struct WakeShard {
    pending: SpinMutex<HashMap<usize, u32, RandomState>>,
}

impl WakeShard {
    fn new() -> Self {
        Self {
            pending: SpinMutex::new(HashMap::with_hasher(RandomState::new())),
        }
    }

    /// Record one wake with no sleeper
    fn deposit(&self, key: usize) {
        *self.pending.lock().entry(key).or_insert(0) += 1;
    }

    /// Consume one recorded wake, if any
    fn withdraw(&self, key: usize) -> bool {
        let mut pending = self.pending.lock();
        match pending.get_mut(&key) {
            Some(count) if *count > 1 => {
                *count -= 1;
                true
            }
            Some(_) => {
                pending.remove(&key);
                true
            }
            None => false,
        }
    }

    fn len(&self) -> usize {
        self.pending.lock().values().map(|&n| n as usize).sum()
    }
}

/// Address-keyed wait/wake facility
pub struct KeyedEvent {
    shards: Box<[WakeShard]>,
    hasher: RandomState,
}

impl KeyedEvent {
    /// Create a keyed event with its own pending-wake table
    pub fn new() -> Self {
        Self {
            shards: (0..WAKE_SHARDS).map(|_| WakeShard::new()).collect(),
            hasher: RandomState::new(),
        }
    }

    #[inline]
    fn shard(&self, key: usize) -> &WakeShard {
        let mut hasher = self.hasher.build_hasher();
        key.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) & SHARD_MASK]
    }

    /// Block until `key` is woken or `deadline` passes
    pub fn wait(&self, key: usize, deadline: Option<Instant>) -> ParkOutcome {
        let shard = self.shard(key);

        // SAFETY: the validate and timed-out callbacks only touch the spin-locked
        // shard, which never parks and never panics.
        let result = unsafe {
            park(
                key,
                || !shard.withdraw(key),
                || {},
                |_, _| {},
                DEFAULT_PARK_TOKEN,
                deadline,
            )
        };

        match result {
            // Invalid means validate consumed a wake deposited before we parked
            ParkResult::Unparked(_) | ParkResult::Invalid => ParkOutcome::Woken,
            ParkResult::TimedOut => ParkOutcome::TimedOut,
        }
    }

    /// Wake one waiter on `key`, or leave a pending wake if none is parked
    pub fn wake(&self, key: usize) {
        let shard = self.shard(key);

        // SAFETY: the callback only touches the spin-locked shard.
        unsafe {
            unpark_one(key, |result| {
                if result.unparked_threads == 0 {
                    shard.deposit(key);
                }
                DEFAULT_UNPARK_TOKEN
            });
        }
    }

    /// Wakes recorded with no sleeper and not yet consumed
    pub fn pending_wakes(&self) -> usize {
        self.shards.iter().map(WakeShard::len).sum()
    }
}

impl Default for KeyedEvent {
    fn default() -> Self {
        Self::new()
    }
}
