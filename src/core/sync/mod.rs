/*!
 * Synchronization Primitives
 *
 * Fair locks, a writer-preferring reader-writer lock, a condition variable
 * and multi-object events, all built on one spin-then-park protocol:
 * - Adaptive `SpinWait` while another thread finishes publishing a link
 * - Keyed event parking (parking_lot_core) for actual blocking
 *
 * # Architecture
 *
 * Every primitive owns its wait queue. Waiters park on the address of a
 * node or token they own, and each node or token is woken exactly once.
 * Timed waits resolve the race against a concurrent wake with a one-shot
 * claim flag, so a lost race still consumes its wake.
 *
 * # Performance
 *
 * - Uncontended acquisition is a single swap or CAS
 * - No allocation on untimed lock paths
 * - The OS is entered only to park or wake
 */

mod condvar;
mod critical_section;
mod event;
mod keyed_event;
mod reentrant;
mod rwlock;
mod spinwait;
mod wait;

pub use condvar::ConditionVariable;
pub use critical_section::{CriticalSection, CriticalSectionGuard};
pub use event::{Event, Signaled};
pub use keyed_event::{keyed_event, KeyedEvent, ParkOutcome};
pub use reentrant::{ReentrantGuard, ReentrantLock};
pub use rwlock::{ReadGuard, ReaderWriterLock, WriteGuard};
pub use spinwait::{SpinState, SpinWait};
pub use wait::{WaitError, WaitResult};
