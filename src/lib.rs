/*!
 * Concurrency Runtime Library
 * User-mode synchronization primitives, allocator cache and scheduler contexts
 */

pub mod core;
pub mod memory;
pub mod monitoring;
pub mod scheduler;

// Re-exports
pub use crate::core::errors::*;
pub use crate::core::sync::{
    ConditionVariable, CriticalSection, CriticalSectionGuard, Event, ReadGuard, ReaderWriterLock,
    ReentrantGuard, ReentrantLock, Signaled, SpinWait, WaitError, WaitResult, WriteGuard,
};
pub use crate::core::{processor_count, RuntimeConfig};
pub use memory::{alloc, free, AllocatorCache};
pub use monitoring::init_tracing;
pub use scheduler::{
    create_scheduler, CurrentScheduler, Location, PolicyKey, Scheduler, SchedulerPolicy,
    ThreadScheduler,
};
