/*!
 * Scheduler Traits
 * Interface definitions for schedulers and execution contexts
 */

use super::policy::SchedulerPolicy;
use super::types::{Location, ScheduleGroup, Task};
use crate::core::errors::ConcurrencyResult;
use crate::core::id::{ContextId, SchedulerId};
use crate::core::sync::Event;
use std::fmt;
use std::sync::Arc;

/// Policy-configured owner of worker capacity
///
/// Shared through `Arc`; the last reference dropped tears the scheduler
/// down and sets every registered shutdown event.
pub trait Scheduler: Send + Sync + fmt::Debug {
    /// Process-unique scheduler ID
    fn id(&self) -> SchedulerId;

    /// Virtual processors granted by the policy on this machine
    fn virtual_processor_count(&self) -> u32;

    /// Copy of the policy the scheduler was created with
    fn policy(&self) -> SchedulerPolicy;

    /// Set `event` when the scheduler is destroyed
    fn register_shutdown_event(&self, event: Arc<Event>);

    /// Make this the calling thread's current scheduler
    fn attach(self: Arc<Self>) -> ConcurrencyResult<()>;

    /// Create a schedule group, optionally biased to `placement`
    fn create_schedule_group(&self, placement: Option<&Location>)
        -> ConcurrencyResult<ScheduleGroup>;

    /// Queue `task` for execution, optionally biased to `placement`
    fn schedule_task(&self, task: Task, placement: Option<&Location>) -> ConcurrencyResult<()>;

    /// Whether `placement` names resources this scheduler can run on
    fn is_available_location(&self, placement: &Location) -> bool;
}

/// Thread-bound execution handle
pub trait Context: fmt::Debug {
    /// Process-unique context ID
    fn id(&self) -> ContextId;

    /// Virtual processor the context runs on, if any
    fn virtual_processor_id(&self) -> Option<u32>;

    /// Schedule group the context belongs to, if any
    fn schedule_group_id(&self) -> Option<u32>;

    /// Resume a context blocked cooperatively
    fn unblock(&self);

    /// Whether the context is blocked on a synchronization primitive
    fn is_synchronously_blocked(&self) -> bool;
}
