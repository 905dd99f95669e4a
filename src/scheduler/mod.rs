/*!
 * Scheduler Module
 * Scheduler policy, scheduler and context lifecycle
 */

pub mod context;
pub mod current;
pub mod defaults;
pub mod policy;
pub mod thread_scheduler;
pub mod traits;
pub mod types;

// Re-export public API
pub use context::{with_current_context, ExternalContext};
pub use current::{create_scheduler, CurrentScheduler};
pub use defaults::{
    default_scheduler, default_scheduler_policy, reset_default_scheduler_policy,
    set_default_scheduler_policy,
};
pub use policy::{PolicyKey, SchedulerPolicy};
pub use thread_scheduler::ThreadScheduler;
pub use traits::{Context, Scheduler};
pub use types::{Location, ScheduleGroup, Task};
