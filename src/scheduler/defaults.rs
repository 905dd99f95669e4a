/*!
 * Default Scheduler Registry
 *
 * Process-wide default policy and the lazily created default scheduler,
 * guarded by a single lock. The policy is read when the default scheduler
 * is first needed; changing it afterwards only affects a scheduler created
 * after `teardown`.
 */

use super::policy::SchedulerPolicy;
use super::thread_scheduler::ThreadScheduler;
use super::traits::Scheduler;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

struct DefaultState {
    policy: Option<SchedulerPolicy>,
    scheduler: Option<Arc<ThreadScheduler>>,
}

static DEFAULTS: Mutex<DefaultState> = Mutex::new(DefaultState {
    policy: None,
    scheduler: None,
});

/// Policy used for the default scheduler
pub fn set_default_scheduler_policy(policy: &SchedulerPolicy) {
    DEFAULTS.lock().policy = Some(policy.clone());
    debug!("Default scheduler policy set");
}

/// Restore factory defaults for the default scheduler policy
pub fn reset_default_scheduler_policy() {
    DEFAULTS.lock().policy = Some(SchedulerPolicy::default());
    debug!("Default scheduler policy reset");
}

/// Current default policy
pub fn default_scheduler_policy() -> SchedulerPolicy {
    DEFAULTS.lock().policy.clone().unwrap_or_default()
}

/// The default scheduler, created on first use
pub fn default_scheduler() -> Arc<ThreadScheduler> {
    let mut state = DEFAULTS.lock();
    if let Some(scheduler) = &state.scheduler {
        return Arc::clone(scheduler);
    }

    let policy = state.policy.get_or_insert_with(SchedulerPolicy::default);
    let scheduler = ThreadScheduler::new(policy);
    debug!(scheduler_id = %scheduler.id(), "Default scheduler created");
    state.scheduler = Some(Arc::clone(&scheduler));
    scheduler
}

/// Release the process reference to the default scheduler
///
/// Contexts still attached keep it alive; the next `default_scheduler`
/// call creates a fresh one.
pub fn teardown() {
    let released = DEFAULTS.lock().scheduler.take();
    if let Some(scheduler) = released {
        debug!(
            scheduler_id = %scheduler.id(),
            references = Arc::strong_count(&scheduler),
            "Default scheduler released"
        );
    }
}

