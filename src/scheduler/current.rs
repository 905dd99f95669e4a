/*!
 * Current Scheduler
 * Operations on the calling thread's current scheduler
 */

use super::context;
use super::policy::SchedulerPolicy;
use super::thread_scheduler::ThreadScheduler;
use super::traits::Scheduler;
use super::types::{Location, ScheduleGroup, Task};
use crate::core::errors::ConcurrencyResult;
use crate::core::id::SchedulerId;
use crate::core::sync::Event;
use std::sync::Arc;

/// Create a scheduler from `policy`
///
/// The caller holds the only reference.
pub fn create_scheduler(policy: &SchedulerPolicy) -> Arc<dyn Scheduler> {
    ThreadScheduler::new(policy)
}

/// Static interface to the calling thread's current scheduler
///
/// Queries that only report (`id`, `virtual_processor_count`,
/// `is_available_location`) never create a context; everything else binds
/// the thread to the default scheduler on first use.
#[derive(Debug, Clone, Copy)]
pub struct CurrentScheduler;

impl CurrentScheduler {
    /// Create a scheduler from `policy` and attach it to this thread
    pub fn create(policy: &SchedulerPolicy) -> ConcurrencyResult<()> {
        create_scheduler(policy).attach()
    }

    /// Restore the scheduler that was current before the last attach
    pub fn detach() -> ConcurrencyResult<()> {
        context::detach()
    }

    /// The current scheduler
    pub fn get() -> ConcurrencyResult<Arc<dyn Scheduler>> {
        context::current_scheduler()
    }

    pub fn id() -> Option<SchedulerId> {
        context::try_current_scheduler().map(|scheduler| scheduler.id())
    }

    pub fn virtual_processor_count() -> Option<u32> {
        context::try_current_scheduler().map(|scheduler| scheduler.virtual_processor_count())
    }

    pub fn policy() -> ConcurrencyResult<SchedulerPolicy> {
        Ok(Self::get()?.policy())
    }

    pub fn is_available_location(placement: &Location) -> bool {
        context::try_current_scheduler()
            .is_some_and(|scheduler| scheduler.is_available_location(placement))
    }

    pub fn register_shutdown_event(event: Arc<Event>) -> ConcurrencyResult<()> {
        Self::get()?.register_shutdown_event(event);
        Ok(())
    }

    pub fn schedule_task(task: Task, placement: Option<&Location>) -> ConcurrencyResult<()> {
        Self::get()?.schedule_task(task, placement)
    }

    pub fn create_schedule_group(placement: Option<&Location>) -> ConcurrencyResult<ScheduleGroup> {
        Self::get()?.create_schedule_group(placement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::errors::ConcurrencyError;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_reporting_queries_do_not_bind() {
        thread::spawn(|| {
            assert_eq!(CurrentScheduler::id(), None);
            assert_eq!(CurrentScheduler::virtual_processor_count(), None);
            assert!(!CurrentScheduler::is_available_location(&Location::System));
            assert_eq!(context::current_id(), None);

            let id = CurrentScheduler::get().unwrap().id();
            assert_eq!(CurrentScheduler::id(), Some(id));
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_create_attaches_and_detach_fires_shutdown() {
        thread::spawn(|| {
            let mut policy = SchedulerPolicy::new();
            policy.set_concurrency_limits(1, 1).unwrap();
            CurrentScheduler::create(&policy).unwrap();
            assert_eq!(CurrentScheduler::virtual_processor_count(), Some(1));
            assert_eq!(CurrentScheduler::policy().unwrap().max_concurrency(), 1);

            let shutdown = Arc::new(Event::new());
            CurrentScheduler::register_shutdown_event(Arc::clone(&shutdown)).unwrap();
            assert!(!shutdown.is_set());

            // The context held the only reference
            CurrentScheduler::detach().unwrap();
            assert_eq!(shutdown.wait(Some(Duration::ZERO)), Ok(()));
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_placeholders_through_current() {
        thread::spawn(|| {
            assert!(matches!(
                CurrentScheduler::schedule_task(Box::new(|| {}), None),
                Err(ConcurrencyError::Unsupported { .. })
            ));
            assert!(CurrentScheduler::create_schedule_group(None).is_err());
        })
        .join()
        .unwrap();
    }
}
