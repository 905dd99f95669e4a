/*!
 * Thread Scheduler
 * The scheduler implementation backed by OS threads
 *
 * Worker dispatch belongs to an external engine: the scheduler records
 * its policy, sizes its virtual processors and fans out shutdown events.
 */

use super::context;
use super::policy::SchedulerPolicy;
use super::traits::Scheduler;
use super::types::{Location, ScheduleGroup, Task};
use crate::core::errors::{ConcurrencyError, ConcurrencyResult};
use crate::core::id::{SchedulerId, SequentialGenerator};
use crate::core::sync::Event;
use crate::core::topology::processor_count;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, warn};

static SCHEDULER_IDS: SequentialGenerator = SequentialGenerator::new(1);

/// OS-thread scheduler
pub struct ThreadScheduler {
    id: SchedulerId,
    virtual_processors: u32,
    policy: SchedulerPolicy,
    shutdown_events: Mutex<Vec<Arc<Event>>>,
}

impl ThreadScheduler {
    /// Scheduler sized against this machine's processors
    pub fn new(policy: &SchedulerPolicy) -> Arc<Self> {
        Self::with_processor_count(policy, processor_count())
    }

    /// Scheduler sized against `processors` processors
    pub fn with_processor_count(policy: &SchedulerPolicy, processors: u32) -> Arc<Self> {
        let id = SchedulerId(SCHEDULER_IDS.next());
        let virtual_processors = policy.max_concurrency().min(processors);
        debug!(
            scheduler_id = %id,
            virtual_processors,
            processors,
            "Scheduler created"
        );

        Arc::new(Self {
            id,
            virtual_processors,
            policy: policy.clone(),
            shutdown_events: Mutex::new(Vec::new()),
        })
    }

    /// Shutdown events registered so far
    pub fn shutdown_event_count(&self) -> usize {
        self.shutdown_events.lock().len()
    }
}

impl Scheduler for ThreadScheduler {
    #[inline]
    fn id(&self) -> SchedulerId {
        self.id
    }

    #[inline]
    fn virtual_processor_count(&self) -> u32 {
        self.virtual_processors
    }

    fn policy(&self) -> SchedulerPolicy {
        self.policy.clone()
    }

    fn register_shutdown_event(&self, event: Arc<Event>) {
        self.shutdown_events.lock().push(event);
    }

    fn attach(self: Arc<Self>) -> ConcurrencyResult<()> {
        context::attach(self)
    }

    fn create_schedule_group(
        &self,
        placement: Option<&Location>,
    ) -> ConcurrencyResult<ScheduleGroup> {
        warn!(scheduler_id = %self.id, ?placement, "Schedule groups are not implemented");
        Err(ConcurrencyError::unsupported("create_schedule_group"))
    }

    fn schedule_task(&self, _task: Task, placement: Option<&Location>) -> ConcurrencyResult<()> {
        warn!(scheduler_id = %self.id, ?placement, "Task scheduling is not implemented");
        Err(ConcurrencyError::unsupported("schedule_task"))
    }

    fn is_available_location(&self, placement: &Location) -> bool {
        warn!(scheduler_id = %self.id, %placement, "Location queries are not implemented");
        false
    }
}

impl Drop for ThreadScheduler {
    fn drop(&mut self) {
        let events = std::mem::take(self.shutdown_events.get_mut());
        debug!(
            scheduler_id = %self.id,
            shutdown_events = events.len(),
            "Scheduler destroyed"
        );
        for event in events {
            event.set();
        }
    }
}

impl std::fmt::Debug for ThreadScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadScheduler")
            .field("id", &self.id)
            .field("virtual_processors", &self.virtual_processors)
            .finish_non_exhaustive()
    }
}
