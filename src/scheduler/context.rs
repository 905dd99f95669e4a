/*!
 * Execution Context
 *
 * Every thread that touches the runtime gets one `ExternalContext`, created
 * lazily and bound to the default scheduler. The context keeps:
 * - A stack of schedulers: the last entry is current, earlier entries are
 *   restored by `detach`
 * - The thread's allocator cache
 *
 * The context is destroyed with its thread, releasing every scheduler it
 * still references and returning cached blocks to the heap.
 */

use super::defaults::default_scheduler;
use super::traits::{Context, Scheduler};
use crate::core::errors::{ConcurrencyError, ConcurrencyResult};
use crate::core::id::{ContextId, SequentialGenerator};
use crate::core::sync::SpinWait;
use crate::memory::AllocatorCache;
use std::cell::{Cell, OnceCell, RefCell};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

static CONTEXT_IDS: SequentialGenerator = SequentialGenerator::new(1);

thread_local! {
    static CURRENT: OnceCell<ExternalContext> = const { OnceCell::new() };
}

fn storage_unavailable() -> ConcurrencyError {
    ConcurrencyError::ResourceAllocation {
        reason: "context storage is unavailable on this thread".to_string(),
    }
}

/// Context of a thread not created by a scheduler
pub struct ExternalContext {
    id: ContextId,
    schedulers: RefCell<Vec<Arc<dyn Scheduler>>>,
    oversubscription: Cell<u32>,
    allocator: RefCell<AllocatorCache>,
}

impl ExternalContext {
    fn new() -> Self {
        let id = ContextId(CONTEXT_IDS.next());
        let scheduler: Arc<dyn Scheduler> = default_scheduler();
        debug!(context_id = %id, scheduler_id = %scheduler.id(), "Context created");

        Self {
            id,
            schedulers: RefCell::new(vec![scheduler]),
            oversubscription: Cell::new(0),
            allocator: RefCell::new(AllocatorCache::new()),
        }
    }

    /// Current scheduler
    pub fn scheduler(&self) -> ConcurrencyResult<Arc<dyn Scheduler>> {
        self.schedulers
            .borrow()
            .last()
            .cloned()
            .ok_or(ConcurrencyError::ImproperSchedulerDetach)
    }

    /// Schedulers attached on top of the one the context started with
    pub fn attached_depth(&self) -> usize {
        self.schedulers.borrow().len().saturating_sub(1)
    }

    /// Nesting depth of `oversubscribe(true)` calls
    pub fn oversubscription_depth(&self) -> u32 {
        self.oversubscription.get()
    }

    fn attach(&self, scheduler: Arc<dyn Scheduler>) -> ConcurrencyResult<()> {
        let mut schedulers = self.schedulers.borrow_mut();
        if schedulers.last().is_some_and(|current| current.id() == scheduler.id()) {
            return Err(ConcurrencyError::ImproperSchedulerAttach);
        }

        trace!(context_id = %self.id, scheduler_id = %scheduler.id(), "Scheduler attached");
        schedulers.push(scheduler);
        Ok(())
    }

    fn detach(&self) -> ConcurrencyResult<()> {
        let mut schedulers = self.schedulers.borrow_mut();
        if schedulers.len() < 2 {
            return Err(ConcurrencyError::ImproperSchedulerDetach);
        }

        let released = schedulers.pop();
        drop(schedulers);
        if let Some(scheduler) = released {
            trace!(context_id = %self.id, scheduler_id = %scheduler.id(), "Scheduler detached");
        }
        Ok(())
    }

    fn oversubscribe(&self, begin: bool) {
        let depth = self.oversubscription.get();
        let depth = if begin {
            depth.saturating_add(1)
        } else if depth == 0 {
            warn!(context_id = %self.id, "Oversubscription ended without a matching begin");
            0
        } else {
            depth - 1
        };
        self.oversubscription.set(depth);
    }
}

impl Context for ExternalContext {
    #[inline]
    fn id(&self) -> ContextId {
        self.id
    }

    fn virtual_processor_id(&self) -> Option<u32> {
        None
    }

    fn schedule_group_id(&self) -> Option<u32> {
        None
    }

    fn unblock(&self) {
        warn!(context_id = %self.id, "External contexts cannot be unblocked");
    }

    fn is_synchronously_blocked(&self) -> bool {
        false
    }
}

impl Drop for ExternalContext {
    fn drop(&mut self) {
        let schedulers = self.schedulers.get_mut().len();
        let cached = self.allocator.get_mut().total_cached();
        debug!(context_id = %self.id, schedulers, cached, "Context destroyed");
    }
}

impl std::fmt::Debug for ExternalContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalContext")
            .field("id", &self.id)
            .field("attached_depth", &self.attached_depth())
            .finish_non_exhaustive()
    }
}

/// Run `f` with the calling thread's context, creating it on first use
pub fn with_current_context<R>(f: impl FnOnce(&ExternalContext) -> R) -> ConcurrencyResult<R> {
    CURRENT
        .try_with(|cell| f(cell.get_or_init(ExternalContext::new)))
        .map_err(|_| storage_unavailable())
}

/// Run `f` with the calling thread's context only if it already exists
pub fn try_with_current_context<R>(f: impl FnOnce(&ExternalContext) -> R) -> Option<R> {
    CURRENT.try_with(|cell| cell.get().map(f)).ok().flatten()
}

/// Run `f` with the calling thread's allocator cache
pub(crate) fn with_allocator<R>(f: impl FnOnce(&mut AllocatorCache) -> R) -> ConcurrencyResult<R> {
    with_current_context(|context| {
        context
            .allocator
            .try_borrow_mut()
            .map(|mut cache| f(&mut *cache))
            .map_err(|_| storage_unavailable())
    })?
}

pub(crate) fn attach(scheduler: Arc<dyn Scheduler>) -> ConcurrencyResult<()> {
    with_current_context(|context| context.attach(scheduler))?
}

pub(crate) fn detach() -> ConcurrencyResult<()> {
    try_with_current_context(ExternalContext::detach)
        .unwrap_or(Err(ConcurrencyError::ImproperSchedulerDetach))
}

pub(crate) fn current_scheduler() -> ConcurrencyResult<Arc<dyn Scheduler>> {
    with_current_context(ExternalContext::scheduler)?
}

pub(crate) fn try_current_scheduler() -> Option<Arc<dyn Scheduler>> {
    try_with_current_context(|context| context.scheduler().ok()).flatten()
}

/// ID of the calling thread's context; `None` if it has none
pub fn current_id() -> Option<ContextId> {
    try_with_current_context(|context| context.id())
}

/// Virtual processor of the calling thread's context
pub fn virtual_processor_id() -> Option<u32> {
    try_with_current_context(|context| context.virtual_processor_id()).flatten()
}

/// Schedule group of the calling thread's context
pub fn schedule_group_id() -> Option<u32> {
    try_with_current_context(|context| context.schedule_group_id()).flatten()
}

/// Give up the rest of the time slice
pub fn yield_now() {
    std::thread::yield_now();
}

/// Brief pause for spin loops, yielding only once spinning is exhausted
pub fn spin_yield() {
    let mut spin = SpinWait::new();
    spin.set_spin_count(1);
    while spin.spin_once() {}
}

/// Block the calling context for at least `duration`
///
/// External contexts have no scheduler to run other work meanwhile, so the
/// thread itself sleeps. A zero duration only yields.
pub fn wait(duration: Duration) {
    if duration.is_zero() {
        yield_now();
        return;
    }
    trace!(context_id = ?current_id(), ?duration, "Context waiting");
    std::thread::sleep(duration);
}

/// Mark the start or end of an oversubscribed region
pub fn oversubscribe(begin: bool) -> ConcurrencyResult<()> {
    with_current_context(|context| context.oversubscribe(begin))
}

/// Whether the task collection running on this context is being canceled
pub fn is_current_task_collection_canceling() -> bool {
    false
}
