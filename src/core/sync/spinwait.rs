/*!
 * Adaptive Spin-Wait
 *
 * Backoff state machine used by every blocking primitive before it parks:
 * spin for a budget, optionally yield once to the OS, then report "done".
 * The budget comes from `RuntimeConfig` (0 on a single processor).
 */

use crate::core::config::RuntimeConfig;
use std::hint;
use std::thread;

/// Phase of a spin-wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpinState {
    /// Budget not yet loaded
    Init,
    /// Busy-spinning
    Spin,
    /// One yield to the OS left
    Yield,
    /// Budget exhausted; the next call resets
    Done,
}

/// Adaptive backoff helper
///
/// `spin_once` returns `true` while the caller should keep retrying and
/// `false` once the budget is exhausted, at which point the state resets.
///
/// # Example
///
/// ```
/// use concrt::core::sync::SpinWait;
/// use std::sync::atomic::{AtomicBool, Ordering};
///
/// let ready = AtomicBool::new(true);
/// let mut spin = SpinWait::new();
/// while !ready.load(Ordering::Acquire) {
///     if !spin.spin_once() {
///         break;
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub struct SpinWait {
    spin: u32,
    state: SpinState,
    yields: bool,
    yield_fn: fn(),
}

impl SpinWait {
    /// Spin then yield once to the OS
    pub fn new() -> Self {
        Self::with_yield(thread::yield_now)
    }

    /// Spin then yield through a custom hook
    pub fn with_yield(yield_fn: fn()) -> Self {
        Self {
            spin: 0,
            state: SpinState::Init,
            yields: true,
            yield_fn,
        }
    }

    /// Pure spin: never relinquishes the processor
    pub fn without_yield() -> Self {
        Self {
            yields: false,
            ..Self::new()
        }
    }

    /// Reload the budget from the process-wide spin count
    pub fn reset(&mut self) {
        self.set_spin_count(RuntimeConfig::global().spin_count);
    }

    /// Load an explicit budget
    pub fn set_spin_count(&mut self, count: u32) {
        self.spin = count;
        self.state = if count > 0 {
            SpinState::Spin
        } else {
            self.after_spinning()
        };
    }

    #[inline]
    fn after_spinning(&self) -> SpinState {
        if self.yields {
            SpinState::Yield
        } else {
            SpinState::Done
        }
    }

    /// Current phase
    #[inline]
    pub fn state(&self) -> SpinState {
        self.state
    }

    /// Spins left in the current budget
    #[inline]
    pub fn spins_remaining(&self) -> u32 {
        self.spin
    }

    /// Advance one step; `false` means the budget is spent
    pub fn spin_once(&mut self) -> bool {
        if self.state == SpinState::Init {
            self.reset();
        }

        match self.state {
            SpinState::Init | SpinState::Spin => {
                self.spin = self.spin.saturating_sub(1);
                hint::spin_loop();
                if self.spin == 0 {
                    self.state = self.after_spinning();
                }
                true
            }
            SpinState::Yield => {
                self.state = SpinState::Done;
                (self.yield_fn)();
                true
            }
            SpinState::Done => {
                self.reset();
                false
            }
        }
    }
}

impl Default for SpinWait {
    fn default() -> Self {
        Self::new()
    }
}

/// Spin until `poll` produces a value
///
/// Used where another thread is mid-way through publishing a link and is
/// guaranteed to finish shortly.
#[inline]
pub(crate) fn spin_until<T>(mut poll: impl FnMut() -> Option<T>) -> T {
    let mut spin = SpinWait::new();
    loop {
        if let Some(value) = poll() {
            return value;
        }
        spin.spin_once();
    }
}
