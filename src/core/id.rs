/*!
 * ID Generation
 * Type-safe identifiers for contexts, schedulers and lock-owning threads
 */

use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

// ============================================================================
// Type-Safe ID Wrappers
// ============================================================================

/// Execution context ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(pub u32);

/// Scheduler ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SchedulerId(pub u32);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SchedulerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Sequential Generator
// ============================================================================

/// Process-wide monotonically increasing counter, usable in statics
#[repr(C, align(64))]
pub struct SequentialGenerator {
    counter: AtomicU32,
}

impl SequentialGenerator {
    /// Create a generator whose first ID is `start`
    pub const fn new(start: u32) -> Self {
        Self {
            counter: AtomicU32::new(start),
        }
    }

    /// Next ID
    #[inline]
    pub fn next(&self) -> u32 {
        self.counter.fetch_add(1, Ordering::Relaxed)
    }

    /// Next ID to be handed out (for debugging)
    #[inline]
    pub fn current(&self) -> u32 {
        self.counter.load(Ordering::Relaxed)
    }
}

// ============================================================================
// Thread Tokens
// ============================================================================

/// Token value that never identifies a thread
pub const NO_THREAD: u64 = 0;

static THREAD_TOKENS: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_TOKEN: Cell<u64> = const { Cell::new(NO_THREAD) };
}

/// Nonzero token unique to the calling thread, used to record lock holders
#[inline]
pub fn current_thread_token() -> u64 {
    THREAD_TOKEN
        .try_with(|token| {
            let mut value = token.get();
            if value == NO_THREAD {
                value = THREAD_TOKENS.fetch_add(1, Ordering::Relaxed);
                token.set(value);
            }
            value
        })
        // TLS already torn down: hand out a fresh token, it can never match a holder
        .unwrap_or_else(|_| THREAD_TOKENS.fetch_add(1, Ordering::Relaxed))
}
