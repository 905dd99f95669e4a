/*!
 * Wait Results
 *
 * Shared result and timeout handling for every blocking primitive.
 * A timeout of `None` waits forever, `Some(Duration::ZERO)` polls.
 */

use std::time::{Duration, Instant};
use thiserror::Error;

/// Result type for wait operations
pub type WaitResult<T> = Result<T, WaitError>;

/// Wait operation errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    #[error("Wait operation timed out")]
    Timeout,
}

/// Convert a relative timeout into an absolute deadline
///
/// Timeouts too large to represent are treated as infinite.
#[inline]
pub(crate) fn deadline_after(timeout: Option<Duration>) -> Option<Instant> {
    timeout.and_then(|d| Instant::now().checked_add(d))
}

/// Whether a timeout asks for a non-blocking poll
#[inline]
pub(crate) fn is_poll(timeout: Option<Duration>) -> bool {
    timeout == Some(Duration::ZERO)
}
