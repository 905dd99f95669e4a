/*!
 * Error Types
 * Centralized error handling with thiserror, miette, and serde support
 */

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Runtime faults raised synchronously by policy, lock and scheduler operations
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum ConcurrencyError {
    #[error("Invalid scheduler policy key")]
    #[diagnostic(
        code(policy::invalid_key),
        help("MinConcurrency and MaxConcurrency are set through set_concurrency_limits.")
    )]
    InvalidPolicyKey,

    #[error("Invalid value for policy key {key}")]
    #[diagnostic(
        code(policy::invalid_value),
        help("Check the accepted range of the key. Values are never clamped.")
    )]
    InvalidPolicyValue { key: String },

    #[error("Invalid thread specification: min concurrency exceeds max concurrency")]
    #[diagnostic(
        code(policy::invalid_thread_specification),
        help("MinConcurrency must be less than or equal to MaxConcurrency.")
    )]
    InvalidThreadSpecification,

    #[error("Improper lock usage: {reason}")]
    #[diagnostic(
        code(sync::improper_lock),
        help("This lock is not reentrant. Release it before acquiring it again.")
    )]
    ImproperLock { reason: String },

    #[error("Scheduler is already attached to this context")]
    #[diagnostic(
        code(scheduler::improper_attach),
        help("Attaching the current scheduler would create a trivial cycle.")
    )]
    ImproperSchedulerAttach,

    #[error("Scheduler cannot be detached")]
    #[diagnostic(
        code(scheduler::improper_detach),
        help("Only a scheduler attached with attach() or CurrentScheduler::create() can be detached.")
    )]
    ImproperSchedulerDetach,

    #[error("Resource allocation failed: {reason}")]
    #[diagnostic(
        code(runtime::resource_allocation),
        help("Thread-local state is unavailable, usually because the thread is exiting.")
    )]
    ResourceAllocation { reason: String },

    #[error("Operation not supported: {operation}")]
    #[diagnostic(
        code(scheduler::unsupported),
        help("Task execution is provided by an external engine, not by this runtime.")
    )]
    Unsupported { operation: String },
}

impl ConcurrencyError {
    pub(crate) fn improper_lock(reason: &str) -> Self {
        Self::ImproperLock {
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid_value(key: impl std::fmt::Display) -> Self {
        Self::InvalidPolicyValue {
            key: key.to_string(),
        }
    }

    pub(crate) fn unsupported(operation: &str) -> Self {
        Self::Unsupported {
            operation: operation.to_string(),
        }
    }
}

/// Result type for runtime operations
pub type ConcurrencyResult<T> = Result<T, ConcurrencyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_serialization() {
        let err = ConcurrencyError::invalid_value("MaxConcurrency");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("invalid_policy_value"));
        let back: ConcurrencyError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn test_error_display() {
        let err = ConcurrencyError::improper_lock("already locked");
        assert_eq!(err.to_string(), "Improper lock usage: already locked");
    }
}
