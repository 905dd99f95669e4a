/*!
 * Core Module
 * Errors, identifiers, configuration, topology and synchronization primitives
 */

pub mod config;
pub mod errors;
pub mod id;
pub mod limits;
pub mod sync;
pub mod topology;

// Re-export for convenience
pub use config::RuntimeConfig;
pub use errors::*;
pub use id::{ContextId, SchedulerId};
pub use topology::processor_count;
