/*!
 * Monitoring
 * Tracing subscriber initialization
 */

mod tracer;

pub use tracer::{init_tracing, init_tracing_with};
