/*!
 * Processor Topology
 *
 * Host processor count, detected once and memoized for the process lifetime.
 * Spin budgets and scheduler virtual-processor counts are derived from it.
 */

use std::sync::OnceLock;

static PROCESSOR_COUNT: OnceLock<u32> = OnceLock::new();

/// Number of processors available to this process
pub fn processor_count() -> u32 {
    *PROCESSOR_COUNT.get_or_init(|| {
        let count = std::thread::available_parallelism()
            .map(|n| u32::try_from(n.get()).unwrap_or(u32::MAX))
            .unwrap_or_else(|err| {
                // Fallback: assume a single processor, which disables spinning
                tracing::warn!(%err, "Failed to detect processor count, defaulting to 1");
                1
            });

        tracing::debug!(processors = count, "Processor topology detected");
        count
    })
}

/// Whether the host has more than one processor
#[inline]
pub fn is_multiprocessor() -> bool {
    processor_count() > 1
}
