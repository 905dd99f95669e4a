/*!
 * Runtime Limits and Constants
 *
 * Centralized location for the thresholds and magic numbers used by the
 * synchronization and allocation layers.
 *
 * ## Conventions
 * - Values are grouped by domain (spin, allocator, policy)
 * - Performance-critical constants are marked with [PERF]
 */

// =============================================================================
// SPIN LIMITS
// =============================================================================

/// Spin budget on multi-processor hosts before yielding to the OS
/// [PERF] A single-processor host never spins, the holder cannot run meanwhile
pub const DEFAULT_SPIN_COUNT: u32 = 4000;

// =============================================================================
// ALLOCATOR CACHE LIMITS
// =============================================================================

/// Number of power-of-two size classes per context cache
pub const SIZE_CLASS_COUNT: usize = 8;

/// log2 of the smallest size class (16 bytes)
pub const MIN_SIZE_CLASS_SHIFT: u32 = 4;

/// Largest block served from a context cache (2048 bytes, header included)
pub const MAX_CACHED_BLOCK: usize = 1 << (MIN_SIZE_CLASS_SHIFT as usize + SIZE_CLASS_COUNT - 1);

/// Maximum free blocks retained per size class
/// Beyond this, freed blocks go back to the general heap
pub const MAX_CACHE_DEPTH: usize = 20;

/// Alignment of every block handed out by the allocator cache
pub const BLOCK_ALIGN: usize = 16;

// =============================================================================
// SCHEDULER POLICY DEFAULTS
// =============================================================================

/// Sentinel for "as many execution resources as the host has"
pub const MAX_EXECUTION_RESOURCES: u32 = u32::MAX;

/// Default number of contexts cached per virtual processor
pub const DEFAULT_LOCAL_CONTEXT_CACHE_SIZE: u32 = 8;

/// Lowest and highest regular thread priorities accepted by a policy
pub const THREAD_PRIORITY_LOWEST: i32 = -2;
pub const THREAD_PRIORITY_HIGHEST: i32 = 2;
pub const THREAD_PRIORITY_NORMAL: i32 = 0;
pub const THREAD_PRIORITY_IDLE: i32 = -15;
pub const THREAD_PRIORITY_TIME_CRITICAL: i32 = 15;

/// Priority value meaning "inherit the creating thread's priority"
pub const INHERIT_THREAD_PRIORITY: i32 = 0x0000_F000;

/// Regular priority range accepted by a policy (inclusive)
pub const POLICY_PRIORITY_MIN: i32 = -7;
pub const POLICY_PRIORITY_MAX: i32 = 6;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_class_bounds() {
        assert_eq!(1usize << MIN_SIZE_CLASS_SHIFT, 16);
        assert_eq!(MAX_CACHED_BLOCK, 2048);
        assert!(BLOCK_ALIGN.is_power_of_two());
    }

    #[test]
    fn test_priority_range_contains_named_levels() {
        assert!(POLICY_PRIORITY_MIN <= THREAD_PRIORITY_LOWEST);
        assert!(THREAD_PRIORITY_HIGHEST <= POLICY_PRIORITY_MAX);
        assert!((POLICY_PRIORITY_MIN..=POLICY_PRIORITY_MAX).contains(&THREAD_PRIORITY_NORMAL));
    }
}
