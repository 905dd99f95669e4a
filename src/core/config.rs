/*!
 * Runtime Configuration
 *
 * Environment-driven settings read once per process:
 * - `CONCRT_SPIN_COUNT`: overrides the SpinWait budget
 * - `CONCRT_TRACE_JSON`: selects JSON tracing output (`1` or `true`)
 */

use super::limits::DEFAULT_SPIN_COUNT;
use super::topology::is_multiprocessor;
use std::sync::OnceLock;

static RUNTIME_CONFIG: OnceLock<RuntimeConfig> = OnceLock::new();

/// Process-wide runtime configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Spins performed by `SpinWait` before yielding
    pub spin_count: u32,
    /// Emit JSON-formatted traces
    pub trace_json: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            spin_count: Self::host_spin_count(),
            trace_json: false,
        }
    }
}

impl RuntimeConfig {
    /// Configuration for hosts where spinning is never worthwhile
    pub const fn no_spin() -> Self {
        Self {
            spin_count: 0,
            trace_json: false,
        }
    }

    /// Build from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup("CONCRT_SPIN_COUNT") {
            match raw.trim().parse::<u32>() {
                Ok(count) => config.spin_count = count,
                Err(err) => {
                    tracing::warn!(value = %raw, %err, "Ignoring invalid CONCRT_SPIN_COUNT");
                }
            }
        }

        if let Some(raw) = lookup("CONCRT_TRACE_JSON") {
            config.trace_json = raw == "1" || raw.eq_ignore_ascii_case("true");
        }

        config
    }

    /// Global configuration, read from the environment on first access
    pub fn global() -> &'static Self {
        RUNTIME_CONFIG.get_or_init(Self::from_env)
    }

    fn host_spin_count() -> u32 {
        if is_multiprocessor() {
            DEFAULT_SPIN_COUNT
        } else {
            0
        }
    }
}
