/*!
 * Scheduler Policy
 * Validated key/value configuration a scheduler is created from
 */

use crate::core::errors::{ConcurrencyError, ConcurrencyResult};
use crate::core::limits::{
    DEFAULT_LOCAL_CONTEXT_CACHE_SIZE, INHERIT_THREAD_PRIORITY, MAX_EXECUTION_RESOURCES,
    POLICY_PRIORITY_MAX, POLICY_PRIORITY_MIN, THREAD_PRIORITY_IDLE, THREAD_PRIORITY_NORMAL,
    THREAD_PRIORITY_TIME_CRITICAL,
};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Number of policy keys
pub const POLICY_KEY_COUNT: usize = 10;

/// Policy element
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PolicyKey {
    SchedulerKind = 0,
    MaxConcurrency,
    MinConcurrency,
    TargetOversubscriptionFactor,
    LocalContextCacheSize,
    ContextStackSize,
    ContextPriority,
    SchedulingProtocol,
    DynamicProgressFeedback,
    WinRTInitialization,
}

impl PolicyKey {
    /// Every key, in index order
    pub const ALL: [PolicyKey; POLICY_KEY_COUNT] = [
        Self::SchedulerKind,
        Self::MaxConcurrency,
        Self::MinConcurrency,
        Self::TargetOversubscriptionFactor,
        Self::LocalContextCacheSize,
        Self::ContextStackSize,
        Self::ContextPriority,
        Self::SchedulingProtocol,
        Self::DynamicProgressFeedback,
        Self::WinRTInitialization,
    ];

    #[inline(always)]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[inline(always)]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SchedulerKind => "SchedulerKind",
            Self::MaxConcurrency => "MaxConcurrency",
            Self::MinConcurrency => "MinConcurrency",
            Self::TargetOversubscriptionFactor => "TargetOversubscriptionFactor",
            Self::LocalContextCacheSize => "LocalContextCacheSize",
            Self::ContextStackSize => "ContextStackSize",
            Self::ContextPriority => "ContextPriority",
            Self::SchedulingProtocol => "SchedulingProtocol",
            Self::DynamicProgressFeedback => "DynamicProgressFeedback",
            Self::WinRTInitialization => "WinRTInitialization",
        }
    }

    /// Parse from the key name
    pub fn from_name(name: &str) -> ConcurrencyResult<Self> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == name)
            .ok_or(ConcurrencyError::InvalidPolicyKey)
    }
}

impl TryFrom<u32> for PolicyKey {
    type Error = ConcurrencyError;

    fn try_from(raw: u32) -> Result<Self, Self::Error> {
        Self::ALL
            .get(raw as usize)
            .copied()
            .ok_or(ConcurrencyError::InvalidPolicyKey)
    }
}

impl fmt::Display for PolicyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of scheduler a policy creates
pub const THREAD_SCHEDULER_KIND: u32 = 0;

/// Value of `SchedulingProtocol`
pub const ENHANCE_SCHEDULE_GROUP_LOCALITY: u32 = 0;
pub const ENHANCE_FORWARD_PROGRESS: u32 = 1;

/// Value of `DynamicProgressFeedback`
pub const PROGRESS_FEEDBACK_DISABLED: u32 = 0;
pub const PROGRESS_FEEDBACK_ENABLED: u32 = 1;

/// Whether `value` is an accepted `ContextPriority`
fn is_valid_priority(value: u32) -> bool {
    let priority = value as i32;
    (POLICY_PRIORITY_MIN..=POLICY_PRIORITY_MAX).contains(&priority)
        || priority == THREAD_PRIORITY_IDLE
        || priority == THREAD_PRIORITY_TIME_CRITICAL
        || priority == INHERIT_THREAD_PRIORITY
}

/// Scheduler policy: one unsigned value per `PolicyKey`
///
/// Cloning copies the whole table; policies never share state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerPolicy {
    values: [u32; POLICY_KEY_COUNT],
}

impl Default for SchedulerPolicy {
    fn default() -> Self {
        let mut values = [0; POLICY_KEY_COUNT];
        values[PolicyKey::SchedulerKind.index()] = THREAD_SCHEDULER_KIND;
        values[PolicyKey::MaxConcurrency.index()] = MAX_EXECUTION_RESOURCES;
        values[PolicyKey::MinConcurrency.index()] = 1;
        values[PolicyKey::TargetOversubscriptionFactor.index()] = 1;
        values[PolicyKey::LocalContextCacheSize.index()] = DEFAULT_LOCAL_CONTEXT_CACHE_SIZE;
        values[PolicyKey::ContextStackSize.index()] = 0;
        values[PolicyKey::ContextPriority.index()] = THREAD_PRIORITY_NORMAL as u32;
        values[PolicyKey::SchedulingProtocol.index()] = ENHANCE_SCHEDULE_GROUP_LOCALITY;
        values[PolicyKey::DynamicProgressFeedback.index()] = PROGRESS_FEEDBACK_ENABLED;
        values[PolicyKey::WinRTInitialization.index()] = 0;
        Self { values }
    }
}

impl SchedulerPolicy {
    /// Factory defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `pairs`; concurrency limits are applied last
    pub fn from_pairs<I>(pairs: I) -> ConcurrencyResult<Self>
    where
        I: IntoIterator<Item = (PolicyKey, u32)>,
    {
        let mut policy = Self::default();
        let mut min = policy.min_concurrency();
        let mut max = policy.max_concurrency();

        for (key, value) in pairs {
            match key {
                PolicyKey::MinConcurrency => min = value,
                PolicyKey::MaxConcurrency => max = value,
                _ => {
                    policy.set_value(key, value)?;
                }
            }
        }

        policy.set_concurrency_limits(min, max)?;
        Ok(policy)
    }

    /// Current value of `key`
    #[inline]
    pub fn value(&self, key: PolicyKey) -> u32 {
        self.values[key.index()]
    }

    /// Validate and store `value`, returning the previous one
    ///
    /// Concurrency limits are rejected here; use `set_concurrency_limits`.
    pub fn set_value(&mut self, key: PolicyKey, value: u32) -> ConcurrencyResult<u32> {
        let valid = match key {
            PolicyKey::MinConcurrency | PolicyKey::MaxConcurrency => {
                return Err(ConcurrencyError::InvalidPolicyKey);
            }
            PolicyKey::SchedulerKind => value == THREAD_SCHEDULER_KIND,
            PolicyKey::TargetOversubscriptionFactor => value != 0,
            PolicyKey::ContextPriority => is_valid_priority(value),
            PolicyKey::SchedulingProtocol
            | PolicyKey::DynamicProgressFeedback
            | PolicyKey::WinRTInitialization => value <= 1,
            PolicyKey::LocalContextCacheSize | PolicyKey::ContextStackSize => true,
        };

        if !valid {
            return Err(ConcurrencyError::invalid_value(key));
        }

        let previous = std::mem::replace(&mut self.values[key.index()], value);
        tracing::trace!(%key, previous, value, "Scheduler policy value set");
        Ok(previous)
    }

    /// Set both concurrency bounds at once
    pub fn set_concurrency_limits(&mut self, min: u32, max: u32) -> ConcurrencyResult<()> {
        if min > max {
            return Err(ConcurrencyError::InvalidThreadSpecification);
        }
        if max == 0 {
            return Err(ConcurrencyError::invalid_value(PolicyKey::MaxConcurrency));
        }

        self.values[PolicyKey::MinConcurrency.index()] = min;
        self.values[PolicyKey::MaxConcurrency.index()] = max;
        Ok(())
    }

    #[inline]
    pub fn min_concurrency(&self) -> u32 {
        self.value(PolicyKey::MinConcurrency)
    }

    #[inline]
    pub fn max_concurrency(&self) -> u32 {
        self.value(PolicyKey::MaxConcurrency)
    }

    /// `ContextPriority` as a signed thread priority
    #[inline]
    pub fn context_priority(&self) -> i32 {
        self.value(PolicyKey::ContextPriority) as i32
    }
}

impl Serialize for SchedulerPolicy {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(POLICY_KEY_COUNT))?;
        for key in PolicyKey::ALL {
            map.serialize_entry(key.as_str(), &self.value(key))?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for SchedulerPolicy {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct PolicyVisitor;

        impl<'de> Visitor<'de> for PolicyVisitor {
            type Value = SchedulerPolicy;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of scheduler policy keys to values")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut pairs = Vec::with_capacity(POLICY_KEY_COUNT);
                while let Some((name, value)) = access.next_entry::<String, u32>()? {
                    let key = PolicyKey::from_name(&name).map_err(serde::de::Error::custom)?;
                    pairs.push((key, value));
                }
                SchedulerPolicy::from_pairs(pairs).map_err(serde::de::Error::custom)
            }
        }

        deserializer.deserialize_map(PolicyVisitor)
    }
}
