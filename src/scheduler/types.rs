/*!
 * Scheduler Types
 * Placement, schedule group and task types shared by scheduler implementations
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// Placement hint for tasks and schedule groups
///
/// # Performance
/// - Copy type, passed by reference through the scheduler surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Location {
    /// Anywhere on the machine
    #[default]
    System,
    /// One NUMA node
    NumaNode(u32),
    /// One execution resource (hardware thread)
    ExecutionResource(u32),
}

impl Location {
    #[inline(always)]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::NumaNode(_) => "numa_node",
            Self::ExecutionResource(_) => "execution_resource",
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => f.write_str(self.as_str()),
            Self::NumaNode(id) | Self::ExecutionResource(id) => {
                write!(f, "{}:{}", self.as_str(), id)
            }
        }
    }
}

/// Group of tasks an engine schedules together
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScheduleGroup {
    pub id: u32,
    pub placement: Location,
}

/// Unit of deferred work handed to `Scheduler::schedule_task`
pub type Task = Box<dyn FnOnce() + Send + 'static>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_location_display() {
        assert_eq!(Location::System.to_string(), "system");
        assert_eq!(Location::NumaNode(1).to_string(), "numa_node:1");
        assert_eq!(Location::ExecutionResource(7).to_string(), "execution_resource:7");
    }

    #[test]
    fn test_location_serde() {
        let json = serde_json::to_string(&Location::NumaNode(3)).unwrap();
        assert_eq!(json, r#"{"kind":"numa_node","id":3}"#);
        let back: Location = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Location::NumaNode(3));
    }
}
