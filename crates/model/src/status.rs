//! Flow and path statuses.

use serde::{Deserialize, Serialize};

/// Status of a flow.
///
/// ```text
///                 ┌──────────► Up
/// InProgress ─────┼──────────► Degraded   (only protected paths failed)
///                 └──────────► Down
/// ```
/// `InProgress` marks a flow owned by a running saga.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowStatus {
    Up,
    Down,
    InProgress,
    Degraded,
}

impl FlowStatus {
    /// Derives a status from the health of the primary and protected paths.
    ///
    /// Up when every path is active, Degraded when only protected paths are
    /// unhealthy, Down otherwise (including a flow without primary paths).
    pub fn derive(primary: &[PathStatus], protected: &[PathStatus]) -> Self {
        if primary.is_empty() || primary.iter().any(|s| *s != PathStatus::Active) {
            return FlowStatus::Down;
        }
        if protected.iter().all(|s| *s == PathStatus::Active) {
            FlowStatus::Up
        } else {
            FlowStatus::Degraded
        }
    }

    /// Aggregates sub-flow statuses into a y-flow status.
    pub fn aggregate(statuses: &[FlowStatus]) -> Self {
        if statuses.is_empty() {
            return FlowStatus::Down;
        }
        if statuses.contains(&FlowStatus::InProgress) {
            return FlowStatus::InProgress;
        }
        if statuses.iter().all(|s| *s == FlowStatus::Up) {
            FlowStatus::Up
        } else if statuses.iter().all(|s| *s == FlowStatus::Down) {
            FlowStatus::Down
        } else {
            FlowStatus::Degraded
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStatus::Up => "UP",
            FlowStatus::Down => "DOWN",
            FlowStatus::InProgress => "IN_PROGRESS",
            FlowStatus::Degraded => "DEGRADED",
        }
    }
}

impl std::fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PathStatus {
    Active,
    InProgress,
    Inactive,
}

impl PathStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PathStatus::Active => "ACTIVE",
            PathStatus::InProgress => "IN_PROGRESS",
            PathStatus::Inactive => "INACTIVE",
        }
    }
}

impl std::fmt::Display for PathStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use PathStatus::*;

    #[test]
    fn all_active_is_up() {
        assert_eq!(FlowStatus::derive(&[Active, Active], &[]), FlowStatus::Up);
        assert_eq!(
            FlowStatus::derive(&[Active, Active], &[Active, Active]),
            FlowStatus::Up
        );
    }

    #[test]
    fn protected_failure_only_degrades() {
        assert_eq!(
            FlowStatus::derive(&[Active, Active], &[Active, Inactive]),
            FlowStatus::Degraded
        );
    }

    #[test]
    fn primary_failure_is_down() {
        assert_eq!(
            FlowStatus::derive(&[Active, InProgress], &[Active, Active]),
            FlowStatus::Down
        );
        assert_eq!(FlowStatus::derive(&[], &[]), FlowStatus::Down);
    }

    #[test]
    fn aggregate_of_sub_flows() {
        use FlowStatus::*;
        assert_eq!(FlowStatus::aggregate(&[Up, Up]), Up);
        assert_eq!(FlowStatus::aggregate(&[Up, Down]), Degraded);
        assert_eq!(FlowStatus::aggregate(&[Down, Down]), Down);
        assert_eq!(FlowStatus::aggregate(&[Up, InProgress]), InProgress);
        assert_eq!(FlowStatus::aggregate(&[]), Down);
    }
}
