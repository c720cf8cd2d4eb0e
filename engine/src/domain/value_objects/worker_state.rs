//! WorkerState value object
//! Represents the lifecycle state of a single worker replica

use serde::{Deserialize, Serialize};
use std::fmt;

/// The state of a worker in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    /// Worker is not running and no replacement is pending
    #[default]
    Stopped,

    /// Worker process has been spawned, readiness signal not yet observed
    Starting,

    /// Worker signalled readiness and is serving
    Running,

    /// Health monitor flagged the worker; a restart is about to begin
    Unhealthy,

    /// Worker is being replaced due to a code/config change
    Reloading,

    /// Worker is being replaced after a failure or unhealthy signal
    Restarting,

    /// Restart budget exhausted; the worker will not be replaced
    Failed,
}

impl WorkerState {
    /// Validate a state transition.
    pub fn can_transition_to(&self, next: WorkerState) -> bool {
        use WorkerState::*;

        match (self, next) {
            (Stopped, Starting) => true,

            (Starting, Running) => true,
            (Starting, Restarting) => true, // spawn or readiness failure
            (Starting, Stopped) => true,    // stopped while starting
            (Starting, Failed) => true,

            (Running, Unhealthy) => true,
            (Running, Reloading) => true,
            (Running, Restarting) => true, // unexpected exit
            (Running, Stopped) => true,

            (Unhealthy, Restarting) => true,
            (Unhealthy, Stopped) => true,

            (Reloading, Restarting) => true,
            (Reloading, Stopped) => true,

            (Restarting, Starting) => true,
            (Restarting, Failed) => true,
            (Restarting, Stopped) => true,

            // Same state is always allowed
            (a, b) if *a == b => true,

            _ => false,
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerState::Stopped => write!(f, "stopped"),
            WorkerState::Starting => write!(f, "starting"),
            WorkerState::Running => write!(f, "running"),
            WorkerState::Unhealthy => write!(f, "unhealthy"),
            WorkerState::Reloading => write!(f, "reloading"),
            WorkerState::Restarting => write!(f, "restarting"),
            WorkerState::Failed => write!(f, "failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normal_lifecycle() {
        assert!(WorkerState::Stopped.can_transition_to(WorkerState::Starting));
        assert!(WorkerState::Starting.can_transition_to(WorkerState::Running));
        assert!(WorkerState::Running.can_transition_to(WorkerState::Unhealthy));
        assert!(WorkerState::Unhealthy.can_transition_to(WorkerState::Restarting));
        assert!(WorkerState::Restarting.can_transition_to(WorkerState::Starting));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!WorkerState::Stopped.can_transition_to(WorkerState::Running));
        assert!(!WorkerState::Failed.can_transition_to(WorkerState::Starting));
        assert!(!WorkerState::Running.can_transition_to(WorkerState::Starting));
    }

    #[test]
    fn test_failed_is_terminal() {
        for next in [
            WorkerState::Starting,
            WorkerState::Running,
            WorkerState::Restarting,
            WorkerState::Stopped,
        ] {
            assert!(!WorkerState::Failed.can_transition_to(next));
        }
    }
}
