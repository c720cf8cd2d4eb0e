//! Restart behaviour for an application's workers

use serde::{Deserialize, Serialize};

use crate::domain::constants::*;

/// Whether and how quickly crashed workers are restarted.
///
/// In configuration this is either a boolean or a delay in milliseconds,
/// so the config layer deserializes it from an untagged form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartOnError {
    /// Never restart; a crash leaves the worker stopped.
    Never,
    /// Restart after the given delay in milliseconds.
    After(u64),
}

impl Default for RestartOnError {
    fn default() -> Self {
        Self::After(DEFAULT_WORKERS_RESTART_DELAY_MS)
    }
}

impl RestartOnError {
    pub fn enabled(&self) -> bool {
        matches!(self, Self::After(_))
    }

    pub fn delay_ms(&self) -> u64 {
        match self {
            Self::Never => 0,
            Self::After(ms) => *ms,
        }
    }
}

/// Restart budget plus graceful-shutdown bounds, resolved per application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartSettings {
    pub on_error: RestartOnError,
    /// Maximum restarts allowed inside `window_ms` before a worker goes Failed.
    pub budget: u32,
    pub window_ms: u64,
    /// Time a worker gets to exit after SIGTERM before SIGKILL.
    pub shutdown_timeout_ms: u64,
    /// Time a worker gets to become ready after spawn.
    pub start_timeout_ms: u64,
}

impl Default for RestartSettings {
    fn default() -> Self {
        Self {
            on_error: RestartOnError::default(),
            budget: DEFAULT_RESTART_BUDGET,
            window_ms: DEFAULT_RESTART_WINDOW_MS,
            shutdown_timeout_ms: DEFAULT_APPLICATION_SHUTDOWN_MS,
            start_timeout_ms: DEFAULT_START_TIMEOUT_MS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_on_error_forms() {
        assert!(!RestartOnError::Never.enabled());
        assert!(RestartOnError::After(250).enabled());
        assert_eq!(RestartOnError::After(250).delay_ms(), 250);
    }
}
