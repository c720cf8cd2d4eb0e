//! WorkerInstance entity
//! Lifecycle state and restart bookkeeping for one worker replica

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use uuid::Uuid;

use crate::domain::error::{DomainError, Result};
use crate::domain::value_objects::WorkerState;

/// Runtime state of one worker replica of an application.
///
/// Transitions go through `transition_to`, which enforces the state machine
/// from `WorkerState::can_transition_to`. The restart window bookkeeping
/// (`start_times`) backs the restart budget: when more starts than the
/// budget fall inside the window, the worker is declared `Failed`.
#[derive(Debug, Clone)]
pub struct WorkerInstance {
    pub id: Uuid,
    pub application: String,
    pub replica: usize,
    pub state: WorkerState,
    pub pid: Option<u32>,
    /// When the current process was spawned, for grace-period checks.
    pub started_at: Option<Instant>,
    /// Wall-clock start time in epoch millis, for status output.
    pub started_at_ms: Option<u64>,
    /// Total restarts over the worker's lifetime.
    pub restarts: u64,
    start_times: Vec<Instant>,
}

impl WorkerInstance {
    pub fn new(application: impl Into<String>, replica: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            application: application.into(),
            replica,
            state: WorkerState::Stopped,
            pid: None,
            started_at: None,
            started_at_ms: None,
            restarts: 0,
            start_times: Vec::new(),
        }
    }

    /// Move to `next`, rejecting transitions the state machine forbids.
    pub fn transition_to(&mut self, next: WorkerState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(DomainError::InvalidStateTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Record a spawn attempt. Called on every (re)start before the process
    /// is actually launched, so crash loops are counted even when the
    /// process dies before becoming ready.
    pub fn record_start(&mut self) {
        self.start_times.push(Instant::now());
    }

    /// Mark the worker running with the given pid.
    pub fn mark_running(&mut self, pid: u32) -> Result<()> {
        self.transition_to(WorkerState::Running)?;
        self.pid = Some(pid);
        self.started_at = Some(Instant::now());
        self.started_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .ok()
            .map(|d| d.as_millis() as u64);
        Ok(())
    }

    /// Mark the worker stopped and clear process-scoped fields.
    pub fn mark_stopped(&mut self) -> Result<()> {
        self.transition_to(WorkerState::Stopped)?;
        self.clear_process();
        Ok(())
    }

    /// Mark the worker failed. Terminal until an explicit start command.
    pub fn mark_failed(&mut self) -> Result<()> {
        self.transition_to(WorkerState::Failed)?;
        self.clear_process();
        Ok(())
    }

    fn clear_process(&mut self) {
        self.pid = None;
        self.started_at = None;
        self.started_at_ms = None;
    }

    /// True when more starts than `budget` fall inside `window`.
    pub fn start_budget_exhausted(&mut self, budget: u32, window: Duration) -> bool {
        let now = Instant::now();
        self.start_times
            .retain(|t| now.duration_since(*t) <= window);
        self.start_times.len() > budget as usize
    }

    /// Reset budget bookkeeping, used when an operator starts a Failed worker.
    pub fn reset_start_budget(&mut self) {
        self.start_times.clear();
    }

    /// Uptime of the current process, if running.
    pub fn uptime(&self) -> Option<Duration> {
        self.started_at.map(|t| t.elapsed())
    }

    /// Wire-facing snapshot of this worker for status responses.
    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            id: self.id,
            application: self.application.clone(),
            replica: self.replica,
            state: self.state,
            pid: self.pid,
            started_at_ms: self.started_at_ms,
            uptime_ms: self.uptime().map(|d| d.as_millis() as u64),
            restarts: self.restarts,
        }
    }
}

/// Serializable view of a worker, as returned over the management channel.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerSnapshot {
    pub id: Uuid,
    pub application: String,
    pub replica: usize,
    pub state: WorkerState,
    pub pid: Option<u32>,
    pub started_at_ms: Option<u64>,
    pub uptime_ms: Option<u64>,
    pub restarts: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_happy_path() {
        let mut worker = WorkerInstance::new("api", 0);
        assert_eq!(worker.state, WorkerState::Stopped);

        worker.transition_to(WorkerState::Starting).unwrap();
        worker.record_start();
        worker.mark_running(42).unwrap();
        assert_eq!(worker.state, WorkerState::Running);
        assert_eq!(worker.pid, Some(42));
        assert!(worker.started_at_ms.is_some());

        worker.transition_to(WorkerState::Restarting).unwrap();
        worker.transition_to(WorkerState::Starting).unwrap();
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut worker = WorkerInstance::new("api", 0);
        let err = worker.transition_to(WorkerState::Running).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
    }

    #[test]
    fn test_start_budget_window() {
        let mut worker = WorkerInstance::new("api", 0);
        for _ in 0..3 {
            worker.record_start();
        }
        assert!(!worker.start_budget_exhausted(3, Duration::from_secs(60)));
        worker.record_start();
        assert!(worker.start_budget_exhausted(3, Duration::from_secs(60)));

        worker.reset_start_budget();
        assert!(!worker.start_budget_exhausted(3, Duration::from_secs(60)));
    }

    #[test]
    fn test_mark_stopped_clears_process_fields() {
        let mut worker = WorkerInstance::new("api", 0);
        worker.transition_to(WorkerState::Starting).unwrap();
        worker.mark_running(42).unwrap();
        worker.mark_stopped().unwrap();
        assert!(worker.pid.is_none());
        assert!(worker.uptime().is_none());
    }
}
