//! Domain-level errors
//! These represent runtime orchestration failures, not infrastructure bugs

use thiserror::Error;

use crate::domain::value_objects::WorkerState;

#[derive(Debug, Error, Clone)]
pub enum DomainError {
    // Configuration errors
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("No entrypoint application configured")]
    MissingEntrypoint,

    #[error("More than one entrypoint application configured: {0}")]
    DuplicateEntrypoint(String),

    #[error("Dependency cycle detected in application graph: {0}")]
    DependencyCycle(String),

    #[error("Application '{application}' depends on unknown application '{dependency}'")]
    DependencyNotFound {
        application: String,
        dependency: String,
    },

    #[error("Application path does not exist: {0}")]
    PathNotFound(String),

    // Application identity errors
    #[error("Invalid application id: {0}")]
    InvalidId(String),

    #[error("Application '{0}' is defined more than once")]
    DuplicateApplication(String),

    // Worker lifecycle errors
    #[error("Worker {application}:{replica} failed to start: {reason}")]
    WorkerStart {
        application: String,
        replica: usize,
        reason: String,
    },

    #[error("Worker {application}:{replica} timed out after {timeout_ms}ms waiting for {what}")]
    WorkerTimeout {
        application: String,
        replica: usize,
        timeout_ms: u64,
        what: String,
    },

    #[error("Worker {application}:{replica} exceeded its restart budget")]
    WorkerFailed { application: String, replica: usize },

    #[error("Invalid worker state transition from {from} to {to}")]
    InvalidStateTransition { from: WorkerState, to: WorkerState },

    // Management channel errors
    #[error("Cannot find a matching runtime.")]
    RuntimeNotFound,

    #[error("Cannot find a matching application.")]
    ApplicationNotFound,

    #[error("Unknown management command: {0}")]
    UnknownCommand(String),

    #[error("Invalid management request: {0}")]
    InvalidRequest(String),

    #[error("Management transport error: {0}")]
    Transport(String),

    // Injection / probing errors
    #[error("Request injection failed: {0}")]
    InjectFailed(String),

    // Profiling errors
    #[error("No profiling session active for application '{0}'")]
    ProfileNotActive(String),

    #[error("Profiling already active for application '{0}'")]
    ProfileAlreadyActive(String),

    // Infrastructure wrap
    #[error("I/O error: {0}")]
    Io(String),
}

impl DomainError {
    /// Short stable identifier for the error category, used on the wire
    /// and in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            DomainError::ConfigInvalid(_)
            | DomainError::MissingEntrypoint
            | DomainError::DuplicateEntrypoint(_)
            | DomainError::DependencyCycle(_)
            | DomainError::DependencyNotFound { .. }
            | DomainError::PathNotFound(_)
            | DomainError::InvalidId(_)
            | DomainError::DuplicateApplication(_) => "config_invalid",
            DomainError::WorkerStart { .. } => "worker_start",
            DomainError::WorkerTimeout { .. } => "worker_timeout",
            DomainError::WorkerFailed { .. } => "worker_failed",
            DomainError::InvalidStateTransition { .. } => "invalid_state_transition",
            DomainError::RuntimeNotFound | DomainError::ApplicationNotFound => "not_found",
            DomainError::UnknownCommand(_) | DomainError::InvalidRequest(_) => "bad_request",
            DomainError::Transport(_) => "transport",
            DomainError::InjectFailed(_) => "inject_failed",
            DomainError::ProfileNotActive(_) | DomainError::ProfileAlreadyActive(_) => "profile",
            DomainError::Io(_) => "io",
        }
    }

    /// True for errors raised by a lookup miss on the management channel.
    /// These are always surfaced verbatim to the caller, never fatal.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DomainError::RuntimeNotFound | DomainError::ApplicationNotFound
        )
    }
}

impl From<std::io::Error> for DomainError {
    fn from(e: std::io::Error) -> Self {
        DomainError::Io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DomainError>;
