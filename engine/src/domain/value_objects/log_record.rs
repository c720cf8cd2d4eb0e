//! LogRecord and LogLevel value objects

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Severity attached to an aggregated log line.
///
/// Ordered so that a minimum-level filter can use a plain comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    /// Parse a level name, case-insensitively. Unknown names map to `Info`
    /// so that free-form worker output is never dropped by a level filter.
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "info" => Self::Info,
            "warn" | "warning" => Self::Warn,
            "error" => Self::Error,
            "fatal" => Self::Fatal,
            _ => Self::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One log line captured from a worker's stdout or stderr.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Application the worker belongs to.
    pub application: String,
    /// Worker instance that produced the line.
    pub worker: Uuid,
    /// Replica index within the application.
    pub replica: usize,
    /// OS pid of the worker at the time of capture.
    pub pid: u32,
    pub level: LogLevel,
    /// Milliseconds since the epoch.
    pub timestamp_ms: u64,
    pub message: String,
}
