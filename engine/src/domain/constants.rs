//! Default values for runtime and worker configuration

/// Default number of worker replicas per application
pub const DEFAULT_WORKERS: usize = 1;

/// Default delay before replacing a stopped worker (milliseconds)
pub const DEFAULT_WORKERS_RESTART_DELAY_MS: u64 = 0;

/// Default per-application graceful stop timeout (milliseconds)
pub const DEFAULT_APPLICATION_SHUTDOWN_MS: u64 = 10_000;

/// Default whole-runtime graceful shutdown timeout (milliseconds)
pub const DEFAULT_RUNTIME_SHUTDOWN_MS: u64 = 30_000;

/// Default timeout for a worker to signal readiness (milliseconds)
pub const DEFAULT_START_TIMEOUT_MS: u64 = 30_000;

/// Max worker restarts allowed within the error-restart window
pub const DEFAULT_RESTART_BUDGET: u32 = 5;

/// Error-restart window for the restart budget (milliseconds)
pub const DEFAULT_RESTART_WINDOW_MS: u64 = 60_000;

/// Default health sampling interval (milliseconds)
pub const DEFAULT_HEALTH_INTERVAL_MS: u64 = 1_000;

/// Default startup grace period before health samples are evaluated (milliseconds)
pub const DEFAULT_HEALTH_GRACE_PERIOD_MS: u64 = 30_000;

/// Default consecutive failing samples before a worker is signalled unhealthy
pub const DEFAULT_MAX_UNHEALTHY_CHECKS: u32 = 10;

/// Default event-loop/CPU utilization ceiling (fraction)
pub const DEFAULT_MAX_ELU: f64 = 0.99;

/// Default heap-used ceiling as a fraction of the heap limit
pub const DEFAULT_MAX_HEAP_USED: f64 = 0.99;

/// Debounce window for coalescing filesystem change events (milliseconds)
pub const WATCH_DEBOUNCE_MS: u64 = 100;

/// Dependency directory that is never watched
pub const WATCH_DEFAULT_IGNORED_DIR: &str = "node_modules";

/// Capacity of the log record broadcast ring
pub const LOG_BUS_CAPACITY: usize = 1_024;

/// Capacity of the supervisor signal queue
pub const SIGNAL_QUEUE_CAPACITY: usize = 256;
