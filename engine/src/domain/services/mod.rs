pub mod change_watch;
pub mod config_resolution;
pub mod health_monitoring;
pub mod log_aggregation;
pub mod runtime_directory;
pub mod worker_actor;
pub mod worker_supervision;

pub use change_watch::{ChangeWatchService, WatchFilter};
pub use config_resolution::ConfigResolutionService;
pub use health_monitoring::HealthMonitoringService;
pub use log_aggregation::{LogBus, MetricsRegistry, ProfileEntry, WorkerHealth};
pub use worker_actor::{RestartReason, WorkerCommand, WorkerHandle};
pub use worker_supervision::{RuntimeSignal, WorkerSupervisionService};
