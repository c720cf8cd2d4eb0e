pub mod health_policy;
pub mod health_sample;
pub mod log_record;
pub mod restart_settings;
pub mod worker_state;

pub use health_policy::HealthPolicy;
pub use health_sample::HealthSample;
pub use log_record::{LogLevel, LogRecord};
pub use restart_settings::{RestartOnError, RestartSettings};
pub use worker_state::WorkerState;
