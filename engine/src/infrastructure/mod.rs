pub mod config;
pub mod in_memory_repository;
pub mod log_pump;
pub mod notify_watcher;
pub mod proc_sampler;
pub mod tokio_executor;

pub use config::{ConfigLoader, RuntimeConfiguration};
pub use in_memory_repository::InMemoryApplicationRepository;
pub use notify_watcher::NotifyWatcher;
pub use proc_sampler::ProcSampler;
pub use tokio_executor::TokioWorkerExecutor;
