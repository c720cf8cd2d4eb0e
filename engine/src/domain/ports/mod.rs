pub mod application_repository;
pub mod fs_events;
pub mod resource_sampler;
pub mod worker_executor;

pub use application_repository::ApplicationRepository;
pub use fs_events::FsEvents;
pub use resource_sampler::ResourceSampler;
pub use worker_executor::{ExitHandle, SpawnSpec, SpawnedWorker, WorkerExecutor};
