//! WorkerExecutor port
//! Seam between worker lifecycle logic and the OS process layer

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use async_trait::async_trait;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::domain::error::Result;

/// Future resolving to the process exit code once it terminates.
pub type ExitHandle = Pin<Box<dyn Future<Output = i32> + Send>>;

/// Everything the executor needs to launch one worker process.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub worker_id: Uuid,
    pub application: String,
    pub replica: usize,
    pub command: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: HashMap<String, String>,
}

/// Live handle to an already spawned worker process.
pub struct SpawnedWorker {
    pub pid: u32,
    /// Resolves when the process exits, with its exit code.
    pub exit: ExitHandle,
    /// Fires once the worker reports readiness on its stdout. Dropped
    /// without firing when the process dies first.
    pub ready: oneshot::Receiver<()>,
}

impl std::fmt::Debug for SpawnedWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnedWorker")
            .field("pid", &self.pid)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait WorkerExecutor: Send + Sync {
    /// Launch a worker process and wire up its output capture.
    async fn spawn(&self, spec: SpawnSpec) -> Result<SpawnedWorker>;

    /// Ask the process to exit gracefully (SIGTERM to its group).
    async fn terminate(&self, pid: u32) -> Result<()>;

    /// Force the process down (SIGKILL to its group).
    async fn kill(&self, pid: u32) -> Result<()>;
}
