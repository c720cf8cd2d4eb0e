//! Tokio worker executor
//! Spawns worker processes and wires their output through the log bus

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::domain::error::{DomainError, Result};
use crate::domain::ports::{ExitHandle, SpawnSpec, SpawnedWorker, WorkerExecutor};
use crate::domain::services::LogBus;
use crate::domain::value_objects::LogLevel;
use crate::infrastructure::log_pump::{pump, PumpMeta};

/// Executor backed by `tokio::process`. Each worker runs in its own
/// session so signals reach the whole process group, and both output pipes
/// are pumped into the shared log bus.
pub struct TokioWorkerExecutor {
    bus: LogBus,
}

impl TokioWorkerExecutor {
    pub fn new(bus: LogBus) -> Self {
        Self { bus }
    }

    fn signal(pid: u32, signal: libc::c_int) -> Result<()> {
        // Negative pid targets the process group created by setsid.
        let rc = unsafe { libc::kill(-(pid as libc::pid_t), signal) };
        if rc == 0 {
            return Ok(());
        }
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            // Already gone.
            return Ok(());
        }
        Err(DomainError::Io(err.to_string()))
    }
}

#[async_trait]
impl WorkerExecutor for TokioWorkerExecutor {
    async fn spawn(&self, spec: SpawnSpec) -> Result<SpawnedWorker> {
        let mut command = Command::new(&spec.command);
        command
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        unsafe {
            command.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }

        let mut child = command.spawn().map_err(|err| DomainError::WorkerStart {
            application: spec.application.clone(),
            replica: spec.replica,
            reason: err.to_string(),
        })?;
        let pid = child.id().ok_or_else(|| DomainError::WorkerStart {
            application: spec.application.clone(),
            replica: spec.replica,
            reason: "process exited before a pid was observed".to_string(),
        })?;
        debug!(
            application = %spec.application,
            replica = spec.replica,
            pid,
            command = %spec.command,
            "worker process spawned"
        );

        let (ready_tx, ready_rx) = oneshot::channel();
        if let Some(stdout) = child.stdout.take() {
            pump(
                stdout,
                PumpMeta {
                    worker_id: spec.worker_id,
                    application: spec.application.clone(),
                    replica: spec.replica,
                    pid,
                    default_level: LogLevel::Info,
                },
                self.bus.clone(),
                Some(ready_tx),
            );
        }
        if let Some(stderr) = child.stderr.take() {
            pump(
                stderr,
                PumpMeta {
                    worker_id: spec.worker_id,
                    application: spec.application.clone(),
                    replica: spec.replica,
                    pid,
                    default_level: LogLevel::Warn,
                },
                self.bus.clone(),
                None,
            );
        }

        let application = spec.application.clone();
        let exit: ExitHandle = Box::pin(async move {
            match child.wait().await {
                Ok(status) => status.code().unwrap_or_else(|| {
                    // Killed by signal; report the conventional 128+n code.
                    #[cfg(unix)]
                    {
                        use std::os::unix::process::ExitStatusExt;
                        status.signal().map(|s| 128 + s).unwrap_or(-1)
                    }
                    #[cfg(not(unix))]
                    {
                        -1
                    }
                }),
                Err(err) => {
                    warn!(%application, pid, %err, "wait on worker failed");
                    -1
                }
            }
        });

        Ok(SpawnedWorker {
            pid,
            exit,
            ready: ready_rx,
        })
    }

    async fn terminate(&self, pid: u32) -> Result<()> {
        Self::signal(pid, libc::SIGTERM)
    }

    async fn kill(&self, pid: u32) -> Result<()> {
        Self::signal(pid, libc::SIGKILL)
    }
}
