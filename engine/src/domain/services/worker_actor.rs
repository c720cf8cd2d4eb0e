//! Worker actor
//! One task per worker replica, owning its process and state machine

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::domain::entities::{Application, WorkerInstance, WorkerSnapshot};
use crate::domain::ports::{ExitHandle, SpawnSpec, SpawnedWorker, WorkerExecutor};
use crate::domain::services::worker_supervision::RuntimeSignal;
use crate::domain::value_objects::WorkerState;

const COMMAND_QUEUE_CAPACITY: usize = 32;

/// Why a restart was requested, which decides the intermediate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    /// The process exited on its own.
    Crash,
    /// The health monitor gave up on the worker.
    Unhealthy,
    /// A watched source file changed.
    SourceChanged,
    /// An operator asked for a restart over the management channel.
    Operator,
}

/// Commands accepted by a worker actor. Queued commands are processed one
/// at a time, which is what serializes overlapping restart requests.
#[derive(Debug)]
pub enum WorkerCommand {
    Start,
    Stop { reply: oneshot::Sender<()> },
    Restart { reason: RestartReason },
}

/// Handle to a running worker actor.
pub struct WorkerHandle {
    pub application: String,
    pub replica: usize,
    commands: mpsc::Sender<WorkerCommand>,
    state_rx: watch::Receiver<WorkerSnapshot>,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn snapshot(&self) -> WorkerSnapshot {
        self.state_rx.borrow().clone()
    }

    /// A fresh receiver for waiting on state changes.
    pub fn subscribe(&self) -> watch::Receiver<WorkerSnapshot> {
        self.state_rx.clone()
    }

    pub async fn start(&self) {
        let _ = self.commands.send(WorkerCommand::Start).await;
    }

    /// Stop the worker and wait until its process has exited.
    pub async fn stop(&self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(WorkerCommand::Stop { reply }).await.is_ok() {
            let _ = done.await;
        }
    }

    pub async fn restart(&self, reason: RestartReason) {
        let _ = self
            .commands
            .send(WorkerCommand::Restart { reason })
            .await;
    }

    /// Wait until the worker reaches `target`, or fails, or the timeout
    /// elapses. Returns the state observed last.
    pub async fn wait_for_state(
        &self,
        target: WorkerState,
        timeout: Duration,
    ) -> WorkerState {
        let mut rx = self.subscribe();
        let result = tokio::time::timeout(timeout, async {
            loop {
                {
                    let state = rx.borrow().state;
                    if state == target || state == WorkerState::Failed {
                        return state;
                    }
                }
                if rx.changed().await.is_err() {
                    return rx.borrow().state;
                }
            }
        })
        .await;
        match result {
            Ok(state) => state,
            Err(_) => self.state_rx.borrow().state,
        }
    }

    /// Wait for the actor task to finish. The command queue closes first so
    /// an actor that is not otherwise cancelled runs out on its own.
    pub async fn join(self) {
        let WorkerHandle { task, .. } = self;
        let _ = task.await;
    }
}

/// Spawn the actor for one replica. The worker begins Stopped; send
/// `WorkerCommand::Start` to bring it up.
pub fn spawn_worker(
    application: Application,
    replica: usize,
    executor: Arc<dyn WorkerExecutor>,
    signal_tx: mpsc::Sender<RuntimeSignal>,
    cancel: CancellationToken,
) -> WorkerHandle {
    let worker = WorkerInstance::new(application.id.clone(), replica);
    let (state_tx, state_rx) = watch::channel(worker.snapshot());
    let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);

    let actor = WorkerActor {
        worker,
        application: application.clone(),
        executor,
        signal_tx,
        state_tx,
        commands: command_rx,
        cancel,
    };
    let task = tokio::spawn(actor.run());

    WorkerHandle {
        application: application.id,
        replica,
        commands: command_tx,
        state_rx,
        task,
    }
}

struct WorkerActor {
    worker: WorkerInstance,
    application: Application,
    executor: Arc<dyn WorkerExecutor>,
    signal_tx: mpsc::Sender<RuntimeSignal>,
    state_tx: watch::Sender<WorkerSnapshot>,
    commands: mpsc::Receiver<WorkerCommand>,
    cancel: CancellationToken,
}

enum Phase {
    Idle,
    Spawn,
    Done,
}

impl WorkerActor {
    async fn run(mut self) {
        let mut phase = Phase::Idle;
        loop {
            phase = match phase {
                Phase::Idle => self.idle().await,
                Phase::Spawn => self.spawn_and_supervise().await,
                Phase::Done => break,
            };
        }
        debug!(
            application = %self.application.id,
            replica = self.worker.replica,
            "worker actor exited"
        );
    }

    /// Stopped or Failed: wait for a command or shutdown.
    async fn idle(&mut self) -> Phase {
        loop {
            let command = tokio::select! {
                _ = self.cancel.cancelled() => return Phase::Done,
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => cmd,
                    None => return Phase::Done,
                },
            };
            match command {
                WorkerCommand::Start | WorkerCommand::Restart { .. } => {
                    if self.worker.state == WorkerState::Failed {
                        // An explicit start revives a failed worker with a
                        // fresh budget.
                        self.worker = WorkerInstance::new(
                            self.application.id.clone(),
                            self.worker.replica,
                        );
                        self.publish();
                    }
                    return Phase::Spawn;
                }
                WorkerCommand::Stop { reply } => {
                    let _ = reply.send(());
                }
            }
        }
    }

    /// Bring the process up and supervise it until it stops for good.
    async fn spawn_and_supervise(&mut self) -> Phase {
        if self.set_state(WorkerState::Starting).is_err() {
            return Phase::Idle;
        }
        self.worker.record_start();
        let budget = self.application.restart.budget;
        let window = Duration::from_millis(self.application.restart.window_ms);
        if self.worker.start_budget_exhausted(budget, window) {
            error!(
                application = %self.application.id,
                replica = self.worker.replica,
                budget,
                "restart budget exhausted, worker failed"
            );
            return self.fail().await;
        }
        self.publish();

        let spec = self.spawn_spec();
        let spawned = match self.executor.spawn(spec).await {
            Ok(spawned) => spawned,
            Err(err) => {
                error!(
                    application = %self.application.id,
                    replica = self.worker.replica,
                    %err,
                    "worker spawn failed"
                );
                return self.after_crash().await;
            }
        };
        let SpawnedWorker {
            pid,
            mut exit,
            ready,
        } = spawned;

        // Readiness gate: ready line, early exit, timeout or shutdown.
        let start_timeout =
            Duration::from_millis(self.application.restart.start_timeout_ms);
        tokio::select! {
            _ = self.cancel.cancelled() => {
                self.stop_process(pid, &mut exit).await;
                self.finish_stopped();
                return Phase::Done;
            }
            result = ready => {
                if result.is_err() {
                    // Pipe closed without a ready line; the exit arm below
                    // would race this, so wait for the code here.
                    let code = (&mut exit).await;
                    warn!(
                        application = %self.application.id,
                        replica = self.worker.replica,
                        code,
                        "worker exited before becoming ready"
                    );
                    return self.after_crash().await;
                }
            }
            code = &mut exit => {
                warn!(
                    application = %self.application.id,
                    replica = self.worker.replica,
                    code,
                    "worker exited before becoming ready"
                );
                return self.after_crash().await;
            }
            _ = tokio::time::sleep(start_timeout) => {
                error!(
                    application = %self.application.id,
                    replica = self.worker.replica,
                    timeout_ms = start_timeout.as_millis() as u64,
                    "worker did not become ready in time"
                );
                let _ = self.executor.kill(pid).await;
                (&mut exit).await;
                return self.after_crash().await;
            }
        }

        if self.worker.mark_running(pid).is_err() {
            self.stop_process(pid, &mut exit).await;
            self.finish_stopped();
            return Phase::Idle;
        }
        self.publish();
        info!(
            application = %self.application.id,
            replica = self.worker.replica,
            pid,
            "worker running"
        );

        self.supervise_running(pid, exit).await
    }

    /// Running: react to exit, commands and shutdown.
    async fn supervise_running(&mut self, pid: u32, mut exit: ExitHandle) -> Phase {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.stop_process(pid, &mut exit).await;
                    self.finish_stopped();
                    return Phase::Done;
                }
                code = &mut exit => {
                    warn!(
                        application = %self.application.id,
                        replica = self.worker.replica,
                        pid,
                        code,
                        "worker exited unexpectedly"
                    );
                    return self.after_crash().await;
                }
                cmd = self.commands.recv() => {
                    let cmd = match cmd {
                        Some(cmd) => cmd,
                        None => {
                            self.stop_process(pid, &mut exit).await;
                            self.finish_stopped();
                            return Phase::Done;
                        }
                    };
                    match cmd {
                        WorkerCommand::Start => {}
                        WorkerCommand::Stop { reply } => {
                            self.stop_process(pid, &mut exit).await;
                            self.finish_stopped();
                            let _ = reply.send(());
                            return Phase::Idle;
                        }
                        WorkerCommand::Restart { reason } => {
                            self.enter_restart(reason);
                            self.stop_process(pid, &mut exit).await;
                            self.worker.restarts += 1;
                            self.publish();
                            return Phase::Spawn;
                        }
                    }
                }
            }
        }
    }

    /// Exit-driven restart path following the restart policy.
    async fn after_crash(&mut self) -> Phase {
        if !self.application.restart.on_error.enabled() {
            self.finish_stopped();
            return Phase::Idle;
        }
        if self.set_state(WorkerState::Restarting).is_err() {
            self.finish_stopped();
            return Phase::Idle;
        }
        self.worker.restarts += 1;
        self.worker.pid = None;
        self.publish();

        let delay = Duration::from_millis(self.application.restart.on_error.delay_ms());
        if !delay.is_zero() {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.finish_stopped();
                    return Phase::Done;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
        Phase::Spawn
    }

    /// Route through the reason-specific intermediate state, then Restarting.
    fn enter_restart(&mut self, reason: RestartReason) {
        let via = match reason {
            RestartReason::Unhealthy => Some(WorkerState::Unhealthy),
            RestartReason::SourceChanged => Some(WorkerState::Reloading),
            RestartReason::Crash | RestartReason::Operator => None,
        };
        if let Some(state) = via {
            if self.set_state(state).is_ok() {
                self.publish();
            }
        }
        let _ = self.set_state(WorkerState::Restarting);
        self.publish();
    }

    async fn fail(&mut self) -> Phase {
        if let Err(err) = self.worker.mark_failed() {
            warn!(%err, "could not mark worker failed");
        }
        self.publish();
        let _ = self
            .signal_tx
            .send(RuntimeSignal::WorkerFailed {
                application: self.application.id.clone(),
                replica: self.worker.replica,
            })
            .await;
        Phase::Idle
    }

    /// SIGTERM, bounded wait, then SIGKILL.
    async fn stop_process(&mut self, pid: u32, exit: &mut ExitHandle) {
        let timeout =
            Duration::from_millis(self.application.restart.shutdown_timeout_ms);
        if let Err(err) = self.executor.terminate(pid).await {
            warn!(pid, %err, "terminate failed, escalating");
            let _ = self.executor.kill(pid).await;
            exit.await;
            return;
        }
        tokio::select! {
            _ = &mut *exit => {}
            _ = tokio::time::sleep(timeout) => {
                warn!(
                    application = %self.application.id,
                    pid,
                    timeout_ms = timeout.as_millis() as u64,
                    "graceful shutdown timed out, killing"
                );
                let _ = self.executor.kill(pid).await;
                exit.await;
            }
        }
    }

    fn finish_stopped(&mut self) {
        if let Err(err) = self.worker.mark_stopped() {
            warn!(%err, "could not mark worker stopped");
        }
        self.publish();
    }

    fn set_state(&mut self, state: WorkerState) -> crate::domain::error::Result<()> {
        self.worker.transition_to(state).map_err(|err| {
            warn!(
                application = %self.application.id,
                replica = self.worker.replica,
                %err,
                "rejected state transition"
            );
            err
        })
    }

    fn publish(&self) {
        self.state_tx.send_replace(self.worker.snapshot());
    }

    fn spawn_spec(&self) -> SpawnSpec {
        let mut env: HashMap<String, String> = self.application.env.clone();
        env.insert(
            "APPRT_WORKER_ID".to_string(),
            self.worker.id.to_string(),
        );
        env.insert(
            "APPRT_REPLICA".to_string(),
            self.worker.replica.to_string(),
        );
        if let Some(port) = self.application.port {
            env.insert("PORT".to_string(), port.to_string());
        }
        SpawnSpec {
            worker_id: self.worker.id,
            application: self.application.id.clone(),
            replica: self.worker.replica,
            command: self.application.command.clone(),
            args: self.application.args.clone(),
            cwd: self.application.path.clone(),
            env,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::{DomainError, Result};
    use crate::domain::value_objects::{RestartOnError, RestartSettings};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    /// Executor whose processes live until terminated, optionally dying a
    /// fixed number of times first.
    struct FakeExecutor {
        next_pid: AtomicU32,
        crashes_before_stable: AtomicU32,
        ready_immediately: bool,
        kills: Mutex<Vec<u32>>,
        stops: Mutex<HashMap<u32, oneshot::Sender<i32>>>,
        honor_terminate: bool,
    }

    impl FakeExecutor {
        fn stable() -> Self {
            Self::new(0, true, true)
        }

        fn new(crashes: u32, ready: bool, honor_terminate: bool) -> Self {
            Self {
                next_pid: AtomicU32::new(100),
                crashes_before_stable: AtomicU32::new(crashes),
                ready_immediately: ready,
                kills: Mutex::new(Vec::new()),
                stops: Mutex::new(HashMap::new()),
                honor_terminate,
            }
        }
    }

    #[async_trait]
    impl WorkerExecutor for FakeExecutor {
        async fn spawn(&self, _spec: SpawnSpec) -> Result<SpawnedWorker> {
            let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
            let (ready_tx, ready_rx) = oneshot::channel();
            let (exit_tx, exit_rx) = oneshot::channel::<i32>();

            let crash = self
                .crashes_before_stable
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    n.checked_sub(1)
                })
                .is_ok();

            if crash {
                let _ = exit_tx.send(1);
            } else {
                if self.ready_immediately {
                    let _ = ready_tx.send(());
                }
                self.stops.lock().unwrap().insert(pid, exit_tx);
            }

            let exit: ExitHandle =
                Box::pin(async move { exit_rx.await.unwrap_or(-1) });
            Ok(SpawnedWorker {
                pid,
                exit,
                ready: ready_rx,
            })
        }

        async fn terminate(&self, pid: u32) -> Result<()> {
            if self.honor_terminate {
                if let Some(tx) = self.stops.lock().unwrap().remove(&pid) {
                    let _ = tx.send(0);
                }
                Ok(())
            } else {
                // Pretend the signal was delivered but ignored.
                Ok(())
            }
        }

        async fn kill(&self, pid: u32) -> Result<()> {
            self.kills.lock().unwrap().push(pid);
            if let Some(tx) = self.stops.lock().unwrap().remove(&pid) {
                let _ = tx.send(-9);
            }
            Ok(())
        }
    }

    fn test_app(restart: RestartSettings) -> Application {
        Application::builder("api")
            .command("node")
            .restart(restart)
            .entrypoint(true)
            .build()
            .unwrap()
    }

    fn handle_with(
        executor: Arc<FakeExecutor>,
        restart: RestartSettings,
    ) -> (WorkerHandle, mpsc::Receiver<RuntimeSignal>, CancellationToken) {
        let (signal_tx, signal_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let handle = spawn_worker(
            test_app(restart),
            0,
            executor,
            signal_tx,
            cancel.clone(),
        );
        (handle, signal_rx, cancel)
    }

    const WAIT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_start_reaches_running() {
        let executor = Arc::new(FakeExecutor::stable());
        let (handle, _rx, cancel) = handle_with(executor, RestartSettings::default());

        handle.start().await;
        let state = handle.wait_for_state(WorkerState::Running, WAIT).await;
        assert_eq!(state, WorkerState::Running);
        assert!(handle.snapshot().pid.is_some());

        cancel.cancel();
        handle.join().await;
    }

    #[tokio::test]
    async fn test_stop_returns_worker_to_stopped() {
        let executor = Arc::new(FakeExecutor::stable());
        let (handle, _rx, cancel) = handle_with(executor, RestartSettings::default());

        handle.start().await;
        handle.wait_for_state(WorkerState::Running, WAIT).await;
        handle.stop().await;
        assert_eq!(handle.snapshot().state, WorkerState::Stopped);

        cancel.cancel();
        handle.join().await;
    }

    #[tokio::test]
    async fn test_crash_restarts_until_stable() {
        let executor = Arc::new(FakeExecutor::new(2, true, true));
        let (handle, _rx, cancel) = handle_with(executor, RestartSettings::default());

        handle.start().await;
        let state = handle.wait_for_state(WorkerState::Running, WAIT).await;
        assert_eq!(state, WorkerState::Running);
        assert_eq!(handle.snapshot().restarts, 2);

        cancel.cancel();
        handle.join().await;
    }

    #[tokio::test]
    async fn test_crash_loop_exhausts_budget_and_fails() {
        let executor = Arc::new(FakeExecutor::new(u32::MAX, true, true));
        let restart = RestartSettings {
            budget: 2,
            ..RestartSettings::default()
        };
        let (handle, mut signal_rx, cancel) = handle_with(executor, restart);

        handle.start().await;
        let state = handle.wait_for_state(WorkerState::Failed, WAIT).await;
        assert_eq!(state, WorkerState::Failed);

        let signal = tokio::time::timeout(WAIT, signal_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(signal, RuntimeSignal::WorkerFailed { .. }));

        cancel.cancel();
        handle.join().await;
    }

    #[tokio::test]
    async fn test_crash_with_restart_disabled_stops() {
        let executor = Arc::new(FakeExecutor::new(u32::MAX, true, true));
        let restart = RestartSettings {
            on_error: RestartOnError::Never,
            ..RestartSettings::default()
        };
        let (handle, _rx, cancel) = handle_with(executor, restart);

        handle.start().await;
        // The fake crashes instantly; give the actor time to settle.
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(handle.snapshot().state, WorkerState::Stopped);
        assert_eq!(handle.snapshot().restarts, 0);

        cancel.cancel();
        handle.join().await;
    }

    #[tokio::test]
    async fn test_operator_restart_round_trip() {
        let executor = Arc::new(FakeExecutor::stable());
        let (handle, _rx, cancel) = handle_with(executor, RestartSettings::default());

        handle.start().await;
        handle.wait_for_state(WorkerState::Running, WAIT).await;
        let first_pid = handle.snapshot().pid;

        handle.restart(RestartReason::Operator).await;
        tokio::time::timeout(WAIT, async {
            let mut rx = handle.subscribe();
            loop {
                {
                    let snap = rx.borrow();
                    if snap.state == WorkerState::Running && snap.restarts == 1 {
                        break;
                    }
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .unwrap();
        assert_ne!(handle.snapshot().pid, first_pid);

        cancel.cancel();
        handle.join().await;
    }

    #[tokio::test]
    async fn test_sigterm_escalates_to_kill_on_timeout() {
        let executor = Arc::new(FakeExecutor::new(0, true, false));
        let restart = RestartSettings {
            shutdown_timeout_ms: 50,
            ..RestartSettings::default()
        };
        let (handle, _rx, cancel) = handle_with(executor.clone(), restart);

        handle.start().await;
        handle.wait_for_state(WorkerState::Running, WAIT).await;
        let pid = handle.snapshot().pid.unwrap();
        handle.stop().await;

        assert_eq!(*executor.kills.lock().unwrap(), vec![pid]);
        assert_eq!(handle.snapshot().state, WorkerState::Stopped);

        cancel.cancel();
        handle.join().await;
    }

    #[tokio::test]
    async fn test_start_timeout_without_ready_line() {
        let executor = Arc::new(FakeExecutor::new(0, false, true));
        let restart = RestartSettings {
            on_error: RestartOnError::Never,
            start_timeout_ms: 50,
            ..RestartSettings::default()
        };
        let (handle, _rx, cancel) = handle_with(executor.clone(), restart);

        handle.start().await;
        tokio::time::timeout(WAIT, async {
            let mut rx = handle.subscribe();
            loop {
                if !executor.kills.lock().unwrap().is_empty() {
                    break;
                }
                let _ = rx.changed().await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        handle.join().await;
    }

    #[test]
    fn test_invalid_transition_error_shape() {
        let err = DomainError::InvalidStateTransition {
            from: WorkerState::Stopped,
            to: WorkerState::Running,
        };
        assert!(err.to_string().contains("stopped"));
    }
}
