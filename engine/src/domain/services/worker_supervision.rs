//! Worker supervision
//! Starts applications in dependency order and routes runtime signals

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::domain::constants::SIGNAL_QUEUE_CAPACITY;
use crate::domain::entities::{Application, WorkerSnapshot};
use crate::domain::error::{DomainError, Result};
use crate::domain::ports::WorkerExecutor;
use crate::domain::services::health_monitoring::HealthMonitoringService;
use crate::domain::services::worker_actor::{
    spawn_worker, RestartReason, WorkerHandle,
};
use crate::domain::value_objects::WorkerState;

/// Events that ask the supervisor to act on a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeSignal {
    /// The health monitor gave up on a worker.
    Unhealthy { application: String, replica: usize },
    /// A watched source tree changed.
    SourceChanged { application: String },
    /// A worker exhausted its restart budget.
    WorkerFailed { application: String, replica: usize },
}

struct AppWorkers {
    application: Application,
    handles: Vec<WorkerHandle>,
    monitors: Vec<JoinHandle<()>>,
}

/// Owns all worker actors and their health monitors.
///
/// Applications start in dependency order, each waiting until all replicas
/// of its dependencies are Running, and stop in the reverse order. Signals
/// from the health monitor and the change watcher are translated into
/// restart commands on the affected actors; the actors' command queues keep
/// overlapping restarts serialized.
pub struct WorkerSupervisionService {
    executor: Arc<dyn WorkerExecutor>,
    health: Arc<HealthMonitoringService>,
    workers: Arc<RwLock<HashMap<String, AppWorkers>>>,
    start_order: RwLock<Vec<String>>,
    signal_tx: mpsc::Sender<RuntimeSignal>,
    router: JoinHandle<()>,
    cancel: CancellationToken,
}

impl WorkerSupervisionService {
    pub fn new(
        executor: Arc<dyn WorkerExecutor>,
        health: Arc<HealthMonitoringService>,
        cancel: CancellationToken,
    ) -> Self {
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_QUEUE_CAPACITY);
        let workers: Arc<RwLock<HashMap<String, AppWorkers>>> =
            Arc::new(RwLock::new(HashMap::new()));
        let router = tokio::spawn(route_signals(
            signal_rx,
            workers.clone(),
            cancel.clone(),
        ));
        Self {
            executor,
            health,
            workers,
            start_order: RwLock::new(Vec::new()),
            signal_tx,
            router,
            cancel,
        }
    }

    /// Sender for producers of runtime signals (change watcher, tests).
    pub fn signal_sender(&self) -> mpsc::Sender<RuntimeSignal> {
        self.signal_tx.clone()
    }

    /// Bring up every application, in the given start order. Fails fast
    /// when a worker goes Failed during startup; a slow worker is tolerated
    /// when its restart policy lets the actor keep trying.
    pub async fn start_all(&self, applications: &[Application]) -> Result<()> {
        {
            let mut order = self.start_order.write().await;
            order.clear();
            order.extend(applications.iter().map(|a| a.id.clone()));
        }

        for application in applications {
            self.admit(application).await;
            self.start_application(&application.id).await?;
        }
        Ok(())
    }

    /// Register the actors and monitors for one application.
    async fn admit(&self, application: &Application) {
        let mut workers = self.workers.write().await;
        if workers.contains_key(&application.id) {
            return;
        }
        let mut handles = Vec::with_capacity(application.workers);
        let mut monitors = Vec::new();
        for replica in 0..application.workers {
            let handle = spawn_worker(
                application.clone(),
                replica,
                self.executor.clone(),
                self.signal_tx.clone(),
                self.cancel.child_token(),
            );
            if let Some(monitor) = self.health.spawn(
                application,
                replica,
                handle.subscribe(),
                self.signal_tx.clone(),
                self.cancel.child_token(),
            ) {
                monitors.push(monitor);
            }
            handles.push(handle);
        }
        workers.insert(
            application.id.clone(),
            AppWorkers {
                application: application.clone(),
                handles,
                monitors,
            },
        );
    }

    /// Start all replicas of one application and wait until they run.
    pub async fn start_application(&self, id: &str) -> Result<()> {
        let workers = self.workers.read().await;
        let app = workers
            .get(id)
            .ok_or_else(|| DomainError::ApplicationNotFound)?;

        for handle in &app.handles {
            handle.start().await;
        }
        let timeout = Duration::from_millis(app.application.restart.start_timeout_ms);
        for handle in &app.handles {
            match handle.wait_for_state(WorkerState::Running, timeout).await {
                WorkerState::Running => {}
                WorkerState::Failed => {
                    return Err(DomainError::WorkerFailed {
                        application: id.to_string(),
                        replica: handle.replica,
                    });
                }
                state if app.application.restart.on_error.enabled() => {
                    warn!(
                        application = id,
                        replica = handle.replica,
                        %state,
                        "worker slow to start, continuing under restart policy"
                    );
                }
                _ => {
                    return Err(DomainError::WorkerTimeout {
                        application: id.to_string(),
                        replica: handle.replica,
                        timeout_ms: timeout.as_millis() as u64,
                        what: "startup".to_string(),
                    });
                }
            }
        }
        info!(application = id, replicas = app.handles.len(), "application started");
        Ok(())
    }

    /// Stop all replicas of one application and wait for their processes.
    pub async fn stop_application(&self, id: &str) -> Result<()> {
        let workers = self.workers.read().await;
        let app = workers
            .get(id)
            .ok_or_else(|| DomainError::ApplicationNotFound)?;
        for handle in &app.handles {
            handle.stop().await;
        }
        info!(application = id, "application stopped");
        Ok(())
    }

    /// Restart all replicas, sequentially, waiting for each to come back.
    pub async fn restart_application(&self, id: &str, reason: RestartReason) -> Result<()> {
        let workers = self.workers.read().await;
        let app = workers
            .get(id)
            .ok_or_else(|| DomainError::ApplicationNotFound)?;
        let timeout = Duration::from_millis(app.application.restart.start_timeout_ms);
        for handle in &app.handles {
            // Wait for the restart counter to move, not just for Running:
            // the worker is usually Running already when the command lands.
            let before = handle.snapshot().restarts;
            handle.restart(reason).await;
            let mut rx = handle.subscribe();
            let outcome = tokio::time::timeout(timeout, async {
                loop {
                    {
                        let snap = rx.borrow();
                        if snap.state == WorkerState::Failed {
                            return WorkerState::Failed;
                        }
                        if snap.state == WorkerState::Running && snap.restarts > before
                        {
                            return WorkerState::Running;
                        }
                    }
                    if rx.changed().await.is_err() {
                        let state = rx.borrow().state;
                        return state;
                    }
                }
            })
            .await;
            match outcome {
                Ok(WorkerState::Running) => {}
                Ok(WorkerState::Failed) => {
                    return Err(DomainError::WorkerFailed {
                        application: id.to_string(),
                        replica: handle.replica,
                    });
                }
                _ => {
                    return Err(DomainError::WorkerTimeout {
                        application: id.to_string(),
                        replica: handle.replica,
                        timeout_ms: timeout.as_millis() as u64,
                        what: "restart".to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Stop everything in reverse start order. The whole pass is bounded by
    /// `runtime_timeout`; when it elapses the cancellation token tears the
    /// remaining actors down on their own shutdown path.
    pub async fn stop_all(&self, runtime_timeout: Duration) {
        let order: Vec<String> = {
            let order = self.start_order.read().await;
            order.iter().rev().cloned().collect()
        };
        let pass = async {
            for id in &order {
                if let Err(err) = self.stop_application(id).await {
                    warn!(application = %id, %err, "stop failed during shutdown");
                }
            }
        };
        if tokio::time::timeout(runtime_timeout, pass).await.is_err() {
            warn!(
                timeout_ms = runtime_timeout.as_millis() as u64,
                "graceful shutdown window elapsed, cancelling workers"
            );
            self.cancel.cancel();
        }
    }

    /// Drop every actor so a fresh application set can be admitted, as
    /// happens when the root configuration is swapped. Callers stop the
    /// workers first; closing the command queues lets the actors run out.
    pub async fn evict_all(&self) {
        let drained: Vec<AppWorkers> = {
            let mut workers = self.workers.write().await;
            workers.drain().map(|(_, app)| app).collect()
        };
        self.start_order.write().await.clear();
        for app in drained {
            for monitor in app.monitors {
                monitor.abort();
            }
            for handle in app.handles {
                handle.join().await;
            }
        }
    }

    /// Snapshots of every worker, grouped by start order.
    pub async fn snapshots(&self) -> Vec<WorkerSnapshot> {
        let order = self.start_order.read().await.clone();
        let workers = self.workers.read().await;
        let mut out = Vec::new();
        for id in &order {
            if let Some(app) = workers.get(id) {
                out.extend(app.handles.iter().map(|h| h.snapshot()));
            }
        }
        out
    }

    pub async fn snapshots_for(&self, id: &str) -> Result<Vec<WorkerSnapshot>> {
        let workers = self.workers.read().await;
        let app = workers
            .get(id)
            .ok_or_else(|| DomainError::ApplicationNotFound)?;
        Ok(app.handles.iter().map(|h| h.snapshot()).collect())
    }

    /// Tear down actors and monitors after the final stop.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let mut workers = self.workers.write().await;
        for (_, app) in workers.drain() {
            for monitor in app.monitors {
                let _ = monitor.await;
            }
            for handle in app.handles {
                handle.join().await;
            }
        }
        self.router.abort();
    }
}

/// Translate runtime signals into actor commands.
async fn route_signals(
    mut signal_rx: mpsc::Receiver<RuntimeSignal>,
    workers: Arc<RwLock<HashMap<String, AppWorkers>>>,
    cancel: CancellationToken,
) {
    loop {
        let signal = tokio::select! {
            _ = cancel.cancelled() => return,
            signal = signal_rx.recv() => match signal {
                Some(signal) => signal,
                None => return,
            },
        };
        match signal {
            RuntimeSignal::Unhealthy { application, replica } => {
                let workers = workers.read().await;
                if let Some(app) = workers.get(&application) {
                    if let Some(handle) = app.handles.get(replica) {
                        info!(
                            %application,
                            replica,
                            "restarting unhealthy worker"
                        );
                        handle.restart(RestartReason::Unhealthy).await;
                    }
                }
            }
            RuntimeSignal::SourceChanged { application } => {
                let workers = workers.read().await;
                if let Some(app) = workers.get(&application) {
                    info!(%application, "reloading after source change");
                    for handle in &app.handles {
                        handle.restart(RestartReason::SourceChanged).await;
                    }
                }
            }
            RuntimeSignal::WorkerFailed { application, replica } => {
                error!(
                    %application,
                    replica,
                    "worker failed permanently, start it explicitly to retry"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{ExitHandle, SpawnSpec, SpawnedWorker};
    use crate::domain::services::log_aggregation::MetricsRegistry;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    /// Fake processes that come up ready and wait for termination. Spawn
    /// order is recorded for dependency-order assertions.
    struct OrderedExecutor {
        next_pid: AtomicU32,
        spawned: Mutex<Vec<String>>,
        terminated: Mutex<Vec<String>>,
        stops: Mutex<HashMap<u32, (String, oneshot::Sender<i32>)>>,
    }

    impl OrderedExecutor {
        fn new() -> Self {
            Self {
                next_pid: AtomicU32::new(500),
                spawned: Mutex::new(Vec::new()),
                terminated: Mutex::new(Vec::new()),
                stops: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl WorkerExecutor for OrderedExecutor {
        async fn spawn(&self, spec: SpawnSpec) -> crate::domain::error::Result<SpawnedWorker> {
            let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
            self.spawned.lock().unwrap().push(spec.application.clone());
            let (ready_tx, ready_rx) = oneshot::channel();
            let (exit_tx, exit_rx) = oneshot::channel::<i32>();
            let _ = ready_tx.send(());
            self.stops
                .lock()
                .unwrap()
                .insert(pid, (spec.application, exit_tx));
            let exit: ExitHandle = Box::pin(async move { exit_rx.await.unwrap_or(-1) });
            Ok(SpawnedWorker {
                pid,
                exit,
                ready: ready_rx,
            })
        }

        async fn terminate(&self, pid: u32) -> crate::domain::error::Result<()> {
            if let Some((app, tx)) = self.stops.lock().unwrap().remove(&pid) {
                self.terminated.lock().unwrap().push(app);
                let _ = tx.send(0);
            }
            Ok(())
        }

        async fn kill(&self, pid: u32) -> crate::domain::error::Result<()> {
            if let Some((app, tx)) = self.stops.lock().unwrap().remove(&pid) {
                self.terminated.lock().unwrap().push(app);
                let _ = tx.send(-9);
            }
            Ok(())
        }
    }

    struct NoopSampler;

    #[async_trait]
    impl crate::domain::ports::ResourceSampler for NoopSampler {
        async fn sample(
            &self,
            _pid: u32,
        ) -> crate::domain::error::Result<crate::domain::value_objects::HealthSample> {
            Ok(Default::default())
        }
    }

    fn app(id: &str, deps: &[&str], entrypoint: bool) -> Application {
        let mut health = crate::domain::value_objects::HealthPolicy::default();
        health.enabled = false;
        Application::builder(id)
            .command("node")
            .dependencies(deps.iter().map(|s| s.to_string()).collect())
            .entrypoint(entrypoint)
            .health(health)
            .build()
            .unwrap()
    }

    fn service(executor: Arc<OrderedExecutor>) -> WorkerSupervisionService {
        let health = Arc::new(HealthMonitoringService::new(
            Arc::new(NoopSampler),
            Arc::new(MetricsRegistry::new()),
        ));
        WorkerSupervisionService::new(executor, health, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_start_all_follows_order_and_stop_reverses_it() {
        let executor = Arc::new(OrderedExecutor::new());
        let supervisor = service(executor.clone());

        let apps = vec![app("db", &[], false), app("api", &["db"], true)];
        supervisor.start_all(&apps).await.unwrap();
        assert_eq!(
            *executor.spawned.lock().unwrap(),
            vec!["db".to_string(), "api".to_string()]
        );

        supervisor.stop_all(Duration::from_secs(10)).await;
        assert_eq!(
            *executor.terminated.lock().unwrap(),
            vec!["api".to_string(), "db".to_string()]
        );
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_unhealthy_signal_restarts_the_worker() {
        let executor = Arc::new(OrderedExecutor::new());
        let supervisor = service(executor.clone());
        supervisor.start_all(&[app("api", &[], true)]).await.unwrap();

        supervisor
            .signal_sender()
            .send(RuntimeSignal::Unhealthy {
                application: "api".to_string(),
                replica: 0,
            })
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let snaps = supervisor.snapshots_for("api").await.unwrap();
                if snaps[0].restarts == 1 && snaps[0].state == WorkerState::Running {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_source_change_reloads_every_replica() {
        let executor = Arc::new(OrderedExecutor::new());
        let supervisor = service(executor.clone());
        let mut api = app("api", &[], true);
        api.workers = 2;
        supervisor.start_all(&[api]).await.unwrap();

        supervisor
            .signal_sender()
            .send(RuntimeSignal::SourceChanged {
                application: "api".to_string(),
            })
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let snaps = supervisor.snapshots_for("api").await.unwrap();
                if snaps.iter().all(|s| {
                    s.restarts == 1 && s.state == WorkerState::Running
                }) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_evict_all_admits_a_new_application_set() {
        let executor = Arc::new(OrderedExecutor::new());
        let supervisor = service(executor.clone());
        supervisor.start_all(&[app("api", &[], true)]).await.unwrap();

        supervisor.stop_all(Duration::from_secs(10)).await;
        supervisor.evict_all().await;
        assert!(supervisor.snapshots().await.is_empty());
        let err = supervisor.start_application("api").await.unwrap_err();
        assert!(err.is_not_found());

        supervisor
            .start_all(&[app("db", &[], false), app("web", &["db"], true)])
            .await
            .unwrap();
        let snaps = supervisor.snapshots().await;
        assert_eq!(snaps.len(), 2);
        assert!(snaps.iter().all(|s| s.state == WorkerState::Running));
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_application_is_not_found() {
        let executor = Arc::new(OrderedExecutor::new());
        let supervisor = service(executor);
        let err = supervisor.start_application("ghost").await.unwrap_err();
        assert!(err.is_not_found());
        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn test_operator_restart_waits_for_running() {
        let executor = Arc::new(OrderedExecutor::new());
        let supervisor = service(executor.clone());
        supervisor.start_all(&[app("api", &[], true)]).await.unwrap();

        supervisor
            .restart_application("api", RestartReason::Operator)
            .await
            .unwrap();
        let snaps = supervisor.snapshots_for("api").await.unwrap();
        assert_eq!(snaps[0].state, WorkerState::Running);
        assert_eq!(snaps[0].restarts, 1);
        supervisor.shutdown().await;
    }
}
