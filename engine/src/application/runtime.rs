//! Runtime façade
//! Composition root wiring configuration, supervision and aggregation

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::domain::entities::Application;
use crate::domain::error::{DomainError, Result};
use crate::domain::ports::{ApplicationRepository, FsEvents, ResourceSampler, WorkerExecutor};
use crate::domain::services::{
    runtime_directory, ChangeWatchService, ConfigResolutionService,
    HealthMonitoringService, LogBus, MetricsRegistry, RestartReason,
    WorkerSupervisionService,
};
use crate::domain::value_objects::LogRecord;
use crate::infrastructure::{
    ConfigLoader, InMemoryApplicationRepository, NotifyWatcher, ProcSampler,
    RuntimeConfiguration, TokioWorkerExecutor,
};

/// One running orchestrator instance: the resolved configuration, its
/// supervisor, health monitors, change watcher and aggregation surfaces.
/// Management commands all funnel through here.
pub struct Runtime {
    state: RwLock<RuntimeState>,
    repository: Arc<dyn ApplicationRepository>,
    supervisor: Arc<WorkerSupervisionService>,
    change_watch: ChangeWatchService,
    metrics: Arc<MetricsRegistry>,
    bus: LogBus,
    cancel: CancellationToken,
    watch_task: Mutex<Option<JoinHandle<()>>>,
    runtime_dir: PathBuf,
}

/// The resolved configuration and the entrypoint derived from it. Readers
/// take the lock briefly; a root-document reload replaces the whole value
/// under the write half, so nobody observes a half-updated graph.
struct RuntimeState {
    config: RuntimeConfiguration,
    entrypoint: String,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("runtime_dir", &self.runtime_dir)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    /// Load the configuration at `path` and assemble a runtime around it.
    pub async fn from_config(path: &std::path::Path) -> Result<Self> {
        let config = ConfigLoader::load(path)?;
        let bus = LogBus::new();
        let executor: Arc<dyn WorkerExecutor> =
            Arc::new(TokioWorkerExecutor::new(bus.clone()));
        let sampler: Arc<dyn ResourceSampler> = Arc::new(ProcSampler::new());
        let fs_events: Arc<dyn FsEvents> = Arc::new(NotifyWatcher::new());
        Self::assemble(config, executor, sampler, fs_events, bus).await
    }

    /// Assemble from explicit adapters. Tests feed in fakes through here.
    pub async fn assemble(
        config: RuntimeConfiguration,
        executor: Arc<dyn WorkerExecutor>,
        sampler: Arc<dyn ResourceSampler>,
        fs_events: Arc<dyn FsEvents>,
        bus: LogBus,
    ) -> Result<Self> {
        let state = Self::resolve(config)?;

        let repository: Arc<dyn ApplicationRepository> =
            Arc::new(InMemoryApplicationRepository::new());
        for application in &state.config.applications {
            repository.save(application.clone()).await?;
        }

        let cancel = CancellationToken::new();
        let metrics = Arc::new(MetricsRegistry::new());
        let health = Arc::new(HealthMonitoringService::new(sampler, metrics.clone()));
        let supervisor = Arc::new(WorkerSupervisionService::new(
            executor,
            health,
            cancel.clone(),
        ));
        let change_watch = ChangeWatchService::new(fs_events);

        Ok(Self {
            state: RwLock::new(state),
            repository,
            supervisor,
            change_watch,
            metrics,
            bus,
            cancel,
            watch_task: Mutex::new(None),
            runtime_dir: runtime_directory::runtime_dir(),
        })
    }

    /// Topologically order the applications and identify the entrypoint.
    fn resolve(mut config: RuntimeConfiguration) -> Result<RuntimeState> {
        let resolver = ConfigResolutionService::new();
        let ordered = resolver.resolve(config.applications.clone())?;
        let entrypoint = ordered
            .iter()
            .find(|a| a.entrypoint)
            .map(|a| a.id.clone())
            .ok_or(DomainError::MissingEntrypoint)?;
        config.applications = ordered;
        Ok(RuntimeState { config, entrypoint })
    }

    /// Override where sockets and profile artifacts live.
    pub fn with_runtime_dir(mut self, dir: PathBuf) -> Self {
        self.runtime_dir = dir;
        self
    }

    pub fn runtime_dir(&self) -> &std::path::Path {
        &self.runtime_dir
    }

    pub fn log_bus(&self) -> &LogBus {
        &self.bus
    }

    /// Bring every application up in dependency order, then start watching
    /// the opted-in source trees.
    pub async fn start(&self) -> Result<()> {
        let state = self.state.read().await;
        self.supervisor.start_all(&state.config.applications).await?;

        let watch = self
            .change_watch
            .spawn(
                &state.config.applications,
                self.supervisor.signal_sender(),
                self.cancel.child_token(),
            )
            .await?;
        *self.watch_task.lock().await = watch;

        info!(
            entrypoint = %state.entrypoint,
            applications = state.config.applications.len(),
            "runtime started"
        );
        Ok(())
    }

    /// Stop everything in reverse start order, bounded by the configured
    /// runtime shutdown window, and tear the actors down.
    pub async fn shutdown(&self) {
        if let Some(task) = self.watch_task.lock().await.take() {
            task.abort();
        }
        let shutdown_ms = self.state.read().await.config.runtime_shutdown_ms;
        self.supervisor
            .stop_all(Duration::from_millis(shutdown_ms))
            .await;
        self.supervisor.shutdown().await;
        info!("runtime stopped");
    }

    async fn ensure_known(&self, id: &str) -> Result<()> {
        if self.repository.contains(id).await? {
            Ok(())
        } else {
            Err(DomainError::ApplicationNotFound)
        }
    }

    /// `ps`: one row per worker, plus daemon identity for discovery.
    pub async fn status(&self) -> Value {
        let workers: Vec<Value> = self
            .supervisor
            .snapshots()
            .await
            .into_iter()
            .map(|snapshot| serde_json::to_value(&snapshot).unwrap_or(Value::Null))
            .collect();
        let state = self.state.read().await;
        json!({
            "pid": std::process::id(),
            "entrypoint": state.entrypoint,
            "config": state.config.source.display().to_string(),
            "workers": workers,
        })
    }

    /// `applications`: the resolved graph in start order.
    pub async fn applications(&self) -> Result<Value> {
        let applications: Vec<Value> = self
            .repository
            .list()
            .await?
            .into_iter()
            .map(|a| {
                json!({
                    "id": a.id,
                    "path": a.path.display().to_string(),
                    "workers": a.workers,
                    "dependencies": a.dependencies,
                    "entrypoint": a.entrypoint,
                    "watch": a.watch.enabled,
                    "address": a.address(),
                })
            })
            .collect();
        Ok(Value::Array(applications))
    }

    /// `config`: the raw root document as loaded.
    pub async fn config_json(&self) -> Value {
        self.state.read().await.config.raw.clone()
    }

    /// `env`: the environment one application's workers receive.
    pub async fn env_json(&self, target: &str) -> Result<Value> {
        let application = self.repository.get(target).await?;
        Ok(serde_json::to_value(&application.env)
            .map_err(|err| DomainError::Io(err.to_string()))?)
    }

    /// `metrics`: latest health samples for one application's workers.
    pub async fn metrics_json(&self, target: &str) -> Result<Value> {
        self.ensure_known(target).await?;
        let latest: Vec<Value> = self
            .metrics
            .latest(target)
            .into_iter()
            .map(|(replica, health)| {
                let mut value =
                    serde_json::to_value(&health).unwrap_or_else(|_| json!({}));
                if let Some(object) = value.as_object_mut() {
                    object.insert("replica".to_string(), json!(replica));
                }
                value
            })
            .collect();
        Ok(Value::Array(latest))
    }

    /// `inject`: forward an HTTP request to the application's local address.
    pub async fn inject(&self, target: &str, args: Value) -> Result<Value> {
        let application = self.repository.get(target).await?;
        let address = application.address().ok_or_else(|| {
            DomainError::InjectFailed(format!("application '{target}' has no port"))
        })?;

        let method = args
            .get("method")
            .and_then(|m| m.as_str())
            .unwrap_or("GET")
            .to_uppercase();
        let path = args.get("path").and_then(|p| p.as_str()).unwrap_or("/");
        let body = args
            .get("body")
            .and_then(|b| b.as_str())
            .map(str::to_string);
        let url = format!("http://{address}{path}");

        // ureq is blocking; keep it off the runtime threads.
        let response = tokio::task::spawn_blocking(move || {
            let agent = ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(10))
                .build();
            let request = agent.request(&method, &url);
            let result = match body {
                Some(body) => request.send_string(&body),
                None => request.call(),
            };
            match result {
                Ok(response) => {
                    let status = response.status();
                    let body = response.into_string().unwrap_or_default();
                    Ok((status, body))
                }
                Err(ureq::Error::Status(status, response)) => {
                    let body = response.into_string().unwrap_or_default();
                    Ok((status, body))
                }
                Err(err) => Err(DomainError::InjectFailed(err.to_string())),
            }
        })
        .await
        .map_err(|err| DomainError::InjectFailed(err.to_string()))??;

        Ok(json!({
            "status": response.0,
            "body": response.1,
        }))
    }

    pub fn subscribe_logs(&self) -> broadcast::Receiver<LogRecord> {
        self.bus.subscribe()
    }

    /// Application ids in start order.
    async fn start_order(&self) -> Vec<String> {
        self.state
            .read()
            .await
            .config
            .applications
            .iter()
            .map(|a| a.id.clone())
            .collect()
    }

    /// `start`: one application, or everything in start order.
    pub async fn start_applications(&self, target: Option<&str>) -> Result<()> {
        match target {
            Some(id) => {
                self.ensure_known(id).await?;
                self.supervisor.start_application(id).await
            }
            None => {
                for id in self.start_order().await {
                    self.supervisor.start_application(&id).await?;
                }
                Ok(())
            }
        }
    }

    /// `stop`: one application, or everything in reverse start order.
    /// Stopped workers also drop out of the metrics registry.
    pub async fn stop_applications(&self, target: Option<&str>) -> Result<()> {
        match target {
            Some(id) => {
                self.ensure_known(id).await?;
                self.supervisor.stop_application(id).await?;
                self.forget_metrics(id).await;
                Ok(())
            }
            None => {
                for id in self.start_order().await.iter().rev() {
                    self.supervisor.stop_application(id).await?;
                    self.forget_metrics(id).await;
                }
                Ok(())
            }
        }
    }

    async fn forget_metrics(&self, id: &str) {
        let state = self.state.read().await;
        if let Some(application) =
            state.config.applications.iter().find(|a| a.id == id)
        {
            for replica in 0..application.workers {
                self.metrics.forget(id, replica);
            }
        }
    }

    pub async fn restart_applications(&self, target: Option<&str>) -> Result<()> {
        self.signal_restart(target, RestartReason::Operator).await
    }

    /// `reload`: with a target, a restart of that application attributed to
    /// a source change. Without one, the root document is read and resolved
    /// again and the runtime restarts on the new graph; a document that
    /// fails validation is rejected and the running configuration stays in
    /// effect.
    pub async fn reload_applications(&self, target: Option<&str>) -> Result<()> {
        match target {
            Some(_) => {
                self.signal_restart(target, RestartReason::SourceChanged).await
            }
            None => self.reload_configuration().await,
        }
    }

    async fn reload_configuration(&self) -> Result<()> {
        let (source, shutdown_ms, old_ids) = {
            let state = self.state.read().await;
            let ids: Vec<String> = state
                .config
                .applications
                .iter()
                .map(|a| a.id.clone())
                .collect();
            (
                state.config.source.clone(),
                state.config.runtime_shutdown_ms,
                ids,
            )
        };
        // Nothing is torn down until the new document resolves.
        let next = Self::resolve(ConfigLoader::load(&source)?)?;

        info!(
            config = %source.display(),
            applications = next.config.applications.len(),
            "root configuration reloaded, restarting runtime"
        );

        eprintln!("DBG reload: aborting watch task");
        if let Some(task) = self.watch_task.lock().await.take() {
            task.abort();
        }
        eprintln!("DBG reload: stop_all");
        self.supervisor
            .stop_all(Duration::from_millis(shutdown_ms))
            .await;
        eprintln!("DBG reload: forget_metrics");
        for id in &old_ids {
            self.forget_metrics(id).await;
        }
        eprintln!("DBG reload: evict_all");
        self.supervisor.evict_all().await;

        eprintln!("DBG reload: repository swap");
        self.repository.clear().await?;
        for application in &next.config.applications {
            self.repository.save(application.clone()).await?;
        }
        eprintln!("DBG reload: state write");
        *self.state.write().await = next;

        eprintln!("DBG reload: start_all");
        let state = self.state.read().await;
        self.supervisor.start_all(&state.config.applications).await?;
        eprintln!("DBG reload: start_all done");
        let watch = self
            .change_watch
            .spawn(
                &state.config.applications,
                self.supervisor.signal_sender(),
                self.cancel.child_token(),
            )
            .await?;
        *self.watch_task.lock().await = watch;
        Ok(())
    }

    async fn signal_restart(
        &self,
        target: Option<&str>,
        reason: RestartReason,
    ) -> Result<()> {
        match target {
            Some(id) => {
                self.ensure_known(id).await?;
                self.supervisor.restart_application(id, reason).await
            }
            None => {
                for id in self.start_order().await {
                    self.supervisor.restart_application(&id, reason).await?;
                }
                Ok(())
            }
        }
    }

    /// `pprof start`: begin collecting a sample time series.
    pub async fn pprof_start(&self, target: &str) -> Result<Value> {
        self.ensure_known(target).await?;
        self.metrics.start_profile(target)?;
        Ok(json!({ "profiling": target }))
    }

    /// `pprof stop`: write the collected series as a JSON artifact and
    /// report its path.
    pub async fn pprof_stop(&self, target: &str) -> Result<Value> {
        self.ensure_known(target).await?;
        let entries = self.metrics.stop_profile(target)?;

        let dir = runtime_directory::profiles_dir(&self.runtime_dir);
        std::fs::create_dir_all(&dir)?;
        let file = dir.join(format!(
            "{target}-{}-{}.json",
            std::process::id(),
            entries.len()
        ));
        let artifact = json!({
            "application": target,
            "samples": entries,
        });
        std::fs::write(
            &file,
            serde_json::to_vec_pretty(&artifact)
                .map_err(|err| DomainError::Io(err.to_string()))?,
        )?;

        Ok(json!({
            "application": target,
            "samples": entries.len(),
            "artifact": file.display().to_string(),
        }))
    }
}
