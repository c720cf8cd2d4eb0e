//! Configuration loading
//! YAML documents on disk, merged and resolved into domain entities

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::domain::constants::*;
use crate::domain::entities::{Application, WatchSettings};
use crate::domain::error::{DomainError, Result};
use crate::domain::value_objects::{HealthPolicy, RestartOnError, RestartSettings};

/// `restart_on_error` accepts a boolean or a delay in milliseconds.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(untagged)]
enum RestartOnErrorRaw {
    Flag(bool),
    DelayMs(u64),
}

impl From<RestartOnErrorRaw> for RestartOnError {
    fn from(raw: RestartOnErrorRaw) -> Self {
        match raw {
            RestartOnErrorRaw::Flag(false) => RestartOnError::Never,
            RestartOnErrorRaw::Flag(true) => {
                RestartOnError::After(DEFAULT_WORKERS_RESTART_DELAY_MS)
            }
            RestartOnErrorRaw::DelayMs(ms) => RestartOnError::After(ms),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct WatchOptionsDoc {
    #[serde(default)]
    allow: Vec<String>,
    #[serde(default)]
    ignore: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct HealthDoc {
    enabled: Option<bool>,
    interval_ms: Option<u64>,
    grace_period_ms: Option<u64>,
    max_unhealthy_checks: Option<u32>,
    max_elu: Option<f64>,
    max_heap_used: Option<f64>,
    max_heap_total: Option<u64>,
    max_young_generation: Option<u64>,
}

impl HealthDoc {
    /// Layer this document's set fields over `base`.
    fn overlay(&self, base: &HealthPolicy) -> HealthPolicy {
        HealthPolicy {
            enabled: self.enabled.unwrap_or(base.enabled),
            interval_ms: self.interval_ms.unwrap_or(base.interval_ms),
            grace_period_ms: self.grace_period_ms.unwrap_or(base.grace_period_ms),
            max_unhealthy_checks: self
                .max_unhealthy_checks
                .unwrap_or(base.max_unhealthy_checks),
            max_elu: self.max_elu.unwrap_or(base.max_elu),
            max_heap_used: self.max_heap_used.unwrap_or(base.max_heap_used),
            max_heap_total: self.max_heap_total.or(base.max_heap_total),
            max_young_generation: self
                .max_young_generation
                .or(base.max_young_generation),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct GracefulShutdownDoc {
    runtime_ms: Option<u64>,
    application_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct ApplicationDoc {
    id: String,
    path: String,
    /// Per-application config file, relative to `path`.
    #[serde(default = "default_app_config")]
    config: String,
    #[serde(default)]
    entrypoint: bool,
    workers: Option<usize>,
    #[serde(default)]
    dependencies: Vec<String>,
    #[serde(default)]
    watch: bool,
    watch_options: Option<WatchOptionsDoc>,
    restart_on_error: Option<RestartOnErrorRaw>,
    health: Option<HealthDoc>,
}

fn default_app_config() -> String {
    "app.yaml".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct RuntimeDoc {
    applications: Vec<ApplicationDoc>,
    health: Option<HealthDoc>,
    graceful_shutdown: Option<GracefulShutdownDoc>,
    restart_on_error: Option<RestartOnErrorRaw>,
}

/// Per-application document, loaded from inside the application directory.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct AppDoc {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    port: Option<u16>,
    stop_timeout_ms: Option<u64>,
    start_timeout_ms: Option<u64>,
    health: Option<HealthDoc>,
}

/// The fully loaded runtime configuration, before graph resolution.
#[derive(Debug, Clone)]
pub struct RuntimeConfiguration {
    pub applications: Vec<Application>,
    pub runtime_shutdown_ms: u64,
    /// Raw view of the root document, served by the `config` command.
    pub raw: serde_json::Value,
    pub source: PathBuf,
}

/// Loads and merges the root document plus one document per application.
pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load(path: &Path) -> Result<RuntimeConfiguration> {
        let text = std::fs::read_to_string(path).map_err(|err| {
            DomainError::ConfigInvalid(format!(
                "cannot read {}: {err}",
                path.display()
            ))
        })?;
        let doc: RuntimeDoc = serde_yaml::from_str(&text)
            .map_err(|err| DomainError::ConfigInvalid(err.to_string()))?;
        let raw = serde_json::to_value(&doc)
            .map_err(|err| DomainError::ConfigInvalid(err.to_string()))?;

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        let base_health = doc
            .health
            .as_ref()
            .map(|h| h.overlay(&HealthPolicy::default()))
            .unwrap_or_default();
        let base_restart: RestartOnError = doc
            .restart_on_error
            .map(Into::into)
            .unwrap_or_default();
        let shutdown = doc.graceful_shutdown.as_ref();
        let application_shutdown_ms = shutdown
            .and_then(|g| g.application_ms)
            .unwrap_or(DEFAULT_APPLICATION_SHUTDOWN_MS);
        let runtime_shutdown_ms = shutdown
            .and_then(|g| g.runtime_ms)
            .unwrap_or(DEFAULT_RUNTIME_SHUTDOWN_MS);

        let mut applications = Vec::with_capacity(doc.applications.len());
        for app_doc in &doc.applications {
            applications.push(Self::resolve_application(
                base_dir,
                app_doc,
                &base_health,
                base_restart,
                application_shutdown_ms,
            )?);
        }

        debug!(
            source = %path.display(),
            applications = applications.len(),
            "configuration loaded"
        );
        Ok(RuntimeConfiguration {
            applications,
            runtime_shutdown_ms,
            raw,
            source: path.to_path_buf(),
        })
    }

    fn resolve_application(
        base_dir: &Path,
        doc: &ApplicationDoc,
        base_health: &HealthPolicy,
        base_restart: RestartOnError,
        application_shutdown_ms: u64,
    ) -> Result<Application> {
        let app_dir = base_dir.join(&doc.path);
        if !app_dir.is_dir() {
            return Err(DomainError::PathNotFound(format!(
                "application '{}': {}",
                doc.id,
                app_dir.display()
            )));
        }
        let app_config = app_dir.join(&doc.config);
        let text = std::fs::read_to_string(&app_config).map_err(|err| {
            DomainError::ConfigInvalid(format!(
                "application '{}': cannot read {}: {err}",
                doc.id,
                app_config.display()
            ))
        })?;
        let app: AppDoc = serde_yaml::from_str(&text).map_err(|err| {
            DomainError::ConfigInvalid(format!("application '{}': {err}", doc.id))
        })?;

        let mut health = base_health.clone();
        if let Some(h) = &doc.health {
            health = h.overlay(&health);
        }
        if let Some(h) = &app.health {
            health = h.overlay(&health);
        }

        let restart = RestartSettings {
            on_error: doc.restart_on_error.map(Into::into).unwrap_or(base_restart),
            budget: DEFAULT_RESTART_BUDGET,
            window_ms: DEFAULT_RESTART_WINDOW_MS,
            shutdown_timeout_ms: app
                .stop_timeout_ms
                .unwrap_or(application_shutdown_ms),
            start_timeout_ms: app.start_timeout_ms.unwrap_or(DEFAULT_START_TIMEOUT_MS),
        };

        let watch = WatchSettings {
            enabled: doc.watch,
            allow: doc
                .watch_options
                .as_ref()
                .map(|w| w.allow.clone())
                .unwrap_or_default(),
            ignore: doc
                .watch_options
                .as_ref()
                .map(|w| w.ignore.clone())
                .unwrap_or_default(),
        };

        Application::builder(&doc.id)
            .path(app_dir)
            .command(app.command)
            .args(app.args)
            .env(app.env)
            .workers(doc.workers.unwrap_or(DEFAULT_WORKERS))
            .dependencies(doc.dependencies.clone())
            .entrypoint(doc.entrypoint)
            .port(app.port)
            .health(health)
            .restart(restart)
            .watch(watch)
            .build()
    }
}
