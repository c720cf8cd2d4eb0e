//! Application entity
//! Fully resolved description of one application in the runtime graph

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::constants::DEFAULT_WORKERS;
use crate::domain::error::{DomainError, Result};
use crate::domain::value_objects::{HealthPolicy, RestartSettings};

/// File-watch filters for an application, resolved from configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WatchSettings {
    /// Watching is off unless the application opts in.
    pub enabled: bool,
    /// Glob patterns a changed path must match; empty allows everything.
    pub allow: Vec<String>,
    /// Glob patterns that exclude a changed path, applied after `allow`.
    pub ignore: Vec<String>,
}

/// One application after configuration resolution: identifiers validated,
/// paths checked, defaults merged with per-application overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: String,
    /// Directory the application lives in, also its worker's cwd.
    pub path: PathBuf,
    /// Program invoked for each worker.
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    /// Number of worker replicas.
    pub workers: usize,
    /// Ids of applications that must be Running before this one starts.
    pub dependencies: Vec<String>,
    /// Whether this application is the runtime's entrypoint.
    pub entrypoint: bool,
    /// TCP port the application serves on, when it serves at all.
    pub port: Option<u16>,
    pub health: HealthPolicy,
    pub restart: RestartSettings,
    pub watch: WatchSettings,
}

impl Application {
    pub fn builder(id: impl Into<String>) -> ApplicationBuilder {
        ApplicationBuilder::new(id)
    }

    /// Address the application listens on, when it has a port.
    pub fn address(&self) -> Option<String> {
        self.port.map(|p| format!("127.0.0.1:{p}"))
    }

    /// Validate the identifier: non-empty, alphanumeric plus `-` and `_`.
    pub fn validate_id(id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(DomainError::InvalidId(
                "application id cannot be empty".to_string(),
            ));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(DomainError::InvalidId(format!(
                "application id '{id}' may only contain alphanumerics, '-' and '_'"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ApplicationBuilder {
    id: String,
    path: PathBuf,
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    workers: usize,
    dependencies: Vec<String>,
    entrypoint: bool,
    port: Option<u16>,
    health: HealthPolicy,
    restart: RestartSettings,
    watch: WatchSettings,
}

impl ApplicationBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            path: PathBuf::new(),
            command: String::new(),
            args: Vec::new(),
            env: HashMap::new(),
            workers: DEFAULT_WORKERS,
            dependencies: Vec::new(),
            entrypoint: false,
            port: None,
            health: HealthPolicy::default(),
            restart: RestartSettings::default(),
            watch: WatchSettings::default(),
        }
    }

    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    pub fn command(mut self, command: impl Into<String>) -> Self {
        self.command = command.into();
        self
    }

    pub fn args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    pub fn env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    pub fn entrypoint(mut self, entrypoint: bool) -> Self {
        self.entrypoint = entrypoint;
        self
    }

    pub fn port(mut self, port: Option<u16>) -> Self {
        self.port = port;
        self
    }

    pub fn health(mut self, health: HealthPolicy) -> Self {
        self.health = health;
        self
    }

    pub fn restart(mut self, restart: RestartSettings) -> Self {
        self.restart = restart;
        self
    }

    pub fn watch(mut self, watch: WatchSettings) -> Self {
        self.watch = watch;
        self
    }

    pub fn build(self) -> Result<Application> {
        Application::validate_id(&self.id)?;
        if self.command.is_empty() {
            return Err(DomainError::ConfigInvalid(format!(
                "application '{}' has no command",
                self.id
            )));
        }
        if self.workers == 0 {
            return Err(DomainError::ConfigInvalid(format!(
                "application '{}' must have at least one worker",
                self.id
            )));
        }
        if self.dependencies.iter().any(|d| d == &self.id) {
            return Err(DomainError::ConfigInvalid(format!(
                "application '{}' cannot depend on itself",
                self.id
            )));
        }
        self.health.validate()?;

        Ok(Application {
            id: self.id,
            path: self.path,
            command: self.command,
            args: self.args,
            env: self.env,
            workers: self.workers,
            dependencies: self.dependencies,
            entrypoint: self.entrypoint,
            port: self.port,
            health: self.health,
            restart: self.restart,
            watch: self.watch,
        })
    }
}
