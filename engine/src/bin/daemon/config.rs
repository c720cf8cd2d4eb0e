//! Daemon configuration from environment variables

use std::path::PathBuf;

/// Settings the daemon reads from `APPRT_*` variables, with the config
/// file path taken from the first positional argument when given.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub config_path: Option<PathBuf>,
    /// Filter directive for the tracing subscriber.
    pub log_filter: String,
    /// Override for the management socket directory.
    pub runtime_dir: Option<PathBuf>,
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        Self {
            config_path: std::env::var_os("APPRT_CONFIG").map(PathBuf::from),
            log_filter: std::env::var("APPRT_LOG").unwrap_or_else(|_| "info".to_string()),
            runtime_dir: std::env::var_os("APPRT_RUNTIME_DIR").map(PathBuf::from),
        }
    }

    /// Overlay the positional config path, which wins over the variable.
    pub fn with_args(mut self, mut args: impl Iterator<Item = String>) -> Self {
        if let Some(path) = args.next() {
            self.config_path = Some(PathBuf::from(path));
        }
        self
    }
}
