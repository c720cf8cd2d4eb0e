//! FsEvents port
//! Raw filesystem change notifications, before filtering or debouncing

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::domain::error::Result;

/// Source of raw filesystem change events for a set of watched roots.
#[async_trait]
pub trait FsEvents: Send + Sync {
    /// Start watching the given roots recursively. Changed paths are sent
    /// on the returned channel until the watcher is dropped.
    async fn watch(&self, roots: Vec<PathBuf>) -> Result<mpsc::Receiver<PathBuf>>;
}
