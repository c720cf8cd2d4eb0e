//! Notify watcher
//! Filesystem events through the notify crate, bridged onto tokio channels

use std::path::PathBuf;

use async_trait::async_trait;
use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::domain::error::{DomainError, Result};
use crate::domain::ports::FsEvents;

const EVENT_CHANNEL_CAPACITY: usize = 1_024;

/// `FsEvents` adapter over `notify`'s recommended platform watcher.
///
/// The watcher runs on its own thread; events are forwarded as plain paths
/// onto a tokio channel. Dropping the receiver ends the watch, since the
/// forwarding callback keeps the watcher alive only as long as sends
/// succeed.
pub struct NotifyWatcher;

impl NotifyWatcher {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NotifyWatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FsEvents for NotifyWatcher {
    async fn watch(&self, roots: Vec<PathBuf>) -> Result<mpsc::Receiver<PathBuf>> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let probe = tx.clone();

        let mut watcher =
            notify::recommended_watcher(move |event: notify::Result<Event>| {
                let event = match event {
                    Ok(event) => event,
                    Err(err) => {
                        warn!(%err, "filesystem watch error");
                        return;
                    }
                };
                if !matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                ) {
                    return;
                }
                for path in event.paths {
                    // Full channel or closed receiver both mean drop.
                    let _ = tx.try_send(path);
                }
            })
            .map_err(|err| DomainError::Io(err.to_string()))?;

        for root in &roots {
            watcher
                .watch(root, RecursiveMode::Recursive)
                .map_err(|err| {
                    DomainError::PathNotFound(format!("{}: {err}", root.display()))
                })?;
            debug!(root = %root.display(), "watching for changes");
        }

        // Keep the watcher alive until the receiver goes away.
        tokio::spawn(async move {
            let _watcher = watcher;
            probe.closed().await;
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_write_produces_event() {
        let dir = tempdir().unwrap();
        let watcher = NotifyWatcher::new();
        let mut events = watcher.watch(vec![dir.path().to_path_buf()]).await.unwrap();

        // Give the backend a moment to arm before writing.
        tokio::time::sleep(Duration::from_millis(200)).await;
        std::fs::write(dir.path().join("index.js"), b"x").unwrap();

        let path = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("channel closed");
        assert!(path.ends_with("index.js"));
    }

    #[tokio::test]
    async fn test_missing_root_errors() {
        let watcher = NotifyWatcher::new();
        let result = watcher
            .watch(vec![PathBuf::from("/definitely/not/here")])
            .await;
        assert!(result.is_err());
    }
}
