//! Change watching
//! Filters filesystem events per application and debounces reload signals

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use glob_match::glob_match;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::constants::{WATCH_DEBOUNCE_MS, WATCH_DEFAULT_IGNORED_DIR};
use crate::domain::entities::{Application, WatchSettings};
use crate::domain::error::Result;
use crate::domain::ports::FsEvents;
use crate::domain::services::worker_supervision::RuntimeSignal;

/// Per-application path filter built from its watch settings.
///
/// Ignore patterns win over allow patterns, and an empty allow list admits
/// everything. Paths under a `node_modules` directory are always ignored.
#[derive(Debug, Clone)]
pub struct WatchFilter {
    allow: Vec<String>,
    ignore: Vec<String>,
}

impl WatchFilter {
    pub fn new(settings: &WatchSettings) -> Self {
        Self {
            allow: settings.allow.clone(),
            ignore: settings.ignore.clone(),
        }
    }

    /// Decide whether a path, relative to the application root, is relevant.
    pub fn matches(&self, relative: &Path) -> bool {
        if relative
            .components()
            .any(|c| c.as_os_str() == WATCH_DEFAULT_IGNORED_DIR)
        {
            return false;
        }
        let candidate = relative.to_string_lossy();
        if self.ignore.iter().any(|p| glob_match(p, &candidate)) {
            return false;
        }
        if self.allow.is_empty() {
            return true;
        }
        self.allow.iter().any(|p| glob_match(p, &candidate))
    }
}

struct WatchedRoot {
    application: String,
    root: PathBuf,
    filter: WatchFilter,
}

/// Watches the source trees of opted-in applications and signals the
/// supervisor when a relevant file changes.
///
/// Raw events are debounced: the first relevant event opens a window of
/// `WATCH_DEBOUNCE_MS`, further events inside it are coalesced, and one
/// signal per affected application is emitted when the window closes.
pub struct ChangeWatchService {
    fs_events: Arc<dyn FsEvents>,
}

impl ChangeWatchService {
    pub fn new(fs_events: Arc<dyn FsEvents>) -> Self {
        Self { fs_events }
    }

    /// Start watching. Returns `Ok(None)` when no application opted in.
    pub async fn spawn(
        &self,
        applications: &[Application],
        signal_tx: mpsc::Sender<RuntimeSignal>,
        cancel: CancellationToken,
    ) -> Result<Option<JoinHandle<()>>> {
        let watched: Vec<WatchedRoot> = applications
            .iter()
            .filter(|a| a.watch.enabled)
            .map(|a| WatchedRoot {
                application: a.id.clone(),
                root: a.path.clone(),
                filter: WatchFilter::new(&a.watch),
            })
            .collect();

        if watched.is_empty() {
            return Ok(None);
        }

        let roots: Vec<PathBuf> = watched.iter().map(|w| w.root.clone()).collect();
        let mut events = self.fs_events.watch(roots).await?;
        info!(applications = watched.len(), "change watching started");

        let handle = tokio::spawn(async move {
            let debounce = Duration::from_millis(WATCH_DEBOUNCE_MS);
            loop {
                let path = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Some(path) => path,
                        None => break,
                    },
                };

                let mut pending = BTreeSet::new();
                if let Some(app) = classify(&watched, &path) {
                    pending.insert(app);
                }

                // Coalesce the burst before signalling.
                let window = tokio::time::sleep(debounce);
                tokio::pin!(window);
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = &mut window => break,
                        event = events.recv() => match event {
                            Some(path) => {
                                if let Some(app) = classify(&watched, &path) {
                                    pending.insert(app);
                                }
                            }
                            None => break,
                        },
                    }
                }

                for application in pending {
                    debug!(%application, "source change detected");
                    if signal_tx
                        .send(RuntimeSignal::SourceChanged { application })
                        .await
                        .is_err()
                    {
                        warn!("supervisor gone, change watching stops");
                        return;
                    }
                }
            }
        });

        Ok(Some(handle))
    }
}

/// Map a changed path to the application owning it, if any filter admits it.
/// The longest matching root wins when roots nest.
fn classify(watched: &[WatchedRoot], path: &Path) -> Option<String> {
    watched
        .iter()
        .filter(|w| path.starts_with(&w.root))
        .max_by_key(|w| w.root.as_os_str().len())
        .and_then(|w| {
            let relative = path.strip_prefix(&w.root).ok()?;
            w.filter
                .matches(relative)
                .then(|| w.application.clone())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    fn settings(allow: &[&str], ignore: &[&str]) -> WatchSettings {
        WatchSettings {
            enabled: true,
            allow: allow.iter().map(|s| s.to_string()).collect(),
            ignore: ignore.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_filter_empty_allow_admits_everything() {
        let filter = WatchFilter::new(&settings(&[], &[]));
        assert!(filter.matches(Path::new("src/index.js")));
    }

    #[test]
    fn test_filter_node_modules_always_ignored() {
        let filter = WatchFilter::new(&settings(&[], &[]));
        assert!(!filter.matches(Path::new("node_modules/left-pad/index.js")));
        assert!(!filter.matches(Path::new("deep/node_modules/x.js")));
    }

    #[test]
    fn test_filter_ignore_wins_over_allow() {
        let filter = WatchFilter::new(&settings(&["**/*.js"], &["dist/**"]));
        assert!(filter.matches(Path::new("src/app.js")));
        assert!(!filter.matches(Path::new("dist/app.js")));
        assert!(!filter.matches(Path::new("src/app.ts")));
    }

    struct StubEvents {
        paths: Vec<PathBuf>,
    }

    #[async_trait]
    impl FsEvents for StubEvents {
        async fn watch(&self, _roots: Vec<PathBuf>) -> Result<mpsc::Receiver<PathBuf>> {
            let (tx, rx) = mpsc::channel(16);
            for path in self.paths.clone() {
                tx.send(path).await.ok();
            }
            tokio::spawn(async move {
                // Keep the sender alive past the debounce window.
                tokio::time::sleep(Duration::from_millis(500)).await;
                drop(tx);
            });
            Ok(rx)
        }
    }

    fn watched_app(id: &str, root: &str) -> Application {
        Application::builder(id)
            .command("node")
            .path(root)
            .watch(settings(&[], &[]))
            .entrypoint(true)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_burst_coalesces_into_one_signal() {
        let events = Arc::new(StubEvents {
            paths: vec![
                PathBuf::from("/srv/api/src/a.js"),
                PathBuf::from("/srv/api/src/b.js"),
                PathBuf::from("/srv/api/node_modules/dep.js"),
            ],
        });
        let service = ChangeWatchService::new(events);
        let (signal_tx, mut signal_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let handle = service
            .spawn(&[watched_app("api", "/srv/api")], signal_tx, cancel.clone())
            .await
            .unwrap()
            .unwrap();

        let signal = tokio::time::timeout(Duration::from_secs(2), signal_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            signal,
            RuntimeSignal::SourceChanged { ref application } if application == "api"
        ));

        // The burst produced exactly one signal.
        assert!(signal_rx.try_recv().is_err());
        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_no_watch_opt_in_spawns_nothing() {
        let events = Arc::new(StubEvents { paths: vec![] });
        let service = ChangeWatchService::new(events);
        let (signal_tx, _signal_rx) = mpsc::channel(16);
        let app = Application::builder("api")
            .command("node")
            .entrypoint(true)
            .build()
            .unwrap();
        let handle = service
            .spawn(&[app], signal_tx, CancellationToken::new())
            .await
            .unwrap();
        assert!(handle.is_none());
    }
}
