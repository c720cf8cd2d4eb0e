//! Shared harness for the end-to-end tests.
//!
//! Each test gets its own temp directory holding the runtime configuration,
//! the application directories and the management socket, plus an
//! in-process daemon: a real `Runtime` over real `sh` worker processes,
//! served by a real `ManagementServer` on a unix socket.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use runtime_engine::adapters::management::{ManagementClient, ManagementServer, Request};
use runtime_engine::application::Runtime;
use runtime_engine::domain::services::runtime_directory;

/// A worker script that reports readiness and then idles.
pub const IDLE_APP: &str = "command: sh\nargs: ['-c', 'echo listening; exec sleep 600']\n";

/// A worker script that reports readiness and exits shortly after.
pub const FLAKY_APP: &str =
    "command: sh\nargs: ['-c', 'echo listening; sleep 0.2; exit 1']\n";

pub struct TestDaemon {
    pub runtime: Arc<Runtime>,
    pub socket: PathBuf,
    pub runtime_dir: PathBuf,
    pub dir: TempDir,
    cancel: CancellationToken,
    server: JoinHandle<()>,
}

/// Write one application directory with its `app.yaml`.
pub fn write_app(root: &Path, name: &str, app_yaml: &str) {
    let app_dir = root.join(name);
    std::fs::create_dir_all(&app_dir).expect("create app dir");
    std::fs::write(app_dir.join("app.yaml"), app_yaml).expect("write app.yaml");
}

/// Boot a daemon from a root config body. `{root}` in the body is replaced
/// with the temp directory path.
pub async fn launch(root_yaml: &str, apps: &[(&str, &str)]) -> TestDaemon {
    let dir = TempDir::new().expect("tempdir");
    for (name, body) in apps {
        write_app(dir.path(), name, body);
    }
    let config_path = dir.path().join("runtime.yaml");
    let body = root_yaml.replace("{root}", &dir.path().display().to_string());
    std::fs::write(&config_path, body).expect("write runtime.yaml");

    let runtime_dir = dir.path().join("run");
    runtime_directory::ensure_runtime_dir(&runtime_dir).expect("runtime dir");

    let runtime = Runtime::from_config(&config_path)
        .await
        .expect("runtime assembles")
        .with_runtime_dir(runtime_dir.clone());
    let runtime = Arc::new(runtime);

    let socket = runtime_directory::socket_path(&runtime_dir, std::process::id());
    let cancel = CancellationToken::new();
    let server = ManagementServer::serve(runtime.clone(), socket.clone(), cancel.clone())
        .await
        .expect("server binds");

    runtime.start().await.expect("runtime starts");

    TestDaemon {
        runtime,
        socket,
        runtime_dir,
        dir,
        cancel,
        server,
    }
}

impl TestDaemon {
    pub async fn client(&self) -> ManagementClient {
        ManagementClient::connect(&self.socket)
            .await
            .expect("client connects")
    }

    /// One-shot request against a fresh connection.
    pub async fn call(&self, request: Request) -> runtime_engine::adapters::management::Response {
        self.client()
            .await
            .call(&request)
            .await
            .expect("request round trip")
    }

    /// Poll `ps` until `predicate` holds for the workers array.
    pub async fn wait_for_ps(
        &self,
        predicate: impl Fn(&[serde_json::Value]) -> bool,
        timeout: Duration,
    ) {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let response = self.call(Request::new("ps")).await;
            let status = response.result.expect("ps result");
            let workers = status["workers"].as_array().expect("workers").clone();
            if predicate(&workers) {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("condition not reached, last status: {workers:?}");
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    pub async fn shutdown(self) {
        self.runtime.shutdown().await;
        self.cancel.cancel();
        let _ = self.server.await;
    }
}

/// Find a worker row by application id and replica.
pub fn worker<'a>(
    workers: &'a [serde_json::Value],
    application: &str,
    replica: u64,
) -> Option<&'a serde_json::Value> {
    workers.iter().find(|w| {
        w["application"] == application && w["replica"] == replica
    })
}
