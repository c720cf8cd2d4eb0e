//! apprtd: the application runtime daemon.
//!
//! Loads a runtime configuration, starts every application in dependency
//! order and serves the management socket until SIGTERM or SIGINT.

#[path = "daemon/config.rs"]
mod config;

use std::sync::Arc;

use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use runtime_engine::adapters::management::ManagementServer;
use runtime_engine::application::Runtime;
use runtime_engine::domain::services::runtime_directory;

use config::DaemonConfig;

#[tokio::main]
async fn main() {
    let config = DaemonConfig::from_env().with_args(std::env::args().skip(1));

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.log_filter))
        .init();

    let exit_code = match run(config).await {
        Ok(()) => 0,
        Err(err) => {
            error!(%err, "daemon failed");
            1
        }
    };
    std::process::exit(exit_code);
}

async fn run(config: DaemonConfig) -> runtime_engine::domain::Result<()> {
    let config_path = config.config_path.ok_or_else(|| {
        runtime_engine::domain::DomainError::ConfigInvalid(
            "usage: apprtd <runtime.yaml> (or set APPRT_CONFIG)".to_string(),
        )
    })?;

    let mut runtime = Runtime::from_config(&config_path).await?;
    if let Some(dir) = config.runtime_dir {
        runtime = runtime.with_runtime_dir(dir);
    }
    let runtime = Arc::new(runtime);

    let runtime_dir = runtime.runtime_dir().to_path_buf();
    runtime_directory::ensure_runtime_dir(&runtime_dir)?;
    let socket = runtime_directory::socket_path(&runtime_dir, std::process::id());

    let cancel = CancellationToken::new();
    let server =
        ManagementServer::serve(runtime.clone(), socket.clone(), cancel.clone())
            .await?;

    runtime.start().await?;
    info!(
        pid = std::process::id(),
        socket = %socket.display(),
        "daemon ready"
    );

    wait_for_shutdown_signal().await;
    info!("shutdown signal received");

    runtime.shutdown().await;
    cancel.cancel();
    let _ = server.await;
    Ok(())
}

async fn wait_for_shutdown_signal() {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sig) => sig,
        Err(err) => {
            error!(%err, "cannot install SIGTERM handler");
            return;
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(sig) => sig,
        Err(err) => {
            error!(%err, "cannot install SIGINT handler");
            return;
        }
    };
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}
