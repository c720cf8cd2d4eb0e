//! Management server
//! Serves the command protocol on a per-daemon unix socket

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::adapters::management::protocol::{
    decode_request, encode, Request, Response,
};
use crate::application::Runtime;
use crate::domain::error::{DomainError, Result};
use crate::domain::services::log_aggregation::recv_skipping_lag;
use crate::domain::value_objects::LogLevel;

/// Serves management requests for one runtime on a unix socket.
pub struct ManagementServer;

impl ManagementServer {
    /// Bind the socket and start accepting. A stale socket file at the
    /// path is removed first; permissions are restricted to the owner.
    pub async fn serve(
        runtime: Arc<Runtime>,
        socket: PathBuf,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>> {
        if socket.exists() {
            std::fs::remove_file(&socket)?;
        }
        if let Some(parent) = socket.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(&socket)
            .map_err(|err| DomainError::Transport(err.to_string()))?;
        std::fs::set_permissions(&socket, std::fs::Permissions::from_mode(0o600))?;
        info!(socket = %socket.display(), "management socket bound");

        let handle = tokio::spawn(async move {
            loop {
                let stream = tokio::select! {
                    _ = cancel.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _)) => stream,
                        Err(err) => {
                            warn!(%err, "management accept failed");
                            continue;
                        }
                    },
                };
                let runtime = runtime.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(runtime, stream, cancel).await {
                        debug!(%err, "management connection closed with error");
                    }
                });
            }
            cleanup_socket(&socket);
        });
        Ok(handle)
    }
}

fn cleanup_socket(socket: &Path) {
    if let Err(err) = std::fs::remove_file(socket) {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(socket = %socket.display(), %err, "could not remove socket");
        }
    }
}

async fn handle_connection(
    runtime: Arc<Runtime>,
    stream: UnixStream,
    cancel: CancellationToken,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            line = lines.next_line() => match line {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(()),
                Err(err) => return Err(DomainError::Transport(err.to_string())),
            },
        };
        if line.trim().is_empty() {
            continue;
        }

        let request = match decode_request(&line) {
            Ok(request) => request,
            Err(err) => {
                write_frame(&mut write_half, &Response::error(&err)).await?;
                continue;
            }
        };

        if request.command == "logs" {
            // Streaming command: frames flow until the client hangs up.
            stream_logs(&runtime, request, &mut lines, &mut write_half, &cancel)
                .await?;
            return Ok(());
        }

        let response = match dispatch(&runtime, &request).await {
            Ok(result) => Response::ok(result),
            Err(err) => Response::error(&err),
        };
        write_frame(&mut write_half, &response).await?;
    }
}

async fn dispatch(runtime: &Runtime, request: &Request) -> Result<serde_json::Value> {
    let target = request.target.as_deref();
    match request.command.as_str() {
        "ps" => Ok(runtime.status().await),
        "applications" => runtime.applications().await,
        "config" => Ok(runtime.config_json().await),
        "env" => runtime.env_json(required_target(request)?).await,
        "metrics" => runtime.metrics_json(required_target(request)?).await,
        "inject" => {
            runtime
                .inject(required_target(request)?, request.args.clone())
                .await
        }
        "start" => {
            runtime.start_applications(target).await?;
            Ok(json!({ "started": target.unwrap_or("all") }))
        }
        "stop" => {
            runtime.stop_applications(target).await?;
            Ok(json!({ "stopped": target.unwrap_or("all") }))
        }
        "restart" => {
            runtime.restart_applications(target).await?;
            Ok(json!({ "restarted": target.unwrap_or("all") }))
        }
        "reload" => {
            runtime.reload_applications(target).await?;
            Ok(json!({ "reloaded": target.unwrap_or("all") }))
        }
        "pprof" => {
            let action = request
                .args
                .get("action")
                .and_then(|a| a.as_str())
                .unwrap_or("start");
            let target = required_target(request)?;
            match action {
                "start" => runtime.pprof_start(target).await,
                "stop" => runtime.pprof_stop(target).await,
                other => Err(DomainError::InvalidRequest(format!(
                    "unknown pprof action '{other}'"
                ))),
            }
        }
        other => Err(DomainError::UnknownCommand(other.to_string())),
    }
}

fn required_target(request: &Request) -> Result<&str> {
    request
        .target
        .as_deref()
        .ok_or_else(|| DomainError::InvalidRequest("missing target".to_string()))
}

/// Stream log records as ok-frames until the client disconnects.
async fn stream_logs(
    runtime: &Runtime,
    request: Request,
    lines: &mut tokio::io::Lines<
        BufReader<tokio::net::unix::OwnedReadHalf>,
    >,
    write_half: &mut tokio::net::unix::OwnedWriteHalf,
    cancel: &CancellationToken,
) -> Result<()> {
    let application = request.target.clone();
    let min_level = request
        .args
        .get("level")
        .and_then(|l| l.as_str())
        .map(LogLevel::parse);
    let mut records = runtime.subscribe_logs();

    write_frame(write_half, &Response::ok(json!({ "streaming": true }))).await?;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            // EOF from the client ends the stream.
            line = lines.next_line() => match line {
                Ok(Some(_)) => {}
                _ => return Ok(()),
            },
            record = recv_skipping_lag(&mut records) => {
                let record = match record {
                    Some(record) => record,
                    None => return Ok(()),
                };
                if let Some(app) = &application {
                    if &record.application != app {
                        continue;
                    }
                }
                if let Some(min) = min_level {
                    if record.level < min {
                        continue;
                    }
                }
                let value = serde_json::to_value(&record)
                    .map_err(|err| DomainError::Transport(err.to_string()))?;
                write_frame(write_half, &Response::ok(value)).await?;
            }
        }
    }
}

async fn write_frame(
    write_half: &mut tokio::net::unix::OwnedWriteHalf,
    response: &Response,
) -> Result<()> {
    let line = encode(response)?;
    write_half
        .write_all(line.as_bytes())
        .await
        .map_err(|err| DomainError::Transport(err.to_string()))
}
