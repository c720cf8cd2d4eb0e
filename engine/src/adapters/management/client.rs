//! Management client
//! Connects to daemon sockets, with discovery over the runtime directory

use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use crate::adapters::management::protocol::{
    decode_response, encode, Request, Response,
};
use crate::domain::error::{DomainError, Result};
use crate::domain::services::runtime_directory;

/// Client side of the management protocol over one connection.
pub struct ManagementClient {
    reader: tokio::io::Lines<BufReader<tokio::net::unix::OwnedReadHalf>>,
    writer: tokio::net::unix::OwnedWriteHalf,
    socket: PathBuf,
}

impl ManagementClient {
    pub async fn connect(socket: &Path) -> Result<Self> {
        let stream = UnixStream::connect(socket)
            .await
            .map_err(|err| DomainError::Transport(err.to_string()))?;
        let (read_half, writer) = stream.into_split();
        Ok(Self {
            reader: BufReader::new(read_half).lines(),
            writer,
            socket: socket.to_path_buf(),
        })
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    pub async fn send(&mut self, request: &Request) -> Result<()> {
        let line = encode(request)?;
        self.writer
            .write_all(line.as_bytes())
            .await
            .map_err(|err| DomainError::Transport(err.to_string()))
    }

    /// Read the next response frame; `None` on a clean disconnect.
    pub async fn next_frame(&mut self) -> Result<Option<Response>> {
        match self.reader.next_line().await {
            Ok(Some(line)) => Ok(Some(decode_response(&line)?)),
            Ok(None) => Ok(None),
            Err(err) => Err(DomainError::Transport(err.to_string())),
        }
    }

    /// One request, one response.
    pub async fn call(&mut self, request: &Request) -> Result<Response> {
        self.send(request).await?;
        self.next_frame()
            .await?
            .ok_or_else(|| DomainError::Transport("connection closed".to_string()))
    }

    /// Find a daemon in the runtime directory and connect to it.
    ///
    /// Each socket is probed with a `ps` request. `selector` may be a
    /// daemon pid or the entrypoint application's name; with no selector
    /// the probe must find exactly one live daemon. Sockets that refuse
    /// connections are treated as stale and removed.
    pub async fn discover(
        runtime_dir: &Path,
        selector: Option<&str>,
    ) -> Result<ManagementClient> {
        let mut matches = Vec::new();
        for (pid, socket) in runtime_directory::list_sockets(runtime_dir) {
            let mut client = match ManagementClient::connect(&socket).await {
                Ok(client) => client,
                Err(_) => {
                    debug!(socket = %socket.display(), "removing stale socket");
                    let _ = std::fs::remove_file(&socket);
                    continue;
                }
            };
            let response = match client.call(&Request::new("ps")).await {
                Ok(response) if response.is_ok() => response,
                _ => continue,
            };
            let status = response.result.unwrap_or_default();
            let entrypoint = status
                .get("entrypoint")
                .and_then(|e| e.as_str())
                .unwrap_or_default()
                .to_string();

            let selected = match selector {
                None => true,
                Some(sel) => sel == pid.to_string() || sel == entrypoint,
            };
            if selected {
                matches.push(client);
            }
        }

        match matches.len() {
            0 => Err(DomainError::RuntimeNotFound),
            1 => Ok(matches.remove(0)),
            _ if selector.is_none() => Err(DomainError::Transport(
                "multiple runtimes found, select one by pid or name".to_string(),
            )),
            _ => Ok(matches.remove(0)),
        }
    }
}
