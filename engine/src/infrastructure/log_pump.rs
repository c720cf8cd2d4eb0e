//! Log pump
//! Streams a child's output into the log bus, line by line

use std::time::{SystemTime, UNIX_EPOCH};

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::domain::services::LogBus;
use crate::domain::value_objects::{LogLevel, LogRecord};

/// The readiness marker workers print once they accept traffic.
const READY_MARKER: &str = "listening";

/// Identity of the worker whose output is being pumped.
#[derive(Debug, Clone)]
pub struct PumpMeta {
    pub worker_id: Uuid,
    pub application: String,
    pub replica: usize,
    pub pid: u32,
    /// Level assigned to lines that are not structured JSON.
    pub default_level: LogLevel,
}

/// Read lines from one child pipe until EOF, publishing each as a record.
///
/// Lines that parse as JSON objects contribute their own `level` and
/// `msg`/`message` fields; anything else is passed through verbatim at the
/// default level. The first line whose message mentions the readiness
/// marker fires `ready`.
pub fn pump<R>(
    reader: R,
    meta: PumpMeta,
    bus: LogBus,
    mut ready: Option<oneshot::Sender<()>>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.is_empty() {
                continue;
            }
            let (level, message) = parse_line(&line, meta.default_level);
            if message.to_ascii_lowercase().contains(READY_MARKER) {
                if let Some(tx) = ready.take() {
                    let _ = tx.send(());
                }
            }
            bus.publish(LogRecord {
                application: meta.application.clone(),
                worker: meta.worker_id,
                replica: meta.replica,
                pid: meta.pid,
                level,
                timestamp_ms: epoch_ms(),
                message,
            });
        }
    })
}

fn parse_line(line: &str, default_level: LogLevel) -> (LogLevel, String) {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(line) {
        if let Some(object) = value.as_object() {
            let level = object
                .get("level")
                .and_then(level_from_value)
                .unwrap_or(default_level);
            let message = object
                .get("msg")
                .or_else(|| object.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
                .unwrap_or_else(|| line.to_string());
            return (level, message);
        }
    }
    (default_level, line.to_string())
}

fn level_from_value(value: &serde_json::Value) -> Option<LogLevel> {
    match value {
        serde_json::Value::String(name) => Some(LogLevel::parse(name)),
        // pino-style numeric levels
        serde_json::Value::Number(n) => n.as_u64().map(|n| match n {
            0..=19 => LogLevel::Trace,
            20..=29 => LogLevel::Debug,
            30..=39 => LogLevel::Info,
            40..=49 => LogLevel::Warn,
            50..=59 => LogLevel::Error,
            _ => LogLevel::Fatal,
        }),
        _ => None,
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::services::log_aggregation::recv_skipping_lag;

    fn meta() -> PumpMeta {
        PumpMeta {
            worker_id: Uuid::new_v4(),
            application: "api".to_string(),
            replica: 0,
            pid: 7,
            default_level: LogLevel::Info,
        }
    }

    #[tokio::test]
    async fn test_json_line_carries_level_and_message() {
        let bus = LogBus::new();
        let mut rx = bus.subscribe();
        let input: &[u8] = b"{\"level\":\"error\",\"msg\":\"boom\"}\n";
        pump(input, meta(), bus, None).await.unwrap();

        let record = recv_skipping_lag(&mut rx).await.unwrap();
        assert_eq!(record.level, LogLevel::Error);
        assert_eq!(record.message, "boom");
    }

    #[tokio::test]
    async fn test_numeric_pino_level() {
        let bus = LogBus::new();
        let mut rx = bus.subscribe();
        let input: &[u8] = b"{\"level\":50,\"msg\":\"bad\"}\n";
        pump(input, meta(), bus, None).await.unwrap();
        assert_eq!(
            recv_skipping_lag(&mut rx).await.unwrap().level,
            LogLevel::Error
        );
    }

    #[tokio::test]
    async fn test_plain_text_uses_default_level() {
        let bus = LogBus::new();
        let mut rx = bus.subscribe();
        let input: &[u8] = b"plain old line\n";
        pump(input, meta(), bus, None).await.unwrap();

        let record = recv_skipping_lag(&mut rx).await.unwrap();
        assert_eq!(record.level, LogLevel::Info);
        assert_eq!(record.message, "plain old line");
    }

    #[tokio::test]
    async fn test_ready_marker_fires_once() {
        let bus = LogBus::new();
        let (tx, rx) = oneshot::channel();
        let input: &[u8] = b"Server listening on port 3000\nlistening again\n";
        pump(input, meta(), bus, Some(tx)).await.unwrap();
        assert!(rx.await.is_ok());
    }
}
