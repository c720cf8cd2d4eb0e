//! Management protocol
//! Newline-delimited JSON frames over the local socket

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::error::DomainError;

/// One request frame: `{"command": ..., "target": ..., "args": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub args: Value,
}

impl Request {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            target: None,
            args: Value::Null,
        }
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn args(mut self, args: Value) -> Self {
        self.args = args;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub kind: String,
    pub message: String,
}

/// One response frame: `status` is `"ok"` or `"error"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl Response {
    pub fn ok(result: Value) -> Self {
        Self {
            status: "ok".to_string(),
            result: Some(result),
            error: None,
        }
    }

    pub fn error(err: &DomainError) -> Self {
        Self {
            status: "error".to_string(),
            result: None,
            error: Some(WireError {
                kind: err.kind().to_string(),
                message: err.to_string(),
            }),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

/// Serialize one frame, newline terminated.
pub fn encode<T: Serialize>(frame: &T) -> Result<String, DomainError> {
    let mut line = serde_json::to_string(frame)
        .map_err(|err| DomainError::Transport(err.to_string()))?;
    line.push('\n');
    Ok(line)
}

/// Parse one request line.
pub fn decode_request(line: &str) -> Result<Request, DomainError> {
    serde_json::from_str(line).map_err(|err| DomainError::InvalidRequest(err.to_string()))
}

/// Parse one response line.
pub fn decode_response(line: &str) -> Result<Response, DomainError> {
    serde_json::from_str(line).map_err(|err| DomainError::Transport(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_round_trip() {
        let request = Request::new("restart")
            .target("api")
            .args(json!({"force": true}));
        let line = encode(&request).unwrap();
        assert!(line.ends_with('\n'));
        let decoded = decode_request(line.trim_end()).unwrap();
        assert_eq!(decoded.command, "restart");
        assert_eq!(decoded.target.as_deref(), Some("api"));
        assert_eq!(decoded.args["force"], true);
    }

    #[test]
    fn test_request_minimal_form() {
        let decoded = decode_request(r#"{"command":"ps"}"#).unwrap();
        assert_eq!(decoded.command, "ps");
        assert!(decoded.target.is_none());
        assert!(decoded.args.is_null());
    }

    #[test]
    fn test_error_response_carries_kind() {
        let response = Response::error(&DomainError::ApplicationNotFound);
        let line = encode(&response).unwrap();
        let decoded = decode_response(line.trim_end()).unwrap();
        assert!(!decoded.is_ok());
        let error = decoded.error.unwrap();
        assert_eq!(error.kind, "not_found");
        assert_eq!(error.message, "Cannot find a matching application.");
    }

    #[test]
    fn test_malformed_request_is_bad_request() {
        let err = decode_request("{nope").unwrap_err();
        assert!(matches!(err, DomainError::InvalidRequest(_)));
    }
}
