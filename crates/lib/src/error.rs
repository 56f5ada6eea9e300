//! Error taxonomy for calls that cross the gateway client boundary.
//!
//! Every failing `chat`, `chat_stream`, and `invoke_tool` call yields a [`ServiceError`]; callers
//! branch on [`ErrorKind`] rather than matching message text.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure class of a gateway call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Transport-level failure, or any non-2xx that is neither 401 nor 5xx.
    Network,
    /// HTTP 401.
    Auth,
    /// HTTP 5xx, or a 2xx whose body is not what the protocol promises.
    Server,
    /// Deadline exceeded.
    Timeout,
    /// Missing or invalid gateway URL.
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Network => "network",
            ErrorKind::Auth => "auth",
            ErrorKind::Server => "server",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Config => "config",
        };
        f.write_str(s)
    }
}

/// The only error shape returned by the gateway client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct ServiceError {
    pub kind: ErrorKind,
    pub message: String,
    /// HTTP status when the failure came from a gateway response.
    pub status: Option<u16>,
}

impl ServiceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Server, message)
    }

    /// Classify a non-2xx response. 401 → auth, 5xx → server, anything else → network.
    /// The message comes from the JSON error body when one is present.
    pub fn from_status(status: u16, body: &str) -> Self {
        let kind = match status {
            401 => ErrorKind::Auth,
            500..=599 => ErrorKind::Server,
            _ => ErrorKind::Network,
        };
        let message =
            error_body_message(body).unwrap_or_else(|| format!("Gateway error ({})", status));
        Self {
            kind,
            message,
            status: Some(status),
        }
    }

    pub fn is_auth(&self) -> bool {
        self.kind == ErrorKind::Auth
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ServiceError::timeout(format!("request timed out: {}", e))
        } else if e.is_decode() {
            ServiceError::server(format!("invalid gateway response: {}", e))
        } else {
            let mut err = ServiceError::network(format!("gateway unreachable: {}", e));
            err.status = e.status().map(|s| s.as_u16());
            err
        }
    }
}

/// Pull a human-readable message out of a gateway error body.
/// Accepts `{"error":{"message":..}}`, `{"error":".."}`, and `{"message":..}`.
fn error_body_message(body: &str) -> Option<String> {
    let v: serde_json::Value = serde_json::from_str(body).ok()?;
    let msg = match v.get("error") {
        Some(serde_json::Value::Object(obj)) => obj.get("message").and_then(|m| m.as_str()),
        Some(serde_json::Value::String(s)) => Some(s.as_str()),
        _ => None,
    }
    .or_else(|| v.get("message").and_then(|m| m.as_str()))?;
    let msg = msg.trim();
    if msg.is_empty() {
        None
    } else {
        Some(msg.to_string())
    }
}
