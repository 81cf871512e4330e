//! Request and response messages carried inside frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A call to one method of one registered service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u64,
    pub service: String,
    pub method: String,
    #[serde(default)]
    pub args: Value,
}

/// The answer to a request with the same id.
///
/// Exactly one of `result` and `error` is meaningful; `error` is set on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The frame did not hold a valid request.
    MalformedRequest,
    UnknownService,
    UnknownMethod,
    /// The handler returned an error or panicked.
    HandlerFailed,
}

impl Request {
    pub fn new(id: u64, service: &str, method: &str, args: Value) -> Self {
        Request { id, service: service.to_string(), method: method.to_string(), args }
    }

    /// Decode a request from a frame payload.
    ///
    /// On failure, the error response still echoes the request id when one
    /// can be recovered from the payload.
    pub fn decode(payload: &[u8]) -> Result<Request, Response> {
        serde_json::from_slice(payload).map_err(|e| {
            let id = serde_json::from_slice::<Value>(payload)
                .ok()
                .and_then(|v| v.get("id").and_then(Value::as_u64))
                .unwrap_or(0);
            Response::error(id, ErrorKind::MalformedRequest, e.to_string())
        })
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

impl Response {
    pub fn ok(id: u64, result: Value) -> Self {
        Response { id, result, error: None }
    }

    pub fn error(id: u64, kind: ErrorKind, message: impl Into<String>) -> Self {
        Response {
            id,
            result: Value::Null,
            error: Some(ErrorBody { kind, message: message.into() }),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn decode(payload: &[u8]) -> Result<Response, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
