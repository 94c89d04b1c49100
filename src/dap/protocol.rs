use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicI64, Ordering};

/// Sequence numbers of responses built on this side of the bridge.
static LOCAL_SEQ: AtomicI64 = AtomicI64::new(1);

fn next_local_seq() -> i64 {
    LOCAL_SEQ.fetch_add(1, Ordering::Relaxed)
}

/// Discriminator of a DAP frame (`type` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Request,
    Response,
    Event,
    Unknown,
}

impl FrameKind {
    pub fn of(frame: &Value) -> Self {
        match frame.get("type").and_then(Value::as_str) {
            Some("request") => FrameKind::Request,
            Some("response") => FrameKind::Response,
            Some("event") => FrameKind::Event,
            _ => FrameKind::Unknown,
        }
    }
}

pub fn seq_of(frame: &Value) -> Option<i64> {
    frame.get("seq").and_then(Value::as_i64)
}

pub fn request_seq_of(frame: &Value) -> Option<i64> {
    frame.get("request_seq").and_then(Value::as_i64)
}

pub fn command_of(frame: &Value) -> &str {
    frame.get("command").and_then(Value::as_str).unwrap_or_default()
}

/// DAP request envelope.
#[derive(Debug, Deserialize, Serialize)]
pub struct DapRequest {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: String,
    pub command: String,
    #[serde(default)]
    pub arguments: Value,
}

impl DapRequest {
    pub fn new(seq: i64, command: impl Into<String>, arguments: Value) -> Self {
        Self {
            seq,
            r#type: "request".to_string(),
            command: command.into(),
            arguments,
        }
    }
}

/// DAP response envelope.
///
/// Note: the DAP specification allows responses with no `body` field at all.
#[derive(Debug, Serialize)]
pub struct DapResponse {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: &'static str,
    pub request_seq: i64,
    pub success: bool,
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl DapResponse {
    pub fn success(request: &Value, body: Value) -> Self {
        Self {
            seq: next_local_seq(),
            r#type: "response",
            request_seq: seq_of(request).unwrap_or_default(),
            success: true,
            command: command_of(request).to_string(),
            message: None,
            body: Some(body),
        }
    }

    /// Response produced by the bridge itself when the request never reached the adapter.
    pub fn failure(request: &Value, message: impl Into<String>) -> Self {
        Self {
            seq: next_local_seq(),
            r#type: "response",
            request_seq: seq_of(request).unwrap_or_default(),
            success: false,
            command: command_of(request).to_string(),
            message: Some(message.into()),
            body: None,
        }
    }

    pub fn into_value(self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({"type": "response", "success": false}))
    }
}

/// DAP event envelope.
#[derive(Debug, Deserialize, Serialize)]
pub struct DapEvent {
    #[serde(default)]
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: String,
    pub event: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl DapEvent {
    /// Thread which is reported as stopped by a `stopped` event.
    pub fn stopped_thread(&self) -> Option<i64> {
        if self.event != "stopped" {
            return None;
        }
        self.body.as_ref()?.get("threadId")?.as_i64()
    }
}
