//! Bridge WebSocket frames (req, res, event).

use serde::{Deserialize, Serialize};

/// Any frame on the bridge socket, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BridgeFrame {
    #[serde(rename = "req")]
    Request(BridgeRequest),
    #[serde(rename = "res")]
    Response(BridgeResponse),
    #[serde(rename = "event")]
    Event(BridgeEvent),
}

/// `{ "type": "req", "id", "method", "params" }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeRequest {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// `{ "type": "res", "id", "ok", "payload" or "error" }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeResponse {
    pub id: String,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `{ "type": "event", "event", "payload" }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeEvent {
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl BridgeResponse {
    pub fn ok(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(error.into()),
        }
    }
}

impl BridgeEvent {
    /// String field from the payload, if present.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(|v| v.as_str())
    }
}
