//! The agent duplex protocol (§6.1): JSON frames exchanged between the
//! relay and a headless agent over one persistent WebSocket per agent.

use serde::{Deserialize, Serialize};

/// A single JSON object exchanged on the agent socket in either direction.
///
/// Unlike the bus and listener protocols, this envelope is not a tagged
/// enum: every field is optional except `type`, matching the original
/// wire shape (`{id, type, action, payload, error}`) and letting the
/// Connection Manager dispatch on `frame.type` without committing to one
/// Rust variant per combination of fields actually present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentFrame {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub r#type: FrameType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AgentError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameType {
    Request,
    Response,
    Event,
    Ping,
    Pong,
    Status,
    Config,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentError {
    pub code: String,
    pub message: String,
}

/// The shape of an `event` frame's `payload` (§6.1): a characteristic update
/// originating from the agent's own home network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEventPayload {
    #[serde(rename = "accessoryId")]
    pub accessory_id: String,
    #[serde(rename = "characteristicType")]
    pub characteristic_type: String,
    pub value: serde_json::Value,
}

impl AgentFrame {
    /// Build a `request` frame for `SendRequest` (§4.3).
    pub fn request(id: impl Into<String>, action: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Some(id.into()),
            r#type: FrameType::Request,
            action: Some(action.into()),
            payload: Some(payload),
            error: None,
        }
    }

    /// Build a successful `response` frame.
    pub fn response_ok(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Some(id.into()),
            r#type: FrameType::Response,
            action: None,
            payload: Some(payload),
            error: None,
        }
    }

    /// Build an error `response` frame.
    pub fn response_err(id: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            r#type: FrameType::Response,
            action: None,
            payload: None,
            error: Some(AgentError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }

    /// Build a `ping` heartbeat frame (§4.3): `{type:"ping", payload:{listenersActive}}`.
    pub fn ping(listeners_active: bool) -> Self {
        Self {
            id: None,
            r#type: FrameType::Ping,
            action: None,
            payload: Some(serde_json::json!({ "listenersActive": listeners_active })),
            error: None,
        }
    }

    /// Build the `config`/`listeners_changed` notification sent directly to a
    /// local agent socket (§4.6).
    pub fn listeners_changed(active: bool) -> Self {
        Self {
            id: None,
            r#type: FrameType::Config,
            action: Some("listeners_changed".into()),
            payload: Some(serde_json::json!({ "listenersActive": active })),
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_roundtrips() {
        let frame = AgentFrame::request("req-1", "ping", serde_json::json!({}));
        let json = serde_json::to_string(&frame).unwrap();
        let back: AgentFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back.r#type, FrameType::Request);
        assert_eq!(back.id.as_deref(), Some("req-1"));
        assert_eq!(back.action.as_deref(), Some("ping"));
    }

    #[test]
    fn response_err_has_no_payload() {
        let frame = AgentFrame::response_err("req-1", "TIMEOUT", "no reply");
        let json = serde_json::to_value(&frame).unwrap();
        assert!(json.get("payload").is_none());
        assert_eq!(json["error"]["code"], "TIMEOUT");
    }

    #[test]
    fn unknown_type_fails_to_parse() {
        let raw = r#"{"type":"bogus"}"#;
        assert!(serde_json::from_str::<AgentFrame>(raw).is_err());
    }

    #[test]
    fn listeners_changed_shape() {
        let frame = AgentFrame::listeners_changed(true);
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "config");
        assert_eq!(json["action"], "listeners_changed");
        assert_eq!(json["payload"]["listenersActive"], true);
    }
}
