//! Inter-process bus frames (§6.2): published to `{prefix}-{slotName}`
//! topics to forward requests/responses between relay processes and to
//! fan events and listener-transition notices to remote instances.

use serde::{Deserialize, Serialize};

use crate::agent::AgentError;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusFrame {
    Request(BusRequest),
    Response(BusResponse),
    Event(BusEvent),
    ListenersChanged(BusListenersChanged),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusRequest {
    pub correlation_id: String,
    pub source_slot: String,
    pub agent_id: String,
    pub action: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusResponse {
    pub correlation_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AgentError>,
}

impl BusResponse {
    pub fn ok(correlation_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            payload: Some(payload),
            error: None,
        }
    }

    pub fn err(correlation_id: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            payload: None,
            error: Some(AgentError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusEvent {
    pub user_id: String,
    pub accessory_id: String,
    pub characteristic_type: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusListenersChanged {
    pub user_id: String,
    pub active: bool,
}

/// Build the topic name for a slot: `{prefix}-{slotName}` (§6.2).
pub fn topic_for_slot(prefix: &str, slot_name: &str) -> String {
    format!("{prefix}-{slot_name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_frame_roundtrips() {
        let frame = BusFrame::Request(BusRequest {
            correlation_id: "c1".into(),
            source_slot: "ab12".into(),
            agent_id: "agent-1".into(),
            action: "ping".into(),
            payload: serde_json::json!({}),
        });
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"type\":\"request\""));
        let back: BusFrame = serde_json::from_str(&json).unwrap();
        match back {
            BusFrame::Request(r) => assert_eq!(r.correlation_id, "c1"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn topic_naming() {
        assert_eq!(topic_for_slot("homecast-instance", "a7f2"), "homecast-instance-a7f2");
    }

    #[test]
    fn response_err_omits_payload() {
        let resp = BusResponse::err("c1", "TIMEOUT", "no reply");
        let json = serde_json::to_value(&resp).unwrap();
        assert!(json.get("payload").is_none());
    }
}
