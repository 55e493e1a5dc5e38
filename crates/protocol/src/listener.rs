//! The listener socket protocol (§6.3): spoken between a web UI and the
//! relay over `/ws/web`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ListenerFrame {
    Ping,
    Pong,
    CharacteristicUpdate(CharacteristicUpdate),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacteristicUpdate {
    #[serde(rename = "accessoryId")]
    pub accessory_id: String,
    #[serde(rename = "characteristicType")]
    pub characteristic_type: String,
    pub value: serde_json::Value,
}

impl ListenerFrame {
    pub fn characteristic_update(
        accessory_id: impl Into<String>,
        characteristic_type: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        Self::CharacteristicUpdate(CharacteristicUpdate {
            accessory_id: accessory_id.into(),
            characteristic_type: characteristic_type.into(),
            value,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn characteristic_update_shape() {
        let frame = ListenerFrame::characteristic_update("acc-1", "On", serde_json::json!(true));
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "characteristic_update");
        assert_eq!(json["accessoryId"], "acc-1");
        assert_eq!(json["value"], true);
    }

    #[test]
    fn ping_parses_from_client() {
        let raw = r#"{"type":"ping"}"#;
        let frame: ListenerFrame = serde_json::from_str(raw).unwrap();
        assert!(matches!(frame, ListenerFrame::Ping));
    }
}
