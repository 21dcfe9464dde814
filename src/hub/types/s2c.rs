use axum::extract::ws::Utf8Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    NewResponse,
    AnalyticsUpdate,
    Heartbeat,
    Subscribed,
    Unsubscribed,
    Pong,
}

impl MessageKind {
    pub fn name(&self) -> &'static str {
        match self {
            MessageKind::NewResponse => "new_response",
            MessageKind::AnalyticsUpdate => "analytics_update",
            MessageKind::Heartbeat => "heartbeat",
            MessageKind::Subscribed => "subscribed",
            MessageKind::Unsubscribed => "unsubscribed",
            MessageKind::Pong => "pong",
        }
    }
}

/// Outbound event, serialized once and shared by every recipient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S2CMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub form_id: Option<String>,
}

impl S2CMessage {
    pub fn new(kind: MessageKind, data: Value) -> Self {
        Self {
            kind,
            data,
            timestamp: Utc::now(),
            form_id: None,
        }
    }

    pub fn new_response(data: Value) -> Self {
        Self::new(MessageKind::NewResponse, data)
    }

    pub fn analytics_update(data: Value) -> Self {
        Self::new(MessageKind::AnalyticsUpdate, data)
    }

    pub fn heartbeat() -> Self {
        Self::new(MessageKind::Heartbeat, Value::Null)
    }

    pub fn pong() -> Self {
        Self::new(MessageKind::Pong, Value::Null)
    }

    pub fn subscribed(form_id: &str) -> Self {
        Self::new(MessageKind::Subscribed, Value::Null).with_form(form_id)
    }

    pub fn unsubscribed(form_id: &str) -> Self {
        Self::new(MessageKind::Unsubscribed, Value::Null).with_form(form_id)
    }

    pub fn with_form(mut self, form_id: &str) -> Self {
        self.form_id = Some(form_id.to_string());
        self
    }

    pub fn to_frame(&self) -> Result<Utf8Bytes, serde_json::Error> {
        serde_json::to_string(self).map(Utf8Bytes::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn topic_scoped_message_wire_shape() {
        let msg = S2CMessage::new_response(json!({"responseId": "r1", "answers": 3})).with_form("F1");
        let wire: Value = serde_json::from_str(msg.to_frame().unwrap().as_str()).unwrap();

        assert_eq!(wire["type"], "new_response");
        assert_eq!(wire["formId"], "F1");
        assert_eq!(wire["data"]["responseId"], "r1");
        let timestamp = wire["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(timestamp).is_ok());
    }

    #[test]
    fn global_message_omits_form_id() {
        let wire: Value = serde_json::from_str(S2CMessage::heartbeat().to_frame().unwrap().as_str()).unwrap();
        let object = wire.as_object().unwrap();

        assert_eq!(object["type"], "heartbeat");
        assert!(object["data"].is_null());
        assert!(!object.contains_key("formId"));
    }

    #[test]
    fn kind_names_match_wire_values() {
        for kind in [
            MessageKind::NewResponse,
            MessageKind::AnalyticsUpdate,
            MessageKind::Heartbeat,
            MessageKind::Subscribed,
            MessageKind::Unsubscribed,
            MessageKind::Pong,
        ] {
            assert_eq!(serde_json::to_value(kind).unwrap(), kind.name());
        }
    }
}
