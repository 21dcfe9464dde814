use serde::Deserialize;

use super::MessageLoadError;

/// Control message sent by a dashboard client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum C2SMessage {
    Subscribe(String),
    Unsubscribe(String),
    Ping,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawC2SMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    form_id: Option<String>,
}

impl TryFrom<&str> for C2SMessage {
    type Error = MessageLoadError;

    fn try_from(text: &str) -> Result<Self, Self::Error> {
        let raw: RawC2SMessage = serde_json::from_str(text)?;
        let form_id = raw.form_id.filter(|id| !id.is_empty());
        match raw.kind.as_str() {
            "subscribe" => form_id
                .map(C2SMessage::Subscribe)
                .ok_or(MessageLoadError::MissingFormId("subscribe")),
            "unsubscribe" => form_id
                .map(C2SMessage::Unsubscribe)
                .ok_or(MessageLoadError::MissingFormId("unsubscribe")),
            "ping" => Ok(C2SMessage::Ping),
            _ => Err(MessageLoadError::BadType(raw.kind)),
        }
    }
}

impl C2SMessage {
    pub fn name(&self) -> &'static str {
        match self {
            C2SMessage::Subscribe(_) => "c2s>subscribe",
            C2SMessage::Unsubscribe(_) => "c2s>unsubscribe",
            C2SMessage::Ping => "c2s>ping",
        }
    }
}
