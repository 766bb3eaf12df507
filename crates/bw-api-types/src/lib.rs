use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Channel scope of an outbound request, i.e. which handler on the host side
/// receives it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Scope {
    #[serde(rename = "callApi")]
    CallApi,
    #[serde(rename = "callDB")]
    CallDb,
    #[serde(rename = "init")]
    Init,
    #[serde(rename = "polling")]
    Polling,
    #[serde(rename = "stopPolling")]
    StopPolling,
    #[serde(rename = "exportKeystore")]
    ExportKeystore,
    #[serde(rename = "importKeystore")]
    ImportKeystore,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CallApi => "callApi",
            Self::CallDb => "callDB",
            Self::Init => "init",
            Self::Polling => "polling",
            Self::StopPolling => "stopPolling",
            Self::ExportKeystore => "exportKeystore",
            Self::ImportKeystore => "importKeystore",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tags of unsolicited messages pushed by the host process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PushCategory {
    LoaderShow,
    LoaderHide,
    PollingTick,
    CoinbaseChanged,
    SyncProgress,
    BlockInfo,
}

impl PushCategory {
    pub const ALL: [PushCategory; 6] = [
        Self::LoaderShow,
        Self::LoaderHide,
        Self::PollingTick,
        Self::CoinbaseChanged,
        Self::SyncProgress,
        Self::BlockInfo,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            Self::LoaderShow => "notify_show",
            Self::LoaderHide => "notify_hide",
            Self::PollingTick => "polling",
            Self::CoinbaseChanged => "coinbase",
            Self::SyncProgress => "syncing",
            Self::BlockInfo => "getBlockInfo",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|category| category.tag() == tag)
    }
}

impl fmt::Display for PushCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Token embedded in a request and echoed by the host in the matching reply.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct CorrelationId(pub Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestEnvelope {
    pub scope: Scope,
    pub operation: String,
    pub args: Vec<Value>,
}

impl RequestEnvelope {
    pub fn new(scope: Scope, operation: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            scope,
            operation: operation.into(),
            args,
        }
    }

    pub fn into_outbound(self, id: CorrelationId) -> OutboundMessage {
        OutboundMessage {
            id,
            name: self.scope,
            payload: RequestPayload {
                api: self.operation,
                args: self.args,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RequestPayload {
    pub api: String,
    pub args: Vec<Value>,
}

/// Message written to the host channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboundMessage {
    pub id: CorrelationId,
    pub name: Scope,
    pub payload: RequestPayload,
}

/// Message read from the host channel: either a reply (carrying the `id` of a
/// request) or a push event (carrying a category `name`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct InboundMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<CorrelationId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl InboundMessage {
    pub fn reply(id: CorrelationId, payload: Value) -> Self {
        Self {
            id: Some(id),
            payload,
            ..Self::default()
        }
    }

    pub fn failure(id: CorrelationId, error: Value) -> Self {
        Self {
            id: Some(id),
            error: Some(error),
            ..Self::default()
        }
    }

    pub fn push(category: PushCategory, payload: Value) -> Self {
        Self {
            name: Some(category.tag().to_owned()),
            payload,
            ..Self::default()
        }
    }
}

/// Successful reply to a call.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope {
    pub id: CorrelationId,
    pub payload: Value,
}

impl ResponseEnvelope {
    /// Parse the payload into `T`.
    ///
    /// The host double-encodes most node results: the payload is a string that
    /// itself holds JSON. Such a string is parsed first; structured payloads
    /// are deserialized as they are.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match &self.payload {
            Value::String(raw) => serde_json::from_str(raw),
            other => T::deserialize(other),
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.payload.as_str()
    }

    pub fn into_payload(self) -> Value {
        self.payload
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PushEvent {
    pub category: PushCategory,
    pub payload: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outbound_message_wire_shape() -> anyhow::Result<()> {
        let id = CorrelationId::new();
        let message = RequestEnvelope::new(
            Scope::CallApi,
            "berith_getBalance",
            vec![json!("0xabc"), json!("latest")],
        )
        .into_outbound(id);

        let wire = serde_json::to_value(&message)?;
        assert_eq!(
            wire,
            json!({
                "id": id.0.to_string(),
                "name": "callApi",
                "payload": { "api": "berith_getBalance", "args": ["0xabc", "latest"] },
            })
        );
        Ok(())
    }

    #[test]
    fn inbound_push_without_id_parses() -> anyhow::Result<()> {
        let message: InboundMessage = serde_json::from_str(r#"{"name":"syncing","payload":"false"}"#)?;
        assert!(message.id.is_none());
        assert_eq!(message.name.as_deref(), Some("syncing"));
        assert_eq!(message.payload, json!("false"));
        assert!(message.error.is_none());
        Ok(())
    }

    #[test]
    fn scope_tags_match_host_handlers() -> anyhow::Result<()> {
        assert_eq!(serde_json::to_value(Scope::CallDb)?, json!("callDB"));
        assert_eq!(serde_json::to_value(Scope::StopPolling)?, json!("stopPolling"));
        assert_eq!(Scope::ExportKeystore.to_string(), "exportKeystore");
        Ok(())
    }

    #[test]
    fn push_category_lookup() {
        assert_eq!(PushCategory::from_tag("getBlockInfo"), Some(PushCategory::BlockInfo));
        assert_eq!(PushCategory::from_tag("notify_hide"), Some(PushCategory::LoaderHide));
        assert_eq!(PushCategory::from_tag("unknown"), None);
    }

    #[test]
    fn decode_handles_double_encoded_payload() -> anyhow::Result<()> {
        let response = ResponseEnvelope {
            id: CorrelationId::new(),
            payload: json!("\"0x7f\""),
        };
        assert_eq!(response.decode::<String>()?, "0x7f");

        let structured = ResponseEnvelope {
            id: CorrelationId::new(),
            payload: json!({ "0xabc": "alice" }),
        };
        let contacts: std::collections::HashMap<String, String> = structured.decode()?;
        assert_eq!(contacts.get("0xabc").map(String::as_str), Some("alice"));
        Ok(())
    }
}
