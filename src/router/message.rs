//! Routed message model

use crate::context::Context;
use crate::error::ApiError;
use crate::types::{AgentID, ContextID, MessageID};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Kind of message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    #[default]
    Event,
    Command,
    Query,
    Response,
}

impl MessageType {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageType::Event => "event",
            MessageType::Command => "command",
            MessageType::Query => "query",
            MessageType::Response => "response",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MessageType {
    type Err = ApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "event" => Ok(MessageType::Event),
            "command" => Ok(MessageType::Command),
            "query" => Ok(MessageType::Query),
            "response" => Ok(MessageType::Response),
            other => Err(ApiError::ValidationError(format!(
                "unknown message type: {}",
                other
            ))),
        }
    }
}

/// A message exchanged between agents.
///
/// `id`, `idempotency_key` and `timestamp` are assigned by the router when
/// left empty; caller-supplied values are kept as-is. An empty `to` means
/// broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(default)]
    pub id: MessageID,
    pub from: AgentID,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub to: AgentID,
    #[serde(default)]
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<ContextID>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Context>,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub idempotency_key: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub correlation_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reply_to: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn new(from: impl Into<AgentID>, message_type: MessageType) -> Self {
        Self {
            id: String::new(),
            from: from.into(),
            to: String::new(),
            topic: String::new(),
            context_id: None,
            context: None,
            message_type,
            idempotency_key: String::new(),
            correlation_id: String::new(),
            reply_to: String::new(),
            metadata: HashMap::new(),
            timestamp: None,
            expires_at: None,
        }
    }

    /// Embed a context, also setting `context_id`.
    pub fn with_context(mut self, context: Context) -> Self {
        self.context_id = Some(context.id.clone());
        self.context = Some(context);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = key.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_broadcast(&self) -> bool {
        self.to.is_empty()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| now > at).unwrap_or(false)
    }

    /// Serialize for the broker wire.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Structural checks applied before a message is published.
pub fn validate_message(message: &Message) -> Result<(), ApiError> {
    if message.from.trim().is_empty() {
        return Err(ApiError::ValidationError(
            "message sender cannot be empty".to_string(),
        ));
    }
    if message.topic.trim().is_empty() {
        return Err(ApiError::ValidationError(
            "message topic cannot be empty".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_wire_names() {
        let json = serde_json::to_string(&MessageType::Query).unwrap();
        assert_eq!(json, "\"query\"");
        assert_eq!("response".parse::<MessageType>().unwrap(), MessageType::Response);
        assert!("notice".parse::<MessageType>().is_err());
    }

    #[test]
    fn test_decode_rejects_unknown_type() {
        let raw = br#"{"from":"a","topic":"t","type":"gossip"}"#;
        assert!(Message::decode(raw).is_err());
    }

    #[test]
    fn test_encode_decode_keeps_optional_fields() {
        let message = Message::new("a", MessageType::Command)
            .with_idempotency_key("k1")
            .with_metadata("priority", "high");
        let decoded = Message::decode(&message.encode().unwrap()).unwrap();
        assert_eq!(decoded, message);
        assert!(decoded.is_broadcast());
    }

    #[test]
    fn test_validate_message() {
        let mut message = Message::new("a", MessageType::Event);
        assert!(validate_message(&message).is_err());
        message.topic = "updates".to_string();
        assert!(validate_message(&message).is_ok());
        message.from = " ".to_string();
        assert!(validate_message(&message).is_err());
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let message = Message::new("a", MessageType::Event);
        assert!(!message.is_expired_at(now));
        let message = message.with_expiry(now - chrono::Duration::seconds(1));
        assert!(message.is_expired_at(now));
    }
}
