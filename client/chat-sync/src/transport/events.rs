//! Socket wire events
//!
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}`.

use crate::error::SyncResult;
use crate::models::{Message, MessageId, Notification, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    /// Lost the socket; attempts continue in the background
    Reconnecting,
    /// Terminal until the next `connect`
    Disconnected,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
            ConnectionStatus::Disconnected => "disconnected",
        }
    }
}

/// Connection lifecycle notifications published on the event bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    Connect,
    Disconnect { reason: String },
    ReconnectAttempt { attempt: u32 },
    Reconnect { attempt: u32 },
    /// First connection failed
    Error { message: String, unauthorized: bool },
    ReconnectError { message: String, unauthorized: bool },
}

impl Lifecycle {
    pub fn name(&self) -> &'static str {
        match self {
            Lifecycle::Connect => "connect",
            Lifecycle::Disconnect { .. } => "disconnect",
            Lifecycle::ReconnectAttempt { .. } => "reconnect_attempt",
            Lifecycle::Reconnect { .. } => "reconnect",
            Lifecycle::Error { .. } => "error",
            Lifecycle::ReconnectError { .. } => "reconnect_error",
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            Lifecycle::Error { unauthorized: true, .. } | Lifecycle::ReconnectError { unauthorized: true, .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedPayload {
    #[serde(rename = "_id", alias = "id", alias = "messageId")]
    pub id: MessageId,
    #[serde(default)]
    pub deleted_by: Option<UserId>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub sender_id: UserId,
    #[serde(default)]
    pub sender_name: Option<String>,
    #[serde(default)]
    pub recipient_user_id: Option<UserId>,
}

impl TypingPayload {
    pub fn label(&self) -> String {
        match &self.sender_name {
            Some(name) if !name.trim().is_empty() => format!("{} is typing...", name.trim()),
            _ => "Someone is typing...".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    pub user_id: UserId,
    pub is_online: bool,
    #[serde(default)]
    pub last_seen_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    ChatNew(Message),
    /// Edits and reaction changes, as the whole updated message
    ChatUpdated(Message),
    ChatDeleted(DeletedPayload),
    ChatTyping(TypingPayload),
    PresenceUpdated(PresencePayload),
    NotificationNew(Notification),
    /// `<name>:updated` broadcast for a record page outside chat
    DomainUpdated { name: String, payload: Value },
}

/// Anything a subscriber of the connection manager may receive
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    Lifecycle(Lifecycle),
    Inbound(InboundEvent),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    pub fn parse(text: &str) -> SyncResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

impl InboundEvent {
    /// `Ok(None)` for event names this client does not handle
    pub fn decode(frame: Frame) -> SyncResult<Option<Self>> {
        let Frame { event, data } = frame;
        let decoded = match event.as_str() {
            "chat:new" => InboundEvent::ChatNew(serde_json::from_value(data)?),
            "chat:updated" => InboundEvent::ChatUpdated(serde_json::from_value(data)?),
            "chat:deleted" => InboundEvent::ChatDeleted(serde_json::from_value(data)?),
            "chat:typing" => InboundEvent::ChatTyping(serde_json::from_value(data)?),
            "presence:updated" => InboundEvent::PresenceUpdated(serde_json::from_value(data)?),
            "notification:new" => InboundEvent::NotificationNew(serde_json::from_value(data)?),
            other => match other.strip_suffix(":updated") {
                Some(name) if !name.is_empty() => InboundEvent::DomainUpdated {
                    name: name.to_string(),
                    payload: data,
                },
                _ => return Ok(None),
            },
        };
        Ok(Some(decoded))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundEvent {
    ChatTyping { recipient_user_id: Option<UserId> },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TypingData<'a> {
    recipient_user_id: Option<&'a str>,
}

impl OutboundEvent {
    pub fn encode(&self) -> SyncResult<String> {
        let frame = match self {
            OutboundEvent::ChatTyping { recipient_user_id } => Frame {
                event: "chat:typing".to_string(),
                data: serde_json::to_value(TypingData {
                    recipient_user_id: recipient_user_id.as_deref(),
                })?,
            },
        };
        Ok(serde_json::to_string(&frame)?)
    }
}
