use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;

pub type UserId = String;

const TEMP_PREFIX: &str = "tmp-";

/// Message identity. Server ids are opaque strings; client-assigned
/// temporary ids carry the `tmp-` prefix until the server confirms.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Fresh client message id for an optimistic send
    pub fn temporary() -> Self {
        Self(format!("{TEMP_PREFIX}{}", Uuid::new_v4()))
    }

    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Announcement,
    Image,
    Video,
    Audio,
    /// Types this client does not know yet; rendered as text
    #[serde(other)]
    Other,
}

impl MessageKind {
    /// Media kinds carry a URI in `content`
    pub fn is_media(&self) -> bool {
        matches!(self, MessageKind::Image | MessageKind::Video | MessageKind::Audio)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub emoji: String,
    pub user_id: UserId,
}

/// Conversation message as served by `/chat/messages` and the socket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "_id", alias = "id")]
    pub id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<MessageId>,
    pub sender_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    /// `None` = broadcast to every participant
    #[serde(default)]
    pub recipient_user_id: Option<UserId>,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted_by: Option<UserId>,
    #[serde(default)]
    pub reply_to: Option<MessageId>,
    #[serde(default)]
    pub read_by: BTreeSet<UserId>,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
}

impl Message {
    pub fn is_tombstone(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Clears every content-bearing field and records who deleted it.
    /// Identity, timestamps and the reply reference are kept.
    pub fn tombstone(&mut self, deleted_by: Option<UserId>, deleted_at: DateTime<Utc>) {
        self.content.clear();
        self.file_name = None;
        self.mime_type = None;
        self.reactions.clear();
        self.deleted_at = Some(deleted_at);
        self.deleted_by = deleted_by;
    }

    /// Ordering key of the conversation view
    pub fn sort_key(&self) -> (DateTime<Utc>, &str) {
        (self.created_at, self.id.as_str())
    }
}

/// What the user composed; becomes an optimistic [`Message`] on send.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageDraft {
    pub kind: MessageKind,
    pub content: String,
    pub reply_to: Option<MessageId>,
    pub recipient_user_id: Option<UserId>,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
}

impl MessageDraft {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn replying_to(mut self, id: MessageId) -> Self {
        self.reply_to = Some(id);
        self
    }

    pub fn to_recipient(mut self, user_id: impl Into<UserId>) -> Self {
        self.recipient_user_id = Some(user_id.into());
        self
    }

    /// Provisional message shown until the server confirms
    pub fn into_provisional(self, sender_id: UserId, created_at: DateTime<Utc>) -> Message {
        let temp_id = MessageId::temporary();
        Message {
            id: temp_id.clone(),
            client_message_id: Some(temp_id),
            sender_id,
            sender_name: None,
            recipient_user_id: self.recipient_user_id,
            kind: self.kind,
            content: self.content,
            file_name: self.file_name,
            mime_type: self.mime_type,
            created_at,
            edited_at: None,
            deleted_at: None,
            deleted_by: None,
            reply_to: self.reply_to,
            read_by: BTreeSet::new(),
            reactions: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_server_message() {
        let msg: Message = serde_json::from_value(json!({
            "_id": "65f1c0",
            "senderId": "teacher-1",
            "type": "announcement",
            "content": "Holiday on Friday",
            "createdAt": "2024-03-13T10:00:00Z",
            "readBy": ["student-1"],
            "reactions": [{"emoji": "👍", "userId": "student-2"}]
        }))
        .unwrap();

        assert_eq!(msg.id.as_str(), "65f1c0");
        assert_eq!(msg.kind, MessageKind::Announcement);
        assert!(msg.recipient_user_id.is_none());
        assert!(msg.read_by.contains("student-1"));
        assert_eq!(msg.reactions.len(), 1);
        assert!(!msg.is_tombstone());
    }

    #[test]
    fn test_unknown_kind_decodes_as_other() {
        let msg: Message = serde_json::from_value(json!({
            "_id": "1",
            "senderId": "u",
            "type": "sticker",
            "createdAt": "2024-03-13T10:00:00Z"
        }))
        .unwrap();
        assert_eq!(msg.kind, MessageKind::Other);
    }

    #[test]
    fn test_tombstone_clears_content_only() {
        let mut msg = MessageDraft::text("secret")
            .replying_to(MessageId::new("parent"))
            .into_provisional("u1".into(), Utc::now());
        let created = msg.created_at;
        let id = msg.id.clone();

        msg.tombstone(Some("teacher".into()), Utc::now());

        assert!(msg.is_tombstone());
        assert!(msg.content.is_empty());
        assert_eq!(msg.id, id);
        assert_eq!(msg.created_at, created);
        assert_eq!(msg.reply_to, Some(MessageId::new("parent")));
    }

    #[test]
    fn test_temporary_ids() {
        let id = MessageId::temporary();
        assert!(id.is_temporary());
        assert!(!MessageId::new("65f1c0").is_temporary());
    }
}
