//! Request and response shapes of the chat REST endpoints

use crate::models::{Message, MessageDraft, MessageId, MessageKind, UserId};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// `GET /chat/messages` parameters. `before` pages backward, `after` forward.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub limit: usize,
    pub before: Option<DateTime<Utc>>,
    pub after: Option<DateTime<Utc>>,
}

impl PageQuery {
    pub fn latest(limit: usize) -> Self {
        Self {
            limit,
            before: None,
            after: None,
        }
    }

    pub fn older_than(limit: usize, before: DateTime<Utc>) -> Self {
        Self {
            before: Some(before),
            ..Self::latest(limit)
        }
    }

    pub fn newer_than(limit: usize, after: DateTime<Utc>) -> Self {
        Self {
            after: Some(after),
            ..Self::latest(limit)
        }
    }

    pub fn to_query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("limit", self.limit.to_string())];
        if let Some(before) = self.before {
            pairs.push(("before", before.to_rfc3339_opts(SecondsFormat::Millis, true)));
        }
        if let Some(after) = self.after {
            pairs.push(("after", after.to_rfc3339_opts(SecondsFormat::Millis, true)));
        }
        pairs
    }
}

/// One page of messages, normalized across both response shapes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessagePage {
    pub items: Vec<Message>,
    pub has_more: bool,
    pub next_before: Option<DateTime<Utc>>,
}

impl MessagePage {
    pub fn from_wire(wire: PageWire, limit: usize) -> Self {
        match wire {
            PageWire::Paged {
                items,
                has_more,
                next_before,
            } => {
                let has_more = has_more.unwrap_or(items.len() >= limit);
                Self {
                    items,
                    has_more,
                    next_before,
                }
            }
            // Older servers return a bare array; a short page means the end
            PageWire::Legacy(items) => Self {
                has_more: items.len() >= limit,
                items,
                next_before: None,
            },
        }
    }

    pub fn oldest(&self) -> Option<DateTime<Utc>> {
        self.items.iter().map(|m| m.created_at).min()
    }

    pub fn newest(&self) -> Option<DateTime<Utc>> {
        self.items.iter().map(|m| m.created_at).max()
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PageWire {
    Paged {
        items: Vec<Message>,
        #[serde(default, rename = "hasMore")]
        has_more: Option<bool>,
        #[serde(default, rename = "nextBefore")]
        next_before: Option<DateTime<Utc>>,
    },
    Legacy(Vec<Message>),
}

/// `POST /chat/messages`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageBody {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    pub client_message_id: MessageId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<MessageId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_user_id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

impl SendMessageBody {
    pub fn from_draft(draft: &MessageDraft, client_message_id: MessageId) -> Self {
        Self {
            kind: draft.kind,
            content: draft.content.clone(),
            client_message_id,
            reply_to: draft.reply_to.clone(),
            recipient_user_id: draft.recipient_user_id.clone(),
            file_name: draft.file_name.clone(),
            mime_type: draft.mime_type.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct EditBody<'a> {
    pub content: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct ReactionBody<'a> {
    pub emoji: &'a str,
}
