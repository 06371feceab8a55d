//! REST access to the chat backend

pub mod http;
pub mod requests;
pub mod tracker;

pub use http::HttpChatApi;
pub use requests::{MessagePage, PageQuery, SendMessageBody};
pub use tracker::{RequestGuard, RequestMode, RequestTracker};

use crate::error::SyncResult;
use crate::models::{ChatUser, Message, MessageId, Notification};
use async_trait::async_trait;

/// Chat and notification endpoints used by the sync layer.
///
/// `mode` marks reads issued by background work (resync, polling) so they
/// stay out of the loading indicator.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatApi: Send + Sync {
    async fn fetch_messages(&self, query: PageQuery, mode: RequestMode) -> SyncResult<MessagePage>;

    async fn send_message(&self, body: SendMessageBody) -> SyncResult<Message>;

    async fn edit_message(&self, id: &MessageId, content: &str) -> SyncResult<Message>;

    async fn delete_message(&self, id: &MessageId) -> SyncResult<Message>;

    async fn react(&self, id: &MessageId, emoji: &str) -> SyncResult<Message>;

    /// Marks every message addressed to the caller as read
    async fn mark_read(&self) -> SyncResult<()>;

    /// Server-side clear of the caller's conversation
    async fn clear_messages(&self) -> SyncResult<()>;

    async fn list_users(&self) -> SyncResult<Vec<ChatUser>>;

    async fn fetch_notifications(&self, mode: RequestMode) -> SyncResult<Vec<Notification>>;
}
