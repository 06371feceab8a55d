pub mod message;
pub mod notification;

pub use message::{Message, MessageDraft, MessageId, MessageKind, Reaction, UserId};
pub use notification::{ChatUser, Notification};
