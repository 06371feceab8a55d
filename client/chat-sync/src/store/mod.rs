pub mod message_store;

pub use message_store::{
    Delivery, EditOutcome, LiveOutcome, MergeReport, MessageStore, StoredMessage,
};
