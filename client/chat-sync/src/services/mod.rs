pub mod ledger;
pub mod pagination;
pub mod presence;
pub mod reconciliation;

pub use ledger::{
    display_count, PopupCategory, TimelineCategory, UnreadCounts, UnreadItem, UnreadLedger, UNREAD_DISPLAY_CAP,
};
pub use pagination::{PaginationController, ScrollAnchor};
pub use presence::{PresenceRecord, PresenceTracker, TypingThrottle};
pub use reconciliation::{Reconciler, ResyncReport};
