//! # Read/Unread Ledger
//!
//! Tracks what the user has already seen, per category:
//!
//! - **Timeline categories** (chat, notifications) keep a timestamp
//!   boundary. Unread = items strictly newer than the boundary (for chat,
//!   not sent by the local user), counted once per item id.
//! - **Popup categories** (badge, fee, reward) keep a capped set of
//!   acknowledged ids, so out-of-order delivery never re-shows an item.
//!
//! Boundaries are read from [`LocalStore`] when the ledger is loaded and
//! written back on every advance.

use crate::models::{Message, Notification, UserId};
use crate::storage::{keys, read_json, write_json, LocalStore};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};

/// Largest unread value rendered as a number
pub const UNREAD_DISPLAY_CAP: usize = 99;

pub fn display_count(count: usize) -> usize {
    count.min(UNREAD_DISPLAY_CAP)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimelineCategory {
    Chat,
    Notifications,
}

impl TimelineCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimelineCategory::Chat => "chat",
            TimelineCategory::Notifications => "notifications",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PopupCategory {
    Badge,
    Fee,
    Reward,
}

impl PopupCategory {
    pub const ALL: [PopupCategory; 3] = [PopupCategory::Badge, PopupCategory::Fee, PopupCategory::Reward];

    pub fn as_str(&self) -> &'static str {
        match self {
            PopupCategory::Badge => "badge-popups",
            PopupCategory::Fee => "fee-popups",
            PopupCategory::Reward => "reward-popups",
        }
    }
}

/// Anything that can be counted as unread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnreadItem {
    pub id: String,
    pub at: DateTime<Utc>,
    pub sender_id: Option<UserId>,
}

impl From<&Message> for UnreadItem {
    fn from(m: &Message) -> Self {
        Self {
            id: m.id.to_string(),
            at: m.created_at,
            sender_id: Some(m.sender_id.clone()),
        }
    }
}

impl From<&Notification> for UnreadItem {
    fn from(n: &Notification) -> Self {
        Self {
            id: n.id.clone(),
            at: n.created_at,
            sender_id: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UnreadCounts {
    pub chat: usize,
    pub notifications: usize,
}

impl UnreadCounts {
    pub fn display_chat(&self) -> usize {
        display_count(self.chat)
    }

    pub fn display_notifications(&self) -> usize {
        display_count(self.notifications)
    }
}

#[derive(Debug, Default)]
struct TimelineState {
    seen_at: Option<DateTime<Utc>>,
    unread: HashSet<String>,
    visiting: bool,
}

pub struct UnreadLedger {
    user_id: UserId,
    storage: Arc<dyn LocalStore>,
    chat: TimelineState,
    notifications: TimelineState,
    popups: HashMap<PopupCategory, VecDeque<String>>,
    popup_cap: usize,
}

impl UnreadLedger {
    /// Reads every boundary of `user_id` from durable storage
    pub fn load(user_id: impl Into<UserId>, storage: Arc<dyn LocalStore>, popup_cap: usize) -> Self {
        let user_id = user_id.into();

        let timeline = |category: TimelineCategory| TimelineState {
            seen_at: read_json(storage.as_ref(), &keys::seen_boundary(category.as_str(), &user_id)),
            ..Default::default()
        };
        let chat = timeline(TimelineCategory::Chat);
        let notifications = timeline(TimelineCategory::Notifications);

        let popups = PopupCategory::ALL
            .iter()
            .map(|&category| {
                let key = keys::seen_boundary(category.as_str(), &user_id);
                let ids: VecDeque<String> = read_json(storage.as_ref(), &key).unwrap_or_default();
                (category, ids)
            })
            .collect();

        debug!(
            %user_id,
            chat_seen = ?chat.seen_at,
            notifications_seen = ?notifications.seen_at,
            "unread ledger loaded"
        );

        Self {
            user_id,
            storage,
            chat,
            notifications,
            popups,
            popup_cap: popup_cap.max(1),
        }
    }

    /// Folds fetched or streamed items into the unread count and returns it.
    ///
    /// Without a stored boundary the batch is treated as history: the
    /// boundary is set to now (or the newest item, if later) and nothing
    /// counts as unread.
    pub fn observe<I>(&mut self, category: TimelineCategory, items: I, now: DateTime<Utc>) -> usize
    where
        I: IntoIterator<Item = UnreadItem>,
    {
        let user_id = self.user_id.clone();
        let state = self.state_mut(category);

        let Some(seen_at) = state.seen_at else {
            let newest = items.into_iter().map(|item| item.at).max();
            let boundary = newest.map_or(now, |newest| newest.max(now));
            state.seen_at = Some(boundary);
            debug!(category = category.as_str(), %boundary, "first view, history absorbed");
            self.persist_timeline(category);
            return 0;
        };

        let mut boundary = seen_at;
        for item in items {
            if item.at <= seen_at {
                continue;
            }
            if category == TimelineCategory::Chat && item.sender_id.as_deref() == Some(user_id.as_str()) {
                continue;
            }
            if state.visiting {
                // Surface is open: the item is seen as it arrives
                boundary = boundary.max(item.at);
            } else {
                state.unread.insert(item.id);
            }
        }
        state.seen_at = Some(boundary);
        let unread = state.unread.len();

        if boundary > seen_at {
            self.persist_timeline(category);
        }
        unread
    }

    /// Called when the surface becomes active. Advances the boundary once per
    /// visit; returns `false` if the visit was already recorded.
    pub fn mark_viewed(&mut self, category: TimelineCategory, now: DateTime<Utc>) -> bool {
        let state = self.state_mut(category);
        if state.visiting {
            return false;
        }

        state.visiting = true;
        state.unread.clear();
        state.seen_at = Some(state.seen_at.map_or(now, |seen| seen.max(now)));
        self.persist_timeline(category);
        true
    }

    /// Ends the visit; anything shown while it was open stays read
    pub fn leave(&mut self, category: TimelineCategory, now: DateTime<Utc>) {
        let state = self.state_mut(category);
        if !state.visiting {
            return;
        }

        state.visiting = false;
        state.seen_at = Some(state.seen_at.map_or(now, |seen| seen.max(now)));
        self.persist_timeline(category);
    }

    pub fn is_visiting(&self, category: TimelineCategory) -> bool {
        self.state(category).visiting
    }

    pub fn unread(&self, category: TimelineCategory) -> usize {
        self.state(category).unread.len()
    }

    pub fn seen_at(&self, category: TimelineCategory) -> Option<DateTime<Utc>> {
        self.state(category).seen_at
    }

    pub fn counts(&self) -> UnreadCounts {
        UnreadCounts {
            chat: self.chat.unread.len(),
            notifications: self.notifications.unread.len(),
        }
    }

    pub fn should_show(&self, category: PopupCategory, id: &str) -> bool {
        self.popups
            .get(&category)
            .map_or(true, |ids| !ids.iter().any(|seen| seen == id))
    }

    /// Filters `ids` down to the ones not acknowledged yet
    pub fn pending_popups<'a, I>(&self, category: PopupCategory, ids: I) -> Vec<&'a str>
    where
        I: IntoIterator<Item = &'a str>,
    {
        ids.into_iter()
            .filter(|id| self.should_show(category, id))
            .collect()
    }

    /// Records a popup as shown. Oldest ids are trimmed beyond the cap.
    pub fn acknowledge(&mut self, category: PopupCategory, id: &str) -> bool {
        if !self.should_show(category, id) {
            return false;
        }

        let cap = self.popup_cap;
        let ids = self.popups.entry(category).or_default();
        ids.push_back(id.to_string());
        while ids.len() > cap {
            ids.pop_front();
        }

        let key = keys::seen_boundary(category.as_str(), &self.user_id);
        if let Err(e) = write_json(self.storage.as_ref(), &key, &*ids) {
            warn!(%key, error = %e, "failed to persist popup boundary");
        }
        true
    }

    fn state(&self, category: TimelineCategory) -> &TimelineState {
        match category {
            TimelineCategory::Chat => &self.chat,
            TimelineCategory::Notifications => &self.notifications,
        }
    }

    fn state_mut(&mut self, category: TimelineCategory) -> &mut TimelineState {
        match category {
            TimelineCategory::Chat => &mut self.chat,
            TimelineCategory::Notifications => &mut self.notifications,
        }
    }

    fn persist_timeline(&self, category: TimelineCategory) {
        let Some(seen_at) = self.state(category).seen_at else {
            return;
        };
        let key = keys::seen_boundary(category.as_str(), &self.user_id);
        if let Err(e) = write_json(self.storage.as_ref(), &key, &seen_at) {
            warn!(%key, error = %e, "failed to persist seen boundary");
        }
    }
}
