//! # Message Store
//!
//! Ordered, deduplicated view of one conversation.
//!
//! ## Invariants
//!
//! - Entries are sorted by `(created_at, id)` ascending after every operation,
//!   whatever order the network delivered them in.
//! - No two entries share an id. A provisional entry is keyed by its
//!   temporary id until the server echo (or the REST response) retires it.
//! - Deleted messages stay in place as tombstones so reply references and
//!   surrounding order remain stable.
//!
//! The local-clear cutoff only filters [`MessageStore::visible`]; the
//! underlying entries are never dropped by it.

use crate::models::{Message, MessageDraft, MessageId, UserId};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Optimistic entry waiting for server confirmation
    Sending,
    Sent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    pub message: Message,
    pub delivery: Delivery,
}

impl StoredMessage {
    fn sent(message: Message) -> Self {
        Self {
            message,
            delivery: Delivery::Sent,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.delivery == Delivery::Sending
    }
}

/// Result of feeding one live event into the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveOutcome {
    /// Final id already present
    Duplicate,
    /// Replaced the optimistic entry carrying the same client message id
    Reconciled { index: usize },
    Inserted { index: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditOutcome {
    Applied,
    /// The update carried deletion metadata
    Tombstoned,
    /// Target is a tombstone, or the update is older than what we hold
    Rejected,
    Missing,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub added: usize,
    pub updated: usize,
    pub reconciled: usize,
}

impl MergeReport {
    pub fn changed(&self) -> bool {
        self.added + self.updated + self.reconciled > 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    entries: Vec<StoredMessage>,
    clear_cutoff: Option<DateTime<Utc>>,
}

impl MessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the contents with a freshly fetched page
    pub fn load_initial(&mut self, items: Vec<Message>) {
        let mut positions: HashMap<MessageId, usize> = HashMap::with_capacity(items.len());
        self.entries.clear();

        for item in items {
            match positions.get(&item.id) {
                Some(&i) => self.entries[i] = StoredMessage::sent(item),
                None => {
                    positions.insert(item.id.clone(), self.entries.len());
                    self.entries.push(StoredMessage::sent(item));
                }
            }
        }

        self.sort();
        debug!(count = self.entries.len(), "message store loaded");
        debug_assert!(self.is_consistent());
    }

    /// Applies a `chat:new` push
    pub fn append_or_reconcile_live(&mut self, incoming: Message) -> LiveOutcome {
        let pending = incoming
            .client_message_id
            .as_ref()
            .and_then(|cid| self.find_pending(cid));

        if self.find(&incoming.id).is_some() {
            // Echo of a message we already hold; make sure no provisional twin lingers
            if let Some(pending) = pending {
                self.entries.remove(pending);
            }
            trace!(id = %incoming.id, "duplicate live message ignored");
            return LiveOutcome::Duplicate;
        }

        if let Some(pending) = pending {
            let index = self.replace_at(pending, incoming);
            debug_assert!(self.is_consistent());
            return LiveOutcome::Reconciled { index };
        }

        let index = self.insert_sorted(StoredMessage::sent(incoming));
        debug_assert!(self.is_consistent());
        LiveOutcome::Inserted { index }
    }

    /// Same as a live echo, for the REST response of our own send
    pub fn confirm_sent(&mut self, temp_id: &MessageId, mut persisted: Message) -> LiveOutcome {
        if persisted.client_message_id.is_none() {
            persisted.client_message_id = Some(temp_id.clone());
        }
        self.append_or_reconcile_live(persisted)
    }

    /// Adds a provisional entry at the bottom of the conversation
    pub fn insert_optimistic(
        &mut self,
        draft: MessageDraft,
        sender_id: UserId,
        now: DateTime<Utc>,
    ) -> Message {
        // Never sort a draft above history because of local clock skew
        let created_at = match self.entries.last() {
            Some(last) if last.message.created_at >= now => {
                last.message.created_at + chrono::Duration::milliseconds(1)
            }
            _ => now,
        };
        let provisional = draft.into_provisional(sender_id, created_at);

        self.insert_sorted(StoredMessage {
            message: provisional.clone(),
            delivery: Delivery::Sending,
        });
        debug_assert!(self.is_consistent());
        provisional
    }

    /// Drops a provisional entry after a failed send and hands back its text
    pub fn rollback(&mut self, temp_id: &MessageId) -> Option<String> {
        let index = self.find_pending(temp_id)?;
        let removed = self.entries.remove(index);
        debug!(id = %temp_id, "optimistic message rolled back");
        Some(removed.message.content)
    }

    /// Unions older pages or gap-fill results into the store.
    /// Merging the same page again changes nothing.
    pub fn merge_backfill(&mut self, items: Vec<Message>) -> MergeReport {
        let mut report = MergeReport::default();

        for item in items {
            let pending = item
                .client_message_id
                .as_ref()
                .and_then(|cid| self.find_pending(cid));
            if let Some(pending) = pending {
                if self.find(&item.id).is_some() {
                    self.entries.remove(pending);
                } else {
                    self.entries[pending] = StoredMessage::sent(item);
                    report.reconciled += 1;
                    continue;
                }
            }

            match self.find(&item.id) {
                Some(i) => {
                    let existing = &mut self.entries[i].message;
                    if is_stale(existing, &item) || *existing == item {
                        continue;
                    }
                    *existing = item;
                    report.updated += 1;
                }
                None => {
                    self.entries.push(StoredMessage::sent(item));
                    report.added += 1;
                }
            }
        }

        self.sort();
        debug_assert!(self.is_consistent());
        report
    }

    /// Turns an entry into a tombstone. Position and timestamps are kept.
    pub fn mark_tombstone(
        &mut self,
        id: &MessageId,
        deleted_by: Option<UserId>,
        deleted_at: DateTime<Utc>,
    ) -> bool {
        let Some(index) = self.find(id) else {
            return false;
        };
        let message = &mut self.entries[index].message;
        if message.is_tombstone() {
            return false;
        }
        message.tombstone(deleted_by, deleted_at);
        true
    }

    /// Applies a whole-message update (edit or reaction change).
    /// Tombstones reject further updates.
    pub fn apply_edit(&mut self, updated: Message) -> EditOutcome {
        let Some(index) = self.find(&updated.id) else {
            return EditOutcome::Missing;
        };

        let existing = &mut self.entries[index].message;
        if existing.is_tombstone() || is_older_edit(existing, &updated) {
            return EditOutcome::Rejected;
        }

        if let Some(deleted_at) = updated.deleted_at {
            existing.tombstone(updated.deleted_by, deleted_at);
            return EditOutcome::Tombstoned;
        }

        self.replace_at(index, updated);
        debug_assert!(self.is_consistent());
        EditOutcome::Applied
    }

    /// Records `user_id` as reader of everything up to `up_to` sent by others
    pub fn mark_read_by(&mut self, user_id: &str, up_to: DateTime<Utc>) -> usize {
        let mut changed = 0;
        for entry in &mut self.entries {
            let message = &mut entry.message;
            if message.created_at > up_to || message.sender_id == user_id {
                continue;
            }
            if message.read_by.insert(user_id.to_string()) {
                changed += 1;
            }
        }
        changed
    }

    /// Drops every confirmed entry, keeping in-flight sends
    pub fn clear_confirmed(&mut self) {
        self.entries.retain(StoredMessage::is_pending);
    }

    pub fn set_local_clear(&mut self, cutoff: DateTime<Utc>) {
        self.clear_cutoff = Some(cutoff);
    }

    pub fn reset_local_clear(&mut self) {
        self.clear_cutoff = None;
    }

    pub fn local_clear(&self) -> Option<DateTime<Utc>> {
        self.clear_cutoff
    }

    /// Entries after the local-clear cutoff, in conversation order
    pub fn visible(&self) -> impl DoubleEndedIterator<Item = &StoredMessage> + '_ {
        let cutoff = self.clear_cutoff;
        self.entries.iter().filter(move |entry| match cutoff {
            Some(cutoff) => entry.is_pending() || entry.message.created_at > cutoff,
            None => true,
        })
    }

    pub fn entries(&self) -> &[StoredMessage] {
        &self.entries
    }

    pub fn get(&self, id: &MessageId) -> Option<&StoredMessage> {
        self.find(id).map(|i| &self.entries[i])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Newest server-confirmed message; provisional entries carry local time
    pub fn newest_confirmed(&self) -> Option<&Message> {
        self.entries
            .iter()
            .rev()
            .find(|e| !e.is_pending())
            .map(|e| &e.message)
    }

    pub fn oldest_confirmed(&self) -> Option<&Message> {
        self.entries
            .iter()
            .find(|e| !e.is_pending())
            .map(|e| &e.message)
    }

    /// Sorted and free of duplicate ids
    pub fn is_consistent(&self) -> bool {
        let ordered = self
            .entries
            .windows(2)
            .all(|w| w[0].message.sort_key() < w[1].message.sort_key());
        let mut seen = HashSet::with_capacity(self.entries.len());
        ordered && self.entries.iter().all(|e| seen.insert(&e.message.id))
    }

    fn find(&self, id: &MessageId) -> Option<usize> {
        self.entries.iter().position(|e| &e.message.id == id)
    }

    fn find_pending(&self, client_id: &MessageId) -> Option<usize> {
        self.entries.iter().position(|e| {
            e.is_pending()
                && (&e.message.id == client_id
                    || e.message.client_message_id.as_ref() == Some(client_id))
        })
    }

    fn insert_sorted(&mut self, entry: StoredMessage) -> usize {
        let index = self
            .entries
            .partition_point(|e| e.message.sort_key() < entry.message.sort_key());
        self.entries.insert(index, entry);
        index
    }

    /// Swaps the entry in place; only moves it if the new key breaks ordering
    fn replace_at(&mut self, index: usize, message: Message) -> usize {
        self.entries[index] = StoredMessage::sent(message);

        let key = self.entries[index].message.sort_key();
        let after_prev = index == 0 || self.entries[index - 1].message.sort_key() < key;
        let before_next =
            index + 1 >= self.entries.len() || key < self.entries[index + 1].message.sort_key();
        if after_prev && before_next {
            return index;
        }

        let entry = self.entries.remove(index);
        self.insert_sorted(entry)
    }

    fn sort(&mut self) {
        self.entries
            .sort_by(|a, b| a.message.sort_key().cmp(&b.message.sort_key()));
    }
}

/// Fetched copy is older than what a live event already gave us
fn is_stale(existing: &Message, fetched: &Message) -> bool {
    (existing.is_tombstone() && !fetched.is_tombstone()) || is_older_edit(existing, fetched)
}

/// Only two known edit times are comparable; an update without `editedAt`
/// (a reaction push) is never treated as older
fn is_older_edit(existing: &Message, updated: &Message) -> bool {
    matches!((existing.edited_at, updated.edited_at), (Some(held), Some(new)) if held > new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Reaction;
    use chrono::{Duration, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn msg(id: &str, secs: i64) -> Message {
        let mut m = MessageDraft::text(format!("body {id}")).into_provisional("teacher".into(), at(secs));
        m.id = MessageId::new(id);
        m.client_message_id = None;
        m
    }

    fn ids(store: &MessageStore) -> Vec<&str> {
        store.entries().iter().map(|e| e.message.id.as_str()).collect()
    }

    #[test]
    fn test_load_initial_sorts_and_dedups() {
        let mut store = MessageStore::new();
        store.load_initial(vec![msg("c", 3), msg("a", 1), msg("b", 2), msg("a", 1)]);

        assert_eq!(ids(&store), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_equal_timestamps_tie_break_on_id() {
        let mut store = MessageStore::new();
        store.load_initial(vec![msg("m2", 5), msg("m10", 5), msg("m1", 5)]);

        assert_eq!(ids(&store), vec!["m1", "m10", "m2"]);
        assert!(store.is_consistent());
    }

    #[test]
    fn test_merge_backfill_is_idempotent() {
        let mut store = MessageStore::new();
        store.load_initial(vec![msg("d", 40), msg("e", 50)]);
        let page = vec![msg("a", 10), msg("c", 30), msg("b", 20)];

        let first = store.merge_backfill(page.clone());
        let snapshot = store.entries().to_vec();
        let second = store.merge_backfill(page);

        assert_eq!(first.added, 3);
        assert!(!second.changed());
        assert_eq!(store.entries(), snapshot.as_slice());
        assert_eq!(ids(&store), vec!["a", "b", "c", "d", "e"]);
    }

    #[test]
    fn test_order_holds_for_any_arrival_order() {
        let mut store = MessageStore::new();
        for (id, secs) in [("e", 5), ("a", 1), ("d", 4), ("b", 2), ("c", 3), ("b", 2)] {
            store.append_or_reconcile_live(msg(id, secs));
        }

        assert_eq!(ids(&store), vec!["a", "b", "c", "d", "e"]);
        let entries = store.entries();
        for pair in entries.windows(2) {
            let (a, b) = (&pair[0].message, &pair[1].message);
            assert!(a.created_at < b.created_at || (a.created_at == b.created_at && a.id < b.id));
        }
    }

    #[test]
    fn test_live_duplicate_is_noop() {
        let mut store = MessageStore::new();
        store.load_initial(vec![msg("a", 1)]);

        assert_eq!(store.append_or_reconcile_live(msg("a", 1)), LiveOutcome::Duplicate);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_optimistic_reconciled_in_place() {
        let mut store = MessageStore::new();
        store.load_initial(vec![msg("a", 1), msg("b", 2)]);

        let draft = store.insert_optimistic(MessageDraft::text("hi"), "student".into(), at(3));
        let temp_id = draft.id.clone();
        let position = store.entries().iter().position(|e| e.message.id == temp_id).unwrap();

        let mut echo = msg("final-1", 3);
        echo.content = "hi".into();
        echo.client_message_id = Some(temp_id.clone());

        assert_eq!(
            store.append_or_reconcile_live(echo),
            LiveOutcome::Reconciled { index: position }
        );
        assert_eq!(store.entries()[position].message.id.as_str(), "final-1");
        assert_eq!(store.entries()[position].delivery, Delivery::Sent);
        assert!(store.get(&temp_id).is_none());
        assert_eq!(
            store.entries().iter().filter(|e| e.message.id.as_str() == "final-1").count(),
            1
        );
    }

    #[test]
    fn test_echo_after_rest_confirmation_is_duplicate() {
        let mut store = MessageStore::new();
        let draft = store.insert_optimistic(MessageDraft::text("hi"), "student".into(), at(1));

        let mut persisted = msg("final-1", 1);
        persisted.client_message_id = None;
        store.confirm_sent(&draft.id, persisted.clone());

        persisted.client_message_id = Some(draft.id.clone());
        assert_eq!(store.append_or_reconcile_live(persisted), LiveOutcome::Duplicate);
        assert_eq!(ids(&store), vec!["final-1"]);
    }

    #[test]
    fn test_optimistic_lands_at_bottom_despite_clock_skew() {
        let mut store = MessageStore::new();
        store.load_initial(vec![msg("a", 100)]);

        let draft = store.insert_optimistic(MessageDraft::text("late clock"), "student".into(), at(50));

        assert_eq!(store.entries().last().unwrap().message.id, draft.id);
        assert!(store.entries().last().unwrap().is_pending());
    }

    #[test]
    fn test_rollback_returns_text() {
        let mut store = MessageStore::new();
        store.load_initial(vec![msg("a", 1)]);
        let draft = store.insert_optimistic(MessageDraft::text("unsent words"), "s".into(), at(2));

        assert_eq!(store.rollback(&draft.id).as_deref(), Some("unsent words"));
        assert_eq!(ids(&store), vec!["a"]);
        assert_eq!(store.rollback(&draft.id), None);
    }

    #[test]
    fn test_rollback_ignores_confirmed_entries() {
        let mut store = MessageStore::new();
        store.load_initial(vec![msg("a", 1)]);
        assert_eq!(store.rollback(&MessageId::new("a")), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_backfill_reconciles_lost_echo() {
        let mut store = MessageStore::new();
        let draft = store.insert_optimistic(MessageDraft::text("hi"), "s".into(), at(5));

        let mut fetched = msg("final-9", 5);
        fetched.client_message_id = Some(draft.id.clone());
        let report = store.merge_backfill(vec![fetched]);

        assert_eq!(report.reconciled, 1);
        assert_eq!(ids(&store), vec!["final-9"]);
        assert!(!store.entries()[0].is_pending());
    }

    #[test]
    fn test_tombstone_keeps_position_and_timestamp() {
        let mut store = MessageStore::new();
        store.load_initial(vec![msg("a", 1), msg("b", 2), msg("c", 3)]);

        assert!(store.mark_tombstone(&MessageId::new("b"), Some("teacher".into()), at(10)));

        assert_eq!(ids(&store), vec!["a", "b", "c"]);
        let b = &store.entries()[1].message;
        assert!(b.is_tombstone());
        assert!(b.content.is_empty());
        assert_eq!(b.created_at, at(2));
        assert_eq!(b.deleted_by.as_deref(), Some("teacher"));
    }

    #[test]
    fn test_edit_and_reaction_rejected_on_tombstone() {
        let mut store = MessageStore::new();
        store.load_initial(vec![msg("a", 1)]);
        store.mark_tombstone(&MessageId::new("a"), None, at(5));

        let mut late_reaction = msg("a", 1);
        late_reaction.reactions.push(Reaction {
            emoji: "🎉".into(),
            user_id: "student".into(),
        });
        assert_eq!(store.apply_edit(late_reaction), EditOutcome::Rejected);

        let mut late_edit = msg("a", 1);
        late_edit.content = "resurrected".into();
        late_edit.edited_at = Some(at(6));
        assert_eq!(store.apply_edit(late_edit), EditOutcome::Rejected);

        let a = &store.entries()[0].message;
        assert!(a.content.is_empty());
        assert!(a.reactions.is_empty());
    }

    #[test]
    fn test_backfill_does_not_resurrect_tombstone() {
        let mut store = MessageStore::new();
        store.load_initial(vec![msg("a", 1)]);
        store.mark_tombstone(&MessageId::new("a"), None, at(5));

        let report = store.merge_backfill(vec![msg("a", 1)]);

        assert!(!report.changed());
        assert!(store.entries()[0].message.is_tombstone());
    }

    #[test]
    fn test_apply_edit_replaces_whole_message() {
        let mut store = MessageStore::new();
        store.load_initial(vec![msg("a", 1), msg("b", 2)]);

        let mut edited = msg("a", 1);
        edited.content = "fixed typo".into();
        edited.edited_at = Some(at(9));

        assert_eq!(store.apply_edit(edited), EditOutcome::Applied);
        assert_eq!(store.entries()[0].message.content, "fixed typo");
        assert_eq!(store.apply_edit(msg("zzz", 1)), EditOutcome::Missing);
    }

    #[test]
    fn test_stale_edit_is_rejected() {
        let mut store = MessageStore::new();
        let mut newer = msg("a", 1);
        newer.content = "second edit".into();
        newer.edited_at = Some(at(20));
        store.load_initial(vec![newer]);

        let mut older = msg("a", 1);
        older.content = "first edit".into();
        older.edited_at = Some(at(10));

        assert_eq!(store.apply_edit(older), EditOutcome::Rejected);
        assert_eq!(store.entries()[0].message.content, "second edit");
    }

    #[test]
    fn test_reaction_push_without_edit_time_applies_to_edited_message() {
        let mut store = MessageStore::new();
        let mut edited = msg("a", 1);
        edited.content = "fixed".into();
        edited.edited_at = Some(at(20));
        store.load_initial(vec![edited.clone()]);

        let mut reacted = edited;
        reacted.edited_at = None;
        reacted.reactions.push(Reaction {
            emoji: "👍".into(),
            user_id: "student-1".into(),
        });

        assert_eq!(store.apply_edit(reacted.clone()), EditOutcome::Applied);
        assert_eq!(store.entries()[0].message.reactions.len(), 1);
        assert_eq!(store.entries()[0].message.content, "fixed");

        // Same payload through a backfill is not stale either
        let mut store = MessageStore::new();
        let mut held = reacted.clone();
        held.reactions.clear();
        held.edited_at = Some(at(20));
        store.load_initial(vec![held]);
        assert_eq!(store.merge_backfill(vec![reacted]).updated, 1);
    }

    #[test]
    fn test_update_with_deletion_metadata_tombstones() {
        let mut store = MessageStore::new();
        store.load_initial(vec![msg("a", 1)]);

        let mut deleted = msg("a", 1);
        deleted.deleted_at = Some(at(3));
        deleted.deleted_by = Some("teacher".into());

        assert_eq!(store.apply_edit(deleted), EditOutcome::Tombstoned);
        assert!(store.entries()[0].message.content.is_empty());
    }

    #[test]
    fn test_local_clear_filters_view_only() {
        let mut store = MessageStore::new();
        store.load_initial(vec![msg("a", 1), msg("b", 2), msg("c", 3)]);

        store.set_local_clear(at(3));
        assert_eq!(store.visible().count(), 0);
        assert_eq!(store.len(), 3);

        store.append_or_reconcile_live(msg("d", 4));
        assert_eq!(store.visible().count(), 1);

        store.reset_local_clear();
        assert_eq!(store.visible().count(), 4);
    }

    #[test]
    fn test_mark_read_by_skips_own_and_future() {
        let mut store = MessageStore::new();
        let mut own = msg("own", 1);
        own.sender_id = "student".into();
        store.load_initial(vec![own, msg("a", 2), msg("later", 100)]);

        assert_eq!(store.mark_read_by("student", at(50)), 1);
        assert!(store.entries()[1].message.read_by.contains("student"));
        assert!(!store.entries()[2].message.read_by.contains("student"));
    }

    #[test]
    fn test_newest_confirmed_skips_pending() {
        let mut store = MessageStore::new();
        store.load_initial(vec![msg("a", 1), msg("b", 2)]);
        store.insert_optimistic(MessageDraft::text("x"), "s".into(), at(3) + Duration::seconds(1));

        assert_eq!(store.newest_confirmed().unwrap().id.as_str(), "b");
        assert_eq!(store.oldest_confirmed().unwrap().id.as_str(), "a");

        store.clear_confirmed();
        assert_eq!(store.len(), 1);
        assert!(store.newest_confirmed().is_none());
    }
}
