//! # Chat Session
//!
//! Owns the synchronization state of one signed-in user: message store,
//! pagination cursor, presence tracker, unread ledger and the reconciler.
//! Everything is mutated through `&mut self` from a single task, either by
//! calling the methods directly or by driving [`ChatSession::run`] with
//! [`SessionCommand`]s.
//!
//! Every state change is recorded as a [`SyncUpdate`] for the UI layer.

use crate::api::{ChatApi, RequestMode, SendMessageBody};
use crate::error::{SyncError, SyncResult};
use crate::models::{Message, MessageDraft, MessageId, Notification, UserId};
use crate::services::{
    PaginationController, PopupCategory, PresenceRecord, PresenceTracker, Reconciler, TimelineCategory,
    TypingThrottle, UnreadCounts, UnreadItem, UnreadLedger,
};
use crate::state::SyncContext;
use crate::storage::{keys, read_json, write_json, LocalStore, SessionStore};
use crate::store::{EditOutcome, LiveOutcome, MergeReport, MessageStore, StoredMessage};
use crate::transport::{ConnectionManager, ConnectionStatus, InboundEvent, OutboundEvent, SocketEvent};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// What changed, for whoever renders the session
#[derive(Debug, Clone, PartialEq)]
pub enum SyncUpdate {
    Status(ConnectionStatus),
    /// The visible conversation changed
    Messages,
    Unread(UnreadCounts),
    Notifications,
    Typing(Option<String>),
    Presence { user_id: UserId, online: bool },
    /// A record page outside chat should refetch
    DomainRefresh(String),
    /// The server rejected the credential; it was dropped and the socket closed
    SessionInvalidated,
}

/// Requests accepted by [`ChatSession::run`]
#[derive(Debug)]
pub enum SessionCommand {
    Send {
        draft: MessageDraft,
        reply: oneshot::Sender<SyncResult<Message>>,
    },
    LoadOlder {
        reply: oneshot::Sender<SyncResult<Option<MergeReport>>>,
    },
    Edit {
        id: MessageId,
        content: String,
        reply: oneshot::Sender<SyncResult<EditOutcome>>,
    },
    Delete {
        id: MessageId,
        reply: oneshot::Sender<SyncResult<()>>,
    },
    React {
        id: MessageId,
        emoji: String,
        reply: oneshot::Sender<SyncResult<EditOutcome>>,
    },
    ClearServer {
        reply: oneshot::Sender<SyncResult<()>>,
    },
    ViewChat,
    LeaveChat,
    ViewNotifications,
    LeaveNotifications,
    ClearLocal,
    ResetLocalClear,
    Typing {
        recipient_user_id: Option<UserId>,
    },
    AcknowledgePopup {
        category: PopupCategory,
        id: String,
    },
}

pub struct ChatSession {
    user_id: UserId,
    api: Arc<dyn ChatApi>,
    connection: Arc<ConnectionManager>,
    storage: Arc<dyn LocalStore>,
    poll_interval: Duration,
    store: MessageStore,
    pager: PaginationController,
    presence: PresenceTracker,
    throttle: TypingThrottle,
    ledger: UnreadLedger,
    reconciler: Reconciler,
    notifications: Vec<Notification>,
    outbox: Vec<SyncUpdate>,
    invalidated: bool,
}

impl ChatSession {
    pub fn new(ctx: &SyncContext, user_id: impl Into<UserId>) -> Self {
        let user_id = user_id.into();
        let config = &ctx.config;

        let mut store = MessageStore::new();
        let clear_key = keys::local_clear(&user_id);
        if let Some(cutoff) = read_json::<DateTime<Utc>>(ctx.storage.as_ref(), &clear_key) {
            store.set_local_clear(cutoff);
        }

        Self {
            api: ctx.api.clone(),
            connection: ctx.connection.clone(),
            storage: ctx.storage.clone(),
            poll_interval: config.notification_poll_interval,
            store,
            pager: PaginationController::new(config.page_size),
            presence: PresenceTracker::new(user_id.clone(), config.typing.expiry),
            throttle: TypingThrottle::new(config.typing.emit_interval),
            ledger: UnreadLedger::load(user_id.clone(), ctx.storage.clone(), config.popup_id_cap),
            reconciler: Reconciler::new(config.resync_max_pages),
            notifications: Vec::new(),
            outbox: Vec::new(),
            invalidated: false,
            user_id,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    /// Conversation as rendered: ordered, local-clear applied
    pub fn messages(&self) -> impl DoubleEndedIterator<Item = &StoredMessage> + '_ {
        self.store.visible()
    }

    pub fn pagination(&self) -> &PaginationController {
        &self.pager
    }

    pub fn unread(&self) -> UnreadCounts {
        self.ledger.counts()
    }

    pub fn notifications(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn typing_label(&self, now: Instant) -> Option<&str> {
        self.presence.typing_label(now)
    }

    pub fn presence(&self, user_id: &str) -> PresenceRecord {
        self.presence.presence(user_id)
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    /// Drains the updates recorded since the last call
    pub fn take_updates(&mut self) -> Vec<SyncUpdate> {
        std::mem::take(&mut self.outbox)
    }

    /// Initial load: first message page, participants, notifications.
    /// Only the message page is fatal.
    pub async fn open(&mut self) -> SyncResult<()> {
        let loaded = self.pager.load_initial(self.api.as_ref(), &mut self.store).await;
        self.check(loaded).await?;
        self.push(SyncUpdate::Messages);
        self.observe_chat();

        match self.api.list_users().await {
            Ok(users) => self.presence.seed(&users),
            Err(e) => {
                let e = self.screen(e).await;
                warn!(error = %e, "participant list unavailable");
            }
        }

        self.refresh_notifications(RequestMode::Foreground).await;
        info!(
            user_id = %self.user_id,
            messages = self.store.len(),
            has_more = self.pager.has_more(),
            "chat session opened"
        );
        Ok(())
    }

    /// Optimistic send. On failure the provisional entry is removed and the
    /// composed text comes back in [`SyncError::SendFailed`].
    pub async fn send(&mut self, draft: MessageDraft) -> SyncResult<Message> {
        let composed = draft.clone();
        let provisional = self.store.insert_optimistic(draft, self.user_id.clone(), Utc::now());
        let temp_id = provisional.id;
        self.push(SyncUpdate::Messages);

        let body = SendMessageBody::from_draft(&composed, temp_id.clone());
        match self.api.send_message(body).await {
            Ok(persisted) => {
                let outcome = self.store.confirm_sent(&temp_id, persisted.clone());
                debug!(temp_id = %temp_id, id = %persisted.id, ?outcome, "send confirmed");
                self.push(SyncUpdate::Messages);
                Ok(persisted)
            }
            Err(e) => {
                let restored = self.store.rollback(&temp_id).unwrap_or(composed.content);
                self.push(SyncUpdate::Messages);
                let source = self.screen(e).await;
                warn!(temp_id = %temp_id, error = %source, "send failed, rolled back");
                Err(SyncError::SendFailed {
                    draft: restored,
                    source: Box::new(source),
                })
            }
        }
    }

    pub async fn load_older(&mut self) -> SyncResult<Option<MergeReport>> {
        let loaded = self.pager.load_older(self.api.as_ref(), &mut self.store).await;
        let report = self.check(loaded).await?;
        if report.map_or(false, |r| r.changed()) {
            self.push(SyncUpdate::Messages);
        }
        Ok(report)
    }

    pub async fn edit(&mut self, id: &MessageId, content: &str) -> SyncResult<EditOutcome> {
        self.ensure_mutable(id)?;
        let updated = self.api.edit_message(id, content).await;
        let updated = self.check(updated).await?;
        Ok(self.apply_update(updated))
    }

    pub async fn react(&mut self, id: &MessageId, emoji: &str) -> SyncResult<EditOutcome> {
        self.ensure_mutable(id)?;
        let updated = self.api.react(id, emoji).await;
        let updated = self.check(updated).await?;
        Ok(self.apply_update(updated))
    }

    /// Deleting an existing tombstone is a no-op
    pub async fn delete(&mut self, id: &MessageId) -> SyncResult<()> {
        match self.store.get(id) {
            Some(entry) if entry.message.is_tombstone() => return Ok(()),
            Some(entry) if !entry.is_pending() => {}
            _ => return Err(SyncError::MessageNotFound(id.to_string())),
        }

        let deleted = self.api.delete_message(id).await;
        let deleted = self.check(deleted).await?;
        let deleted_at = deleted.deleted_at.unwrap_or_else(Utc::now);
        let deleted_by = deleted.deleted_by.or_else(|| Some(self.user_id.clone()));
        if self.store.mark_tombstone(id, deleted_by, deleted_at) {
            self.push(SyncUpdate::Messages);
        }
        Ok(())
    }

    /// Server-side clear; in-flight sends survive
    pub async fn clear_server(&mut self) -> SyncResult<()> {
        let cleared = self.api.clear_messages().await;
        self.check(cleared).await?;
        self.store.clear_confirmed();
        self.pager = PaginationController::new(self.pager.page_size());
        self.push(SyncUpdate::Messages);
        Ok(())
    }

    /// Hides everything up to `now` on this device only
    pub fn clear_local(&mut self, now: DateTime<Utc>) {
        self.store.set_local_clear(now);
        let key = keys::local_clear(&self.user_id);
        if let Err(e) = write_json(self.storage.as_ref(), &key, &now) {
            warn!(%key, error = %e, "failed to persist local clear");
        }
        self.push(SyncUpdate::Messages);
    }

    pub fn reset_local_clear(&mut self) {
        self.store.reset_local_clear();
        let key = keys::local_clear(&self.user_id);
        if let Err(e) = self.storage.remove(&key) {
            warn!(%key, error = %e, "failed to drop local clear");
        }
        self.push(SyncUpdate::Messages);
    }

    /// The chat surface became active. Returns `false` when this visit was
    /// already recorded.
    pub async fn view_chat(&mut self, now: DateTime<Utc>) -> bool {
        if !self.ledger.mark_viewed(TimelineCategory::Chat, now) {
            return false;
        }

        if self.store.mark_read_by(&self.user_id, now) > 0 {
            self.push(SyncUpdate::Messages);
        }
        self.push(SyncUpdate::Unread(self.ledger.counts()));

        if let Err(e) = self.api.mark_read().await {
            let e = self.screen(e).await;
            warn!(error = %e, "read receipt not delivered");
        }
        true
    }

    pub fn leave_chat(&mut self, now: DateTime<Utc>) {
        self.ledger.leave(TimelineCategory::Chat, now);
    }

    pub fn view_notifications(&mut self, now: DateTime<Utc>) -> bool {
        if !self.ledger.mark_viewed(TimelineCategory::Notifications, now) {
            return false;
        }
        self.push(SyncUpdate::Unread(self.ledger.counts()));
        true
    }

    pub fn leave_notifications(&mut self, now: DateTime<Utc>) {
        self.ledger.leave(TimelineCategory::Notifications, now);
    }

    pub fn should_show_popup(&self, category: PopupCategory, id: &str) -> bool {
        self.ledger.should_show(category, id)
    }

    pub fn acknowledge_popup(&mut self, category: PopupCategory, id: &str) -> bool {
        self.ledger.acknowledge(category, id)
    }

    /// Keystroke in the composer. Emits `chat:typing` at most once per
    /// throttle interval; returns whether it did.
    pub fn on_typing_input(&mut self, recipient_user_id: Option<UserId>, now: Instant) -> bool {
        if !self.throttle.should_emit(now) {
            return false;
        }
        match self.connection.emit(OutboundEvent::ChatTyping { recipient_user_id }) {
            Ok(()) => true,
            Err(e) => {
                trace!(error = %e, "typing not emitted");
                false
            }
        }
    }

    /// Background notification refresh
    pub async fn poll_notifications(&mut self) -> Vec<SyncUpdate> {
        self.refresh_notifications(RequestMode::Background).await;
        self.take_updates()
    }

    /// Forward gap-fill plus notification refresh. Failures are logged and
    /// left for the next reconnect.
    pub async fn resync(&mut self) -> Vec<SyncUpdate> {
        self.resync_now().await;
        self.take_updates()
    }

    pub async fn handle_status(&mut self, status: ConnectionStatus) -> Vec<SyncUpdate> {
        self.push(SyncUpdate::Status(status));
        if self.reconciler.on_status(status) {
            self.resync_now().await;
        }
        self.take_updates()
    }

    pub async fn handle_event(&mut self, event: SocketEvent) -> Vec<SyncUpdate> {
        match event {
            SocketEvent::Inbound(inbound) => self.apply_inbound(inbound),
            SocketEvent::Lifecycle(lifecycle) if lifecycle.is_unauthorized() => {
                self.invalidate().await;
            }
            SocketEvent::Lifecycle(lifecycle) => trace!(event = lifecycle.name(), "lifecycle event"),
        }
        self.take_updates()
    }

    /// Clears an expired typing label
    pub fn expire_typing(&mut self, now: Instant) -> Option<SyncUpdate> {
        self.presence.expire(now).then_some(SyncUpdate::Typing(None))
    }

    /// Drives the session until `shutdown` fires or every input closes
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
        updates: mpsc::UnboundedSender<SyncUpdate>,
        mut shutdown: oneshot::Receiver<()>,
    ) -> Self {
        let mut status_rx = self.connection.subscribe_status();
        let mut events_rx = self.connection.subscribe_events();
        let period = self.poll_interval.max(Duration::from_secs(1));
        let mut poll = tokio::time::interval_at(Instant::now() + period, period);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let initial = *status_rx.borrow_and_update();
        publish(&updates, self.handle_status(initial).await);

        loop {
            let typing_deadline = self.presence.next_expiry();
            tokio::select! {
                _ = &mut shutdown => break,
                changed = status_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let status = *status_rx.borrow_and_update();
                    publish(&updates, self.handle_status(status).await);
                }
                received = events_rx.recv() => match received {
                    Ok(event) => publish(&updates, self.handle_event(event).await),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event bus lagged, resyncing");
                        publish(&updates, self.resync().await);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = tokio::time::sleep_until(typing_deadline.unwrap_or_else(Instant::now)), if typing_deadline.is_some() => {
                    if let Some(update) = self.expire_typing(Instant::now()) {
                        publish(&updates, vec![update]);
                    }
                }
                _ = poll.tick() => publish(&updates, self.poll_notifications().await),
                command = commands.recv() => match command {
                    Some(command) => {
                        self.execute(command).await;
                        publish(&updates, self.take_updates());
                    }
                    None => break,
                },
            }
        }

        debug!(user_id = %self.user_id, "session driver stopped");
        self
    }

    async fn execute(&mut self, command: SessionCommand) {
        // A caller that stopped waiting for its reply is fine
        match command {
            SessionCommand::Send { draft, reply } => {
                let _ = reply.send(self.send(draft).await);
            }
            SessionCommand::LoadOlder { reply } => {
                let _ = reply.send(self.load_older().await);
            }
            SessionCommand::Edit { id, content, reply } => {
                let _ = reply.send(self.edit(&id, &content).await);
            }
            SessionCommand::Delete { id, reply } => {
                let _ = reply.send(self.delete(&id).await);
            }
            SessionCommand::React { id, emoji, reply } => {
                let _ = reply.send(self.react(&id, &emoji).await);
            }
            SessionCommand::ClearServer { reply } => {
                let _ = reply.send(self.clear_server().await);
            }
            SessionCommand::ViewChat => {
                self.view_chat(Utc::now()).await;
            }
            SessionCommand::LeaveChat => self.leave_chat(Utc::now()),
            SessionCommand::ViewNotifications => {
                self.view_notifications(Utc::now());
            }
            SessionCommand::LeaveNotifications => self.leave_notifications(Utc::now()),
            SessionCommand::ClearLocal => self.clear_local(Utc::now()),
            SessionCommand::ResetLocalClear => self.reset_local_clear(),
            SessionCommand::Typing { recipient_user_id } => {
                self.on_typing_input(recipient_user_id, Instant::now());
            }
            SessionCommand::AcknowledgePopup { category, id } => {
                self.acknowledge_popup(category, &id);
            }
        }
    }

    fn apply_inbound(&mut self, event: InboundEvent) {
        match event {
            InboundEvent::ChatNew(message) => {
                let item = UnreadItem::from(&message);
                if self.store.append_or_reconcile_live(message) == LiveOutcome::Duplicate {
                    return;
                }
                self.push(SyncUpdate::Messages);
                self.ledger.observe(TimelineCategory::Chat, [item], Utc::now());
                self.push(SyncUpdate::Unread(self.ledger.counts()));
            }
            InboundEvent::ChatUpdated(message) => {
                self.apply_update(message);
            }
            InboundEvent::ChatDeleted(deleted) => {
                let deleted_at = deleted.deleted_at.unwrap_or_else(Utc::now);
                if self.store.mark_tombstone(&deleted.id, deleted.deleted_by, deleted_at) {
                    self.push(SyncUpdate::Messages);
                }
            }
            InboundEvent::ChatTyping(typing) => {
                if typing
                    .recipient_user_id
                    .as_deref()
                    .map_or(false, |recipient| recipient != self.user_id)
                {
                    return;
                }
                let label = typing.label();
                if self.presence.on_typing_event(&typing.sender_id, label.clone(), Instant::now()) {
                    self.push(SyncUpdate::Typing(Some(label)));
                }
            }
            InboundEvent::PresenceUpdated(presence) => {
                self.presence
                    .update_presence(&presence.user_id, presence.is_online, presence.last_seen_at);
                self.push(SyncUpdate::Presence {
                    user_id: presence.user_id,
                    online: presence.is_online,
                });
            }
            InboundEvent::NotificationNew(notification) => self.merge_notifications(vec![notification]),
            InboundEvent::DomainUpdated { name, .. } => self.push(SyncUpdate::DomainRefresh(name)),
        }
    }

    fn apply_update(&mut self, message: Message) -> EditOutcome {
        let id = message.id.clone();
        let outcome = self.store.apply_edit(message);
        match outcome {
            EditOutcome::Applied | EditOutcome::Tombstoned => self.push(SyncUpdate::Messages),
            EditOutcome::Rejected => debug!(%id, "update rejected"),
            EditOutcome::Missing => trace!(%id, "update for unknown message"),
        }
        outcome
    }

    fn ensure_mutable(&self, id: &MessageId) -> SyncResult<()> {
        match self.store.get(id) {
            Some(entry) if entry.message.is_tombstone() => Err(SyncError::Tombstoned(id.to_string())),
            Some(entry) if !entry.is_pending() => Ok(()),
            _ => Err(SyncError::MessageNotFound(id.to_string())),
        }
    }

    async fn resync_now(&mut self) {
        match self
            .reconciler
            .resync(self.api.as_ref(), &mut self.store, &mut self.pager)
            .await
        {
            Ok(report) => {
                if report.merge.changed() {
                    self.push(SyncUpdate::Messages);
                }
                self.observe_chat();
            }
            Err(e) => {
                let e = self.screen(e).await;
                warn!(error = %e, "resync failed, retrying on next reconnect");
            }
        }
        self.refresh_notifications(RequestMode::Background).await;
    }

    async fn refresh_notifications(&mut self, mode: RequestMode) {
        match self.api.fetch_notifications(mode).await {
            Ok(notifications) => self.merge_notifications(notifications),
            Err(e) => {
                let e = self.screen(e).await;
                warn!(error = %e, ?mode, "notification refresh failed");
            }
        }
    }

    fn merge_notifications(&mut self, incoming: Vec<Notification>) {
        let unread: Vec<UnreadItem> = incoming
            .iter()
            .filter(|n| !n.is_read_by(&self.user_id))
            .map(UnreadItem::from)
            .collect();

        for notification in incoming {
            match self.notifications.iter_mut().find(|n| n.id == notification.id) {
                Some(existing) => *existing = notification,
                None => self.notifications.push(notification),
            }
        }
        self.notifications
            .sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));

        self.ledger.observe(TimelineCategory::Notifications, unread, Utc::now());
        self.push(SyncUpdate::Notifications);
        self.push(SyncUpdate::Unread(self.ledger.counts()));
    }

    fn observe_chat(&mut self) {
        let items: Vec<UnreadItem> = self
            .store
            .entries()
            .iter()
            .filter(|entry| !entry.is_pending())
            .map(|entry| UnreadItem::from(&entry.message))
            .collect();
        self.ledger.observe(TimelineCategory::Chat, items, Utc::now());
        self.push(SyncUpdate::Unread(self.ledger.counts()));
    }

    /// Passes `result` through, invalidating the session on a 401
    async fn check<T>(&mut self, result: SyncResult<T>) -> SyncResult<T> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => Err(self.screen(e).await),
        }
    }

    async fn screen(&mut self, error: SyncError) -> SyncError {
        if error.is_unauthorized() {
            self.invalidate().await;
        }
        error
    }

    async fn invalidate(&mut self) {
        if self.invalidated {
            return;
        }
        self.invalidated = true;
        warn!(user_id = %self.user_id, "credential rejected, ending session");

        if let Err(e) = SessionStore::new(self.storage.as_ref()).invalidate() {
            warn!(error = %e, "failed to drop stored credential");
        }
        self.connection.disconnect().await;
        self.push(SyncUpdate::SessionInvalidated);
    }

    fn push(&mut self, update: SyncUpdate) {
        // Collapse repeats so one step yields one update per kind
        if let Some(position) = self.outbox.iter().position(|u| same_kind(u, &update)) {
            self.outbox.remove(position);
        }
        self.outbox.push(update);
    }
}

fn same_kind(a: &SyncUpdate, b: &SyncUpdate) -> bool {
    match (a, b) {
        (SyncUpdate::Presence { user_id: x, .. }, SyncUpdate::Presence { user_id: y, .. }) => x == y,
        (SyncUpdate::DomainRefresh(x), SyncUpdate::DomainRefresh(y)) => x == y,
        (SyncUpdate::Status(_), SyncUpdate::Status(_)) => false,
        _ => std::mem::discriminant(a) == std::mem::discriminant(b),
    }
}

fn publish(updates: &mpsc::UnboundedSender<SyncUpdate>, batch: Vec<SyncUpdate>) {
    for update in batch {
        if updates.send(update).is_err() {
            trace!("no update listener");
            return;
        }
    }
}
