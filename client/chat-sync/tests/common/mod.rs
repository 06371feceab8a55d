//! In-memory stand-ins for the REST backend and the socket server
#![allow(dead_code)]

use async_trait::async_trait;
use chat_sync::api::{ChatApi, MessagePage, PageQuery, RequestMode, RequestTracker, SendMessageBody};
use chat_sync::models::{ChatUser, Message, MessageDraft, MessageId, Notification, Reaction};
use chat_sync::storage::{LocalStore, MemoryStore, SessionStore};
use chat_sync::transport::{ConnectionStatus, SocketConnector, SocketLink};
use chat_sync::{SyncConfig, SyncContext, SyncError, SyncResult};
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::{Mutex, MutexGuard};
use resilience::BackoffConfig;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

pub const LOCAL_USER: &str = "student-1";
pub const TEACHER: &str = "teacher-1";
pub const TOKEN: &str = "tok-student-1";

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn msg(id: &str, secs: i64) -> Message {
    msg_from(id, secs, TEACHER)
}

pub fn msg_from(id: &str, secs: i64, sender: &str) -> Message {
    let mut m = MessageDraft::text(format!("body {id}")).into_provisional(sender.to_string(), at(secs));
    m.id = MessageId::new(id);
    m.client_message_id = None;
    m
}

pub fn notification(id: &str, secs: i64) -> Notification {
    Notification {
        id: id.to_string(),
        title: format!("title {id}"),
        message: String::new(),
        created_at: at(secs),
        read_by: Default::default(),
    }
}

pub fn ids<'a>(messages: impl Iterator<Item = &'a Message>) -> Vec<String> {
    messages.map(|m| m.id.to_string()).collect()
}

pub fn frame(event: &str, data: serde_json::Value) -> String {
    serde_json::json!({ "event": event, "data": data }).to_string()
}

#[derive(Default)]
pub struct FakeState {
    pub messages: Vec<Message>,
    pub notifications: Vec<Notification>,
    pub users: Vec<ChatUser>,
    pub fail_next_send: Option<SyncError>,
    pub fail_reads: Option<SyncError>,
    pub fetches: Vec<PageQuery>,
    pub sent: Vec<SendMessageBody>,
    pub mark_read_calls: usize,
    next_id: u64,
}

/// REST backend holding one conversation in memory
#[derive(Default)]
pub struct FakeChatApi {
    state: Mutex<FakeState>,
}

impl FakeChatApi {
    pub fn with_messages(messages: Vec<Message>) -> Self {
        let api = Self::default();
        api.state().messages = messages;
        api
    }

    pub fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock()
    }

    fn read_guard(&self) -> SyncResult<()> {
        match &self.state().fail_reads {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn find(state: &mut FakeState, id: &MessageId) -> SyncResult<usize> {
        state
            .messages
            .iter()
            .position(|m| &m.id == id)
            .ok_or(SyncError::Http {
                status: 404,
                body: "not found".to_string(),
            })
    }
}

#[async_trait]
impl ChatApi for FakeChatApi {
    async fn fetch_messages(&self, query: PageQuery, _mode: RequestMode) -> SyncResult<MessagePage> {
        self.read_guard()?;
        let mut state = self.state();
        state.fetches.push(query.clone());

        let mut all = state.messages.clone();
        all.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        let (items, has_more) = if let Some(after) = query.after {
            let newer: Vec<_> = all.into_iter().filter(|m| m.created_at > after).collect();
            let has_more = newer.len() > query.limit;
            (newer.into_iter().take(query.limit).collect(), has_more)
        } else {
            let older: Vec<_> = all
                .into_iter()
                .filter(|m| query.before.map_or(true, |before| m.created_at < before))
                .collect();
            let skip = older.len().saturating_sub(query.limit);
            (older[skip..].to_vec(), skip > 0)
        };

        Ok(MessagePage {
            items,
            has_more,
            next_before: None,
        })
    }

    async fn send_message(&self, body: SendMessageBody) -> SyncResult<Message> {
        let mut state = self.state();
        if let Some(e) = state.fail_next_send.take() {
            return Err(e);
        }
        state.next_id += 1;

        let newest = state.messages.iter().map(|m| m.created_at).max();
        let created_at = newest.map_or_else(Utc::now, |n| n.max(Utc::now()) + chrono::Duration::seconds(1));
        let mut message = MessageDraft {
            kind: body.kind,
            content: body.content.clone(),
            reply_to: body.reply_to.clone(),
            recipient_user_id: body.recipient_user_id.clone(),
            file_name: body.file_name.clone(),
            mime_type: body.mime_type.clone(),
        }
        .into_provisional(LOCAL_USER.to_string(), created_at);
        message.id = MessageId::new(format!("srv-{}", state.next_id));
        message.client_message_id = Some(body.client_message_id.clone());

        state.sent.push(body);
        state.messages.push(message.clone());
        Ok(message)
    }

    async fn edit_message(&self, id: &MessageId, content: &str) -> SyncResult<Message> {
        let mut state = self.state();
        let i = Self::find(&mut state, id)?;
        let message = &mut state.messages[i];
        message.content = content.to_string();
        message.edited_at = Some(Utc::now());
        Ok(message.clone())
    }

    async fn delete_message(&self, id: &MessageId) -> SyncResult<Message> {
        let mut state = self.state();
        let i = Self::find(&mut state, id)?;
        let message = &mut state.messages[i];
        message.tombstone(Some(LOCAL_USER.to_string()), Utc::now());
        Ok(message.clone())
    }

    async fn react(&self, id: &MessageId, emoji: &str) -> SyncResult<Message> {
        let mut state = self.state();
        let i = Self::find(&mut state, id)?;
        let message = &mut state.messages[i];
        message.reactions.push(Reaction {
            emoji: emoji.to_string(),
            user_id: LOCAL_USER.to_string(),
        });
        Ok(message.clone())
    }

    async fn mark_read(&self) -> SyncResult<()> {
        self.state().mark_read_calls += 1;
        Ok(())
    }

    async fn clear_messages(&self) -> SyncResult<()> {
        self.state().messages.clear();
        Ok(())
    }

    async fn list_users(&self) -> SyncResult<Vec<ChatUser>> {
        self.read_guard()?;
        Ok(self.state().users.clone())
    }

    async fn fetch_notifications(&self, _mode: RequestMode) -> SyncResult<Vec<Notification>> {
        self.read_guard()?;
        Ok(self.state().notifications.clone())
    }
}

/// Server side of one accepted socket
pub struct ServerEnd {
    pub credential: String,
    push: Option<mpsc::UnboundedSender<String>>,
    received: mpsc::UnboundedReceiver<String>,
}

impl ServerEnd {
    pub fn push(&self, text: String) {
        if let Some(push) = &self.push {
            let _ = push.send(text);
        }
    }

    /// Simulates a network drop
    pub fn drop_connection(&mut self) {
        self.push = None;
    }

    pub async fn next_received(&mut self) -> Option<String> {
        tokio::time::timeout(Duration::from_secs(5), self.received.recv())
            .await
            .ok()
            .flatten()
    }
}

#[derive(Default)]
struct Script {
    failures: VecDeque<SyncError>,
    accepted: VecDeque<ServerEnd>,
    attempts: u32,
    credentials: Vec<String>,
}

/// Connector whose sockets are in-memory channels
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    script: Arc<Mutex<Script>>,
}

impl ScriptedConnector {
    pub fn fail_next(&self, error: SyncError) {
        self.script.lock().failures.push_back(error);
    }

    pub fn attempts(&self) -> u32 {
        self.script.lock().attempts
    }

    pub fn credentials(&self) -> Vec<String> {
        self.script.lock().credentials.clone()
    }

    /// Oldest accepted connection not yet claimed by the test
    pub fn take_server(&self) -> Option<ServerEnd> {
        self.script.lock().accepted.pop_front()
    }
}

#[async_trait]
impl SocketConnector for ScriptedConnector {
    async fn connect(&self, credential: &str) -> SyncResult<Box<dyn SocketLink>> {
        let mut script = self.script.lock();
        script.attempts += 1;
        script.credentials.push(credential.to_string());
        if let Some(e) = script.failures.pop_front() {
            return Err(e);
        }

        let (push_tx, push_rx) = mpsc::unbounded_channel();
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        script.accepted.push_back(ServerEnd {
            credential: credential.to_string(),
            push: Some(push_tx),
            received: sent_rx,
        });
        Ok(Box::new(ScriptedLink {
            incoming: push_rx,
            outgoing: sent_tx,
        }))
    }
}

struct ScriptedLink {
    incoming: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl SocketLink for ScriptedLink {
    async fn recv(&mut self) -> Option<SyncResult<String>> {
        self.incoming.recv().await.map(Ok)
    }

    async fn send(&mut self, text: String) -> SyncResult<()> {
        self.outgoing
            .send(text)
            .map_err(|_| SyncError::Socket("peer gone".to_string()))
    }

    async fn close(&mut self) {
        self.incoming.close();
    }
}

pub fn test_config() -> SyncConfig {
    SyncConfig {
        user_id: Some(LOCAL_USER.to_string()),
        reconnect: BackoffConfig {
            initial: Duration::from_millis(800),
            max: Duration::from_secs(4),
            multiplier: 1.5,
            jitter: 0.0,
        },
        ..Default::default()
    }
}

pub struct Harness {
    pub ctx: SyncContext,
    pub api: Arc<FakeChatApi>,
    pub connector: ScriptedConnector,
    pub storage: Arc<MemoryStore>,
}

impl Harness {
    pub fn new(api: FakeChatApi) -> Self {
        Self::with_storage(api, Arc::new(MemoryStore::new()))
    }

    pub fn with_storage(api: FakeChatApi, storage: Arc<MemoryStore>) -> Self {
        Self::with_config(api, storage, test_config())
    }

    pub fn with_config(api: FakeChatApi, storage: Arc<MemoryStore>, config: SyncConfig) -> Self {
        SessionStore::new(storage.as_ref())
            .set_active_credential(TOKEN)
            .unwrap();
        let api = Arc::new(api);
        let connector = ScriptedConnector::default();
        let ctx = SyncContext::with_parts(
            config,
            api.clone(),
            Arc::new(connector.clone()),
            storage.clone() as Arc<dyn LocalStore>,
            RequestTracker::new(),
        );
        Self {
            ctx,
            api,
            connector,
            storage,
        }
    }
}

pub async fn wait_for_status(rx: &mut watch::Receiver<ConnectionStatus>, target: ConnectionStatus) {
    tokio::time::timeout(Duration::from_secs(60), rx.wait_for(|s| *s == target))
        .await
        .unwrap_or_else(|_| panic!("status never became {}", target.as_str()))
        .unwrap();
}
