use crate::api::{ChatApi, HttpChatApi, RequestTracker};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::models::UserId;
use crate::session::ChatSession;
use crate::storage::{LocalStore, SessionStore};
use crate::transport::{ConnectionManager, SocketConnector, SocketHandle, WsConnector};
use std::sync::Arc;
use tracing::{info, warn};

/// Everything the sync layer shares: REST client, the one socket, the
/// request counter and durable storage. Built once by [`SyncContext::init`]
/// and passed to whoever needs it.
#[derive(Clone)]
pub struct SyncContext {
    pub config: Arc<SyncConfig>,
    pub api: Arc<dyn ChatApi>,
    pub connection: Arc<ConnectionManager>,
    pub requests: RequestTracker,
    pub storage: Arc<dyn LocalStore>,
}

impl SyncContext {
    /// Production wiring. The credential comes from the config when set
    /// (and is persisted as the active session), otherwise from storage.
    pub fn init(config: SyncConfig, storage: Arc<dyn LocalStore>) -> SyncResult<Self> {
        let sessions = SessionStore::new(storage.as_ref());
        if let Some(token) = &config.token {
            sessions.set_active_credential(token)?;
        }
        let credential = sessions
            .active_credential()
            .ok_or_else(|| SyncError::Config("no active session credential".to_string()))?;

        let requests = RequestTracker::new();
        let api = HttpChatApi::new(&config, credential, requests.clone())?;
        let connector = WsConnector::new(config.socket_url.clone(), config.request_timeout);

        info!(api = %config.api_base_url, socket = %config.socket_url, "sync context initialized");
        Ok(Self::with_parts(config, Arc::new(api), Arc::new(connector), storage, requests))
    }

    /// Wires explicit collaborators, for tests and alternative transports
    pub fn with_parts(
        config: SyncConfig,
        api: Arc<dyn ChatApi>,
        connector: Arc<dyn SocketConnector>,
        storage: Arc<dyn LocalStore>,
        requests: RequestTracker,
    ) -> Self {
        let connection = Arc::new(ConnectionManager::new(connector, config.reconnect.clone()));
        Self {
            config: Arc::new(config),
            api,
            connection,
            requests,
            storage,
        }
    }

    pub fn credential(&self) -> Option<String> {
        SessionStore::new(self.storage.as_ref()).active_credential()
    }

    /// Connects with the stored credential; `None` when there is none
    pub fn connect(&self) -> Option<SocketHandle> {
        let credential = self.credential();
        if credential.is_none() {
            warn!("no active session, socket not started");
        }
        self.connection.connect(credential.as_deref().unwrap_or_default())
    }

    pub fn session(&self, user_id: impl Into<UserId>) -> ChatSession {
        ChatSession::new(self, user_id)
    }

    pub async fn teardown(&self) {
        self.connection.disconnect().await;
        info!("sync context torn down");
    }
}
