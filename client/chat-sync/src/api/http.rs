use super::requests::{EditBody, PageWire, ReactionBody};
use super::{ChatApi, MessagePage, PageQuery, RequestMode, RequestTracker, SendMessageBody};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::models::{ChatUser, Message, MessageId, Notification};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use resilience::{with_retry_when, RetryConfig, RetryError};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use url::Url;

/// [`ChatApi`] over HTTP with bearer authentication.
///
/// GETs are retried on transient failures; writes are attempted once so a
/// send is never duplicated.
#[derive(Clone)]
pub struct HttpChatApi {
    client: Client,
    base_url: Url,
    token: String,
    tracker: RequestTracker,
    read_retry: RetryConfig,
}

impl HttpChatApi {
    pub fn new(config: &SyncConfig, token: impl Into<String>, tracker: RequestTracker) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("http client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.api_base_url.clone(),
            token: token.into(),
            tracker,
            read_retry: config.read_retry.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> SyncResult<Url> {
        Ok(self.base_url.join(path)?)
    }

    async fn execute<T: DeserializeOwned>(&self, request: RequestBuilder) -> SyncResult<T> {
        let response = request.bearer_auth(&self.token).send().await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            warn!("request rejected with 401");
            return Err(SyncError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Http {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<T>().await?)
    }

    /// Acknowledgement endpoints may answer with an empty body
    async fn execute_ack(&self, request: RequestBuilder) -> SyncResult<()> {
        let response = request.bearer_auth(&self.token).send().await?;
        match response.status() {
            StatusCode::UNAUTHORIZED => Err(SyncError::Unauthorized),
            status if status.is_success() => Ok(()),
            status => Err(SyncError::Http {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        url: Url,
        query: &[(&'static str, String)],
        mode: RequestMode,
    ) -> SyncResult<T> {
        let _guard = self.tracker.begin(mode);
        with_retry_when(
            self.read_retry.clone(),
            || self.execute(self.client.get(url.clone()).query(query)),
            SyncError::is_retryable,
        )
        .await
        .map_err(RetryError::into_inner)
    }
}

#[async_trait]
impl ChatApi for HttpChatApi {
    async fn fetch_messages(&self, query: PageQuery, mode: RequestMode) -> SyncResult<MessagePage> {
        let url = self.endpoint("chat/messages")?;
        let wire: PageWire = self.get(url, &query.to_query_pairs(), mode).await?;
        let page = MessagePage::from_wire(wire, query.limit);
        debug!(
            count = page.items.len(),
            has_more = page.has_more,
            before = ?query.before,
            after = ?query.after,
            "fetched message page"
        );
        Ok(page)
    }

    async fn send_message(&self, body: SendMessageBody) -> SyncResult<Message> {
        let _guard = self.tracker.begin(RequestMode::Foreground);
        let url = self.endpoint("chat/messages")?;
        self.execute(self.client.post(url).json(&body)).await
    }

    async fn edit_message(&self, id: &MessageId, content: &str) -> SyncResult<Message> {
        let _guard = self.tracker.begin(RequestMode::Foreground);
        let url = self.endpoint(&format!("chat/messages/{id}"))?;
        self.execute(self.client.put(url).json(&EditBody { content })).await
    }

    async fn delete_message(&self, id: &MessageId) -> SyncResult<Message> {
        let _guard = self.tracker.begin(RequestMode::Foreground);
        let url = self.endpoint(&format!("chat/messages/{id}"))?;
        self.execute(self.client.delete(url)).await
    }

    async fn react(&self, id: &MessageId, emoji: &str) -> SyncResult<Message> {
        let _guard = self.tracker.begin(RequestMode::Foreground);
        let url = self.endpoint(&format!("chat/messages/{id}/reactions"))?;
        self.execute(self.client.post(url).json(&ReactionBody { emoji })).await
    }

    async fn mark_read(&self) -> SyncResult<()> {
        let url = self.endpoint("chat/messages/read")?;
        self.execute_ack(self.client.post(url)).await
    }

    async fn clear_messages(&self) -> SyncResult<()> {
        let _guard = self.tracker.begin(RequestMode::Foreground);
        let url = self.endpoint("chat/messages/clear")?;
        self.execute_ack(self.client.delete(url)).await
    }

    async fn list_users(&self) -> SyncResult<Vec<ChatUser>> {
        let url = self.endpoint("chat/users")?;
        self.get(url, &[], RequestMode::Foreground).await
    }

    async fn fetch_notifications(&self, mode: RequestMode) -> SyncResult<Vec<Notification>> {
        let url = self.endpoint("notifications")?;
        self.get(url, &[], mode).await
    }
}
