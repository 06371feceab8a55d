use crate::error::{SyncError, SyncResult};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use resilience::{with_timeout_result, TimeoutError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};
use url::Url;

/// One open socket carrying text frames
#[async_trait]
pub trait SocketLink: Send {
    /// Next text frame. `None` once the peer has closed.
    async fn recv(&mut self) -> Option<SyncResult<String>>;

    async fn send(&mut self, text: String) -> SyncResult<()>;

    async fn close(&mut self);
}

/// Opens authenticated sockets for the connection manager
#[async_trait]
pub trait SocketConnector: Send + Sync + 'static {
    async fn connect(&self, credential: &str) -> SyncResult<Box<dyn SocketLink>>;
}

/// WebSocket connector; the credential travels as a bearer header and as
/// the `token` query parameter
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: Url,
    handshake_timeout: Duration,
}

impl WsConnector {
    pub fn new(url: Url, handshake_timeout: Duration) -> Self {
        Self {
            url,
            handshake_timeout,
        }
    }

    fn endpoint(&self, credential: &str) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut().append_pair("token", credential);
        url
    }
}

#[async_trait]
impl SocketConnector for WsConnector {
    async fn connect(&self, credential: &str) -> SyncResult<Box<dyn SocketLink>> {
        let mut request = self.endpoint(credential).as_str().into_client_request()?;
        let bearer = HeaderValue::from_str(&format!("Bearer {credential}"))
            .map_err(|e| SyncError::Config(format!("credential is not a valid header: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (stream, response) = with_timeout_result(self.handshake_timeout, connect_async(request))
            .await
            .map_err(|e| match e {
                TimeoutError::Elapsed(_) => SyncError::Timeout,
                TimeoutError::Failed(e) => SyncError::from(e),
            })?;

        debug!(status = %response.status(), host = ?self.url.host_str(), "socket handshake complete");
        Ok(Box::new(WsLink { stream }))
    }
}

struct WsLink {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl SocketLink for WsLink {
    async fn recv(&mut self) -> Option<SyncResult<String>> {
        loop {
            match self.stream.next().await? {
                Ok(WsMessage::Text(text)) => return Some(Ok(text)),
                Ok(WsMessage::Close(frame)) => {
                    debug!(?frame, "socket closed by server");
                    return None;
                }
                // tungstenite answers pings itself
                Ok(other) => trace!(kind = ?std::mem::discriminant(&other), "ignoring non-text frame"),
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn send(&mut self, text: String) -> SyncResult<()> {
        self.stream.send(WsMessage::Text(text)).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            trace!(error = %e, "socket close failed");
        }
    }
}
