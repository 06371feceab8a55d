use thiserror::Error;

pub type SyncResult<T> = Result<T, SyncError>;

/// Distinguishes failures worth retrying from permanent ones
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Retryable,
    Permanent,
}

#[derive(Debug, Error, Clone)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("unauthorized")]
    Unauthorized,

    #[error("http {status}: {body}")]
    Http { status: u16, body: String },

    #[error("decode error: {0}")]
    Decode(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("socket error: {0}")]
    Socket(String),

    #[error("message {0} not found")]
    MessageNotFound(String),

    #[error("message {0} was deleted")]
    Tombstoned(String),

    /// Optimistic send rolled back; `draft` is the composed text to put back
    /// into the input.
    #[error("send failed: {source}")]
    SendFailed {
        draft: String,
        #[source]
        source: Box<SyncError>,
    },
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        if self.is_retryable() {
            ErrorKind::Retryable
        } else {
            ErrorKind::Permanent
        }
    }

    /// Transient failures: connection problems, timeouts and 5xx/429 responses
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network(_) | SyncError::Timeout | SyncError::Socket(_) => true,
            SyncError::Http { status, .. } => *status >= 500 || *status == 429,
            SyncError::SendFailed { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    /// 401 on an authenticated request, including one wrapped by a failed send
    pub fn is_unauthorized(&self) -> bool {
        match self {
            SyncError::Unauthorized => true,
            SyncError::Http { status, .. } => *status == 401,
            SyncError::SendFailed { source, .. } => source.is_unauthorized(),
            _ => false,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SyncError::Timeout
        } else if e.is_decode() {
            SyncError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            if status == reqwest::StatusCode::UNAUTHORIZED {
                SyncError::Unauthorized
            } else {
                SyncError::Http {
                    status: status.as_u16(),
                    body: e.to_string(),
                }
            }
        } else {
            SyncError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::Decode(e.to_string())
    }
}

impl From<url::ParseError> for SyncError {
    fn from(e: url::ParseError) -> Self {
        SyncError::Config(format!("invalid url: {e}"))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SyncError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;

        match e {
            WsError::Http(response) if response.status().as_u16() == 401 => SyncError::Unauthorized,
            other => SyncError::Socket(other.to_string()),
        }
    }
}
