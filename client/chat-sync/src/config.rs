use crate::error::{SyncError, SyncResult};
use dotenvy::dotenv;
use resilience::{BackoffConfig, RetryConfig};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

const DEFAULT_API_URL: &str = "http://localhost:5000/api/";
const DEFAULT_SOCKET_URL: &str = "ws://localhost:5000/socket";

/// Typing indicator timing
#[derive(Debug, Clone)]
pub struct TypingConfig {
    /// Quiet period after which a remote typing label clears
    pub expiry: Duration,
    /// Minimum spacing between local typing emissions
    pub emit_interval: Duration,
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            expiry: Duration::from_millis(1500),
            emit_interval: Duration::from_millis(800),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// REST base, e.g. `https://tuition.example.com/api/`
    pub api_base_url: Url,
    /// Socket endpoint
    pub socket_url: Url,
    /// Active-session credential, when provided by the environment
    pub token: Option<String>,
    /// Local user id, when provided by the environment
    pub user_id: Option<String>,
    pub page_size: usize,
    /// Upper bound on forward pages fetched by a single resync
    pub resync_max_pages: usize,
    pub request_timeout: Duration,
    pub notification_poll_interval: Duration,
    pub storage_path: PathBuf,
    pub reconnect: BackoffConfig,
    /// Retry policy for idempotent reads
    pub read_retry: RetryConfig,
    pub typing: TypingConfig,
    /// Max acknowledged ids kept per popup category
    pub popup_id_cap: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: Url::parse(DEFAULT_API_URL).expect("default api url is valid"),
            socket_url: Url::parse(DEFAULT_SOCKET_URL).expect("default socket url is valid"),
            token: None,
            user_id: None,
            page_size: 100,
            resync_max_pages: 10,
            request_timeout: Duration::from_secs(15),
            notification_poll_interval: Duration::from_secs(30),
            storage_path: PathBuf::from("chat-sync-state.json"),
            reconnect: BackoffConfig::reconnect(),
            read_retry: RetryConfig::default(),
            typing: TypingConfig::default(),
            popup_id_cap: 200,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> SyncResult<Self> {
        let _ = dotenv();
        let defaults = Self::default();

        let api_base_url = match env::var("CHAT_SYNC_API_URL") {
            Ok(raw) => Self::parse_base_url(&raw)?,
            Err(_) => defaults.api_base_url,
        };

        let socket_url = match env::var("CHAT_SYNC_SOCKET_URL") {
            Ok(raw) => Url::parse(raw.trim())?,
            Err(_) => defaults.socket_url,
        };

        let page_size = Self::parse_or("CHAT_SYNC_PAGE_SIZE", defaults.page_size)?;
        if page_size == 0 {
            return Err(SyncError::Config(
                "CHAT_SYNC_PAGE_SIZE must be greater than zero".to_string(),
            ));
        }

        let request_timeout = Duration::from_millis(Self::parse_or(
            "CHAT_SYNC_REQUEST_TIMEOUT_MS",
            defaults.request_timeout.as_millis() as u64,
        )?);

        let notification_poll_interval = Duration::from_secs(Self::parse_or(
            "CHAT_SYNC_POLL_INTERVAL_SECS",
            defaults.notification_poll_interval.as_secs(),
        )?);

        let storage_path = env::var("CHAT_SYNC_STORAGE_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.storage_path);

        Ok(Self {
            api_base_url,
            socket_url,
            token: Self::non_empty("CHAT_SYNC_TOKEN"),
            user_id: Self::non_empty("CHAT_SYNC_USER_ID"),
            page_size,
            request_timeout,
            notification_poll_interval,
            storage_path,
            ..defaults
        })
    }

    // Url::join drops the last path segment unless it ends with '/'
    fn parse_base_url(raw: &str) -> SyncResult<Url> {
        let trimmed = raw.trim();
        if trimmed.ends_with('/') {
            Ok(Url::parse(trimmed)?)
        } else {
            Ok(Url::parse(&format!("{trimmed}/"))?)
        }
    }

    fn non_empty(key: &str) -> Option<String> {
        env::var(key)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> SyncResult<T> {
        match env::var(key) {
            Ok(raw) => raw
                .trim()
                .parse()
                .map_err(|_| SyncError::Config(format!("{key} has an invalid value: {raw}"))),
            Err(_) => Ok(default),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_timings() {
        let cfg = SyncConfig::default();
        assert_eq!(cfg.page_size, 100);
        assert_eq!(cfg.typing.expiry, Duration::from_millis(1500));
        assert_eq!(cfg.typing.emit_interval, Duration::from_millis(800));
        assert_eq!(cfg.reconnect.initial, Duration::from_millis(800));
        assert_eq!(cfg.reconnect.max, Duration::from_secs(4));
        assert_eq!(cfg.notification_poll_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let url = SyncConfig::parse_base_url("https://school.example.com/api").unwrap();
        assert_eq!(
            url.join("chat/messages").unwrap().as_str(),
            "https://school.example.com/api/chat/messages"
        );
    }
}
