//! Deadline wrapper for socket handshakes and other one-shot awaits
use std::future::Future;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum TimeoutError<E> {
    #[error("gave up after {0:?}")]
    Elapsed(Duration),
    #[error(transparent)]
    Failed(E),
}

impl<E> TimeoutError<E> {
    pub fn is_elapsed(&self) -> bool {
        matches!(self, TimeoutError::Elapsed(_))
    }
}

/// Await `future` for at most `limit`
pub async fn with_timeout<F, T>(limit: Duration, future: F) -> Result<T, TimeoutError<std::convert::Infallible>>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| TimeoutError::Elapsed(limit))
}

/// Await a fallible `future` for at most `limit`, keeping its error type
pub async fn with_timeout_result<F, T, E>(limit: Duration, future: F) -> Result<T, TimeoutError<E>>
where
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(TimeoutError::Failed(e)),
        Err(_) => Err(TimeoutError::Elapsed(limit)),
    }
}
