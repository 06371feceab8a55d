/// Resilience primitives for the sync client
///
/// This library provides the retry building blocks shared by the socket
/// transport and the REST client:
/// - **Backoff**: Bounded exponential delay with jitter, unlimited attempts
/// - **Retry**: Re-run a fallible future while its error is transient
/// - **Timeout**: Put a deadline on a single await (socket handshake)
///
/// # Example: Reconnect Loop
///
/// ```rust,no_run
/// use resilience::{Backoff, BackoffConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let mut backoff = Backoff::new(BackoffConfig::reconnect());
///
///     loop {
///         let connected = false; // try to open the socket here
///         if connected {
///             backoff.reset();
///             break;
///         }
///         tokio::time::sleep(backoff.next_delay()).await;
///     }
/// }
/// ```
///
/// # Example: Idempotent Read with Retry
///
/// ```rust,no_run
/// use resilience::{with_retry, RetryConfig};
///
/// #[tokio::main]
/// async fn main() {
///     let result = with_retry(RetryConfig::default(), || async {
///         // Your GET request here
///         Ok::<_, String>(())
///     })
///     .await;
/// }
/// ```

pub mod backoff;
pub mod retry;
pub mod timeout;

// Re-export main types for convenience
pub use backoff::{Backoff, BackoffConfig};
pub use retry::{with_retry, with_retry_when, RetryConfig, RetryError};
pub use timeout::{with_timeout, with_timeout_result, TimeoutError};
