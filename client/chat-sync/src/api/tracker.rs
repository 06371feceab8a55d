use std::sync::Arc;
use tokio::sync::watch;

/// Whether a request drives the global loading indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    #[default]
    Foreground,
    /// Polling and resync; invisible to the indicator
    Background,
}

/// Shared count of in-flight foreground requests
#[derive(Debug, Clone)]
pub struct RequestTracker {
    in_flight: Arc<watch::Sender<usize>>,
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestTracker {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(0);
        Self {
            in_flight: Arc::new(tx),
        }
    }

    /// Counts the request until the returned guard drops
    pub fn begin(&self, mode: RequestMode) -> Option<RequestGuard> {
        match mode {
            RequestMode::Background => None,
            RequestMode::Foreground => {
                self.in_flight.send_modify(|n| *n += 1);
                Some(RequestGuard {
                    in_flight: self.in_flight.clone(),
                })
            }
        }
    }

    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight() > 0
    }

    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.in_flight.subscribe()
    }
}

/// Decrements on drop, on success and failure alike
#[derive(Debug)]
pub struct RequestGuard {
    in_flight: Arc<watch::Sender<usize>>,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }
}
