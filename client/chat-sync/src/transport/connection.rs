//! # Connection Manager
//!
//! Owns the one socket of the client. A background task per credential
//! opens the socket, pumps frames onto the event bus, and reconnects with
//! bounded backoff for as long as the credential is set.
//!
//! Status is published on a `watch` channel, so late subscribers see the
//! current value immediately. Domain and lifecycle events share a
//! `broadcast` bus.

use super::events::{ConnectionStatus, Frame, InboundEvent, Lifecycle, OutboundEvent, SocketEvent};
use super::socket::{SocketConnector, SocketLink};
use crate::error::{SyncError, SyncResult};
use parking_lot::Mutex;
use resilience::{Backoff, BackoffConfig};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

const EVENT_BUS_CAPACITY: usize = 256;

/// Live connection token handed to consumers
#[derive(Debug, Clone)]
pub struct SocketHandle {
    generation: u64,
    credential: Arc<str>,
    outbound: mpsc::UnboundedSender<OutboundEvent>,
}

impl SocketHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn credential(&self) -> &str {
        &self.credential
    }
}

impl PartialEq for SocketHandle {
    fn eq(&self, other: &Self) -> bool {
        self.generation == other.generation
    }
}

impl Eq for SocketHandle {}

struct Active {
    handle: SocketHandle,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Publishing side shared with the socket task. A task may only publish
/// while its generation is current, so a replaced connection goes quiet.
struct Bus {
    status: watch::Sender<ConnectionStatus>,
    events: broadcast::Sender<SocketEvent>,
    generation: Mutex<u64>,
}

impl Bus {
    fn publish_status(&self, generation: u64, status: ConnectionStatus) {
        let current = self.generation.lock();
        if *current == generation {
            self.status.send_replace(status);
        }
    }

    fn publish(&self, generation: u64, event: SocketEvent) {
        let current = self.generation.lock();
        if *current == generation {
            // No subscribers is fine
            let _ = self.events.send(event);
        }
    }

    fn lifecycle(&self, generation: u64, event: Lifecycle) {
        debug!(event = event.name(), "socket lifecycle");
        self.publish(generation, SocketEvent::Lifecycle(event));
    }
}

pub struct ConnectionManager {
    connector: Arc<dyn SocketConnector>,
    backoff: BackoffConfig,
    bus: Arc<Bus>,
    active: Mutex<Option<Active>>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn SocketConnector>, backoff: BackoffConfig) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);

        Self {
            connector,
            backoff,
            bus: Arc::new(Bus {
                status,
                events,
                generation: Mutex::new(0),
            }),
            active: Mutex::new(None),
        }
    }

    /// Starts the socket for `credential`, or returns the live handle when
    /// already connected with it. An empty credential yields `None`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self, credential: &str) -> Option<SocketHandle> {
        let credential = credential.trim();
        if credential.is_empty() {
            debug!("connect skipped: no credential");
            return None;
        }

        let mut active = self.active.lock();
        if let Some(existing) = active.as_ref() {
            if &*existing.handle.credential == credential {
                return Some(existing.handle.clone());
            }
        }

        let generation = {
            let mut current = self.bus.generation.lock();
            *current += 1;
            *current
        };

        if let Some(stale) = active.take() {
            info!(generation = stale.handle.generation, "credential changed, replacing socket");
            let _ = stale.shutdown.send(());
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let handle = SocketHandle {
            generation,
            credential: Arc::from(credential),
            outbound: outbound_tx,
        };

        self.bus.publish_status(generation, ConnectionStatus::Connecting);
        let task = tokio::spawn(run_socket(
            self.bus.clone(),
            generation,
            self.connector.clone(),
            handle.credential.clone(),
            self.backoff.clone(),
            outbound_rx,
            shutdown_rx,
        ));

        *active = Some(Active {
            handle: handle.clone(),
            shutdown: shutdown_tx,
            task,
        });
        Some(handle)
    }

    /// Tears the socket down. Status ends at `Disconnected`.
    pub async fn disconnect(&self) {
        let taken = self.active.lock().take();
        let Some(active) = taken else {
            self.bus.status.send_replace(ConnectionStatus::Disconnected);
            return;
        };

        let generation = {
            let mut current = self.bus.generation.lock();
            *current += 1;
            *current
        };
        let _ = active.shutdown.send(());
        if let Err(e) = active.task.await {
            warn!(error = %e, "socket task ended abnormally");
        }

        self.bus.publish_status(generation, ConnectionStatus::Disconnected);
        self.bus.lifecycle(
            generation,
            Lifecycle::Disconnect {
                reason: "client disconnect".to_string(),
            },
        );
        info!("socket disconnected");
    }

    pub fn handle(&self) -> Option<SocketHandle> {
        self.active.lock().as_ref().map(|a| a.handle.clone())
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.bus.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.bus.status.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SocketEvent> {
        self.bus.events.subscribe()
    }

    /// Queues an outbound event. Fails while not connected.
    pub fn emit(&self, event: OutboundEvent) -> SyncResult<()> {
        if self.status() != ConnectionStatus::Connected {
            return Err(SyncError::Socket("not connected".to_string()));
        }
        let active = self.active.lock();
        let handle = &active
            .as_ref()
            .ok_or_else(|| SyncError::Socket("not connected".to_string()))?
            .handle;
        handle
            .outbound
            .send(event)
            .map_err(|_| SyncError::Socket("socket task stopped".to_string()))
    }
}

enum PumpExit {
    Shutdown,
    Lost(String),
}

async fn run_socket(
    bus: Arc<Bus>,
    generation: u64,
    connector: Arc<dyn SocketConnector>,
    credential: Arc<str>,
    backoff: BackoffConfig,
    mut outbound: mpsc::UnboundedReceiver<OutboundEvent>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut backoff = Backoff::new(backoff);
    let mut attempt: u32 = 0;
    let mut ever_connected = false;

    loop {
        if attempt > 0 {
            bus.lifecycle(generation, Lifecycle::ReconnectAttempt { attempt });
        }

        let connected = tokio::select! {
            result = connector.connect(&credential) => result,
            _ = &mut shutdown => return,
        };

        match connected {
            Ok(mut link) => {
                backoff.reset();
                bus.publish_status(generation, ConnectionStatus::Connected);
                bus.lifecycle(generation, Lifecycle::Connect);
                if attempt > 0 {
                    bus.lifecycle(generation, Lifecycle::Reconnect { attempt });
                }
                info!(generation, reconnect_attempts = attempt, "socket connected");
                attempt = 0;
                ever_connected = true;

                match pump(&bus, generation, link.as_mut(), &mut outbound, &mut shutdown).await {
                    PumpExit::Shutdown => {
                        link.close().await;
                        return;
                    }
                    PumpExit::Lost(reason) => {
                        warn!(%reason, "socket lost, reconnecting");
                        bus.publish_status(generation, ConnectionStatus::Reconnecting);
                        bus.lifecycle(generation, Lifecycle::Disconnect { reason });
                    }
                }
            }
            Err(e) => {
                let message = e.to_string();
                let unauthorized = e.is_unauthorized();
                warn!(error = %message, attempt, "socket connect failed");
                bus.publish_status(generation, ConnectionStatus::Reconnecting);
                let event = if ever_connected || attempt > 0 {
                    Lifecycle::ReconnectError { message, unauthorized }
                } else {
                    Lifecycle::Error { message, unauthorized }
                };
                bus.lifecycle(generation, event);
            }
        }

        attempt = attempt.saturating_add(1);
        let delay = backoff.next_delay();
        debug!(?delay, attempt, "waiting before reconnect");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = &mut shutdown => return,
        }
    }
}

async fn pump(
    bus: &Bus,
    generation: u64,
    link: &mut dyn SocketLink,
    outbound: &mut mpsc::UnboundedReceiver<OutboundEvent>,
    shutdown: &mut oneshot::Receiver<()>,
) -> PumpExit {
    loop {
        tokio::select! {
            _ = &mut *shutdown => return PumpExit::Shutdown,
            frame = link.recv() => match frame {
                Some(Ok(text)) => dispatch(bus, generation, &text),
                Some(Err(e)) => return PumpExit::Lost(e.to_string()),
                None => return PumpExit::Lost("transport close".to_string()),
            },
            Some(event) = outbound.recv() => {
                let text = match event.encode() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "dropping unencodable outbound event");
                        continue;
                    }
                };
                if let Err(e) = link.send(text).await {
                    return PumpExit::Lost(e.to_string());
                }
            }
        }
    }
}

fn dispatch(bus: &Bus, generation: u64, text: &str) {
    let decoded = Frame::parse(text).and_then(InboundEvent::decode);
    match decoded {
        Ok(Some(event)) => bus.publish(generation, SocketEvent::Inbound(event)),
        Ok(None) => trace!("ignoring unhandled socket event"),
        Err(e) => warn!(error = %e, "dropping malformed socket frame"),
    }
}
