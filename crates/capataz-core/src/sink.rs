//! Event transport seam.
//!
//! The supervisor hands every event that reaches the top of its bus to an
//! [`EventSink`]. [`BroadcastSink`] ships them over a tokio broadcast
//! channel; [`EventRelay`] is the receiving end, which checks the
//! handshake and feeds a client-side [`Subscriptions`] registry.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::SupervisorConfig;
use crate::error::{Result, SupervisorError};
use crate::event::{EventData, EventInfo, Handler};
use crate::subscription::{SubscribeOptions, Subscriptions};
use crate::types::SupervisorId;

/// How long [`EventRelay::connect`] waits for the handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Buffered envelopes per subscriber.
pub const DEFAULT_CAPACITY: usize = 1024;

/// One published event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedEvent {
    /// Event name.
    pub event: String,
    /// Origin and handled flag at publication time.
    pub info: EventInfo,
    /// Payload.
    pub data: EventData,
}

/// Identity a subscriber checks before trusting events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Handshake {
    /// Supervisor instance.
    pub id: SupervisorId,
    /// Package version.
    pub version: String,
    /// Configuration the supervisor runs with.
    pub config: SupervisorConfig,
}

/// What travels over a transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    /// Supervisor identity, always first.
    Handshake(Handshake),
    /// A lifecycle event.
    Event(PublishedEvent),
}

/// Receives events from the top of the supervisor bus.
///
/// Called synchronously inside dispatch, so implementations must not block.
pub trait EventSink: Send + Sync + std::fmt::Debug {
    /// Ships one event.
    fn publish(&self, event: &PublishedEvent);

    /// Announces the supervisor. Called once at construction.
    fn handshake(&self, hello: &Handshake);
}

/// Reports events through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn publish(&self, event: &PublishedEvent) {
        tracing::debug!(
            event = %event.event,
            group = ?event.info.group,
            port = ?event.info.port,
            handled = event.info.handled,
            "event"
        );
    }

    fn handshake(&self, hello: &Handshake) {
        tracing::info!(id = %hello.id, version = %hello.version, "supervisor online");
    }
}

/// Fans events out to any number of in-process subscribers.
#[derive(Debug)]
pub struct BroadcastSink {
    tx: broadcast::Sender<Envelope>,
    hello: RwLock<Option<Handshake>>,
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl BroadcastSink {
    /// Creates a sink buffering `capacity` envelopes per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            hello: RwLock::new(None),
        }
    }

    /// Opens a stream that yields the handshake (once announced), then
    /// every later event.
    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        EventStream {
            hello: self.hello.read().clone(),
            rx: self.tx.subscribe(),
        }
    }

    /// Current subscriber count.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, event: &PublishedEvent) {
        // No receivers is fine.
        let _ = self.tx.send(Envelope::Event(event.clone()));
    }

    fn handshake(&self, hello: &Handshake) {
        *self.hello.write() = Some(hello.clone());
        let _ = self.tx.send(Envelope::Handshake(hello.clone()));
    }
}

/// Receiving end of a [`BroadcastSink`].
#[derive(Debug)]
pub struct EventStream {
    hello: Option<Handshake>,
    rx: broadcast::Receiver<Envelope>,
}

impl EventStream {
    /// Next envelope, or `None` once the sink is gone.
    ///
    /// A lagging stream skips what it missed and carries on.
    pub async fn next(&mut self) -> Option<Envelope> {
        if let Some(hello) = self.hello.take() {
            return Some(Envelope::Handshake(hello));
        }
        loop {
            match self.rx.recv().await {
                Ok(envelope) => return Some(envelope),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "event stream lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Client side of the transport.
///
/// Dispatches every received event to its own [`Subscriptions`], applying
/// the subscribers' group/port/handled filters.
#[derive(Debug)]
pub struct EventRelay {
    hello: Handshake,
    subscriptions: Arc<Subscriptions>,
    task: JoinHandle<()>,
}

impl EventRelay {
    /// Connects with [`DEFAULT_CONNECT_TIMEOUT`].
    ///
    /// # Errors
    /// See [`EventRelay::connect_with_timeout`].
    pub async fn connect(stream: EventStream, expected: Option<SupervisorId>) -> Result<Self> {
        Self::connect_with_timeout(stream, expected, DEFAULT_CONNECT_TIMEOUT).await
    }

    /// Waits for the handshake, checks the supervisor id if one is
    /// expected, then starts relaying.
    ///
    /// Events that arrive before the handshake are dropped.
    ///
    /// # Errors
    /// [`SupervisorError::Transport`] if no handshake arrives in time, the
    /// stream closes first, or the handshake names another supervisor.
    pub async fn connect_with_timeout(
        mut stream: EventStream,
        expected: Option<SupervisorId>,
        timeout: Duration,
    ) -> Result<Self> {
        let hello = tokio::time::timeout(timeout, async {
            loop {
                match stream.next().await {
                    Some(Envelope::Handshake(hello)) => return Some(hello),
                    Some(Envelope::Event(_)) => {}
                    None => return None,
                }
            }
        })
        .await
        .map_err(|_| SupervisorError::transport(format!("no handshake within {}", humantime::format_duration(timeout))))?
        .ok_or_else(|| SupervisorError::transport("stream closed before handshake"))?;

        if let Some(expected) = expected {
            if hello.id != expected {
                return Err(SupervisorError::transport(format!(
                    "connected to supervisor {} but expected {expected}",
                    hello.id
                )));
            }
        }

        let subscriptions = Arc::new(Subscriptions::new());
        let relay_subs = Arc::clone(&subscriptions);
        let task = tokio::spawn(async move {
            while let Some(envelope) = stream.next().await {
                if let Envelope::Event(mut published) = envelope {
                    relay_subs.dispatch(&published.event, &mut published.info, &published.data);
                }
            }
            tracing::debug!("event relay closed");
        });

        Ok(Self {
            hello,
            subscriptions,
            task,
        })
    }

    /// The handshake this relay verified.
    #[must_use]
    pub const fn handshake(&self) -> &Handshake {
        &self.hello
    }

    /// Registers a client-side subscriber.
    pub fn on(&self, event: &str, options: &SubscribeOptions, handler: Handler) {
        self.subscriptions.on(event, options, handler);
    }

    /// Removes client-side subscribers. See [`Subscriptions::remove_listener`].
    pub fn remove_listener(
        &self,
        event: Option<&str>,
        options: Option<&SubscribeOptions>,
        handler: Option<&Handler>,
    ) -> usize {
        self.subscriptions.remove_listener(event, options, handler)
    }

    /// Whether the relay task is still receiving.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for EventRelay {
    fn drop(&mut self) {
        self.task.abort();
    }
}
