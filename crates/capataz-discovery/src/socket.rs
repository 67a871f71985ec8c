//! UDP multicast heartbeat loop.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use crate::error::{DiscoveryError, Result};
use crate::heartbeat::Heartbeat;
use crate::peers::{Peer, PeerTable};

/// Largest datagram accepted.
const MAX_PACKET_SIZE: usize = 1024;

/// Multicast settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Multicast group.
    pub address: Ipv4Addr,
    /// UDP port.
    pub port: u16,
    /// Time between heartbeats.
    pub heart_rate: Duration,
    /// Multicast TTL.
    pub ttl: u32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            address: Ipv4Addr::new(230, 1, 2, 3),
            port: 54321,
            heart_rate: Duration::from_secs(5),
            ttl: 3,
        }
    }
}

/// Presence changes.
#[derive(Debug, Clone, PartialEq)]
pub enum DiscoveryEvent {
    /// A heartbeat arrived.
    Pulse(Heartbeat),
    /// A peer went silent and was dropped.
    Timeout(Heartbeat),
}

/// Announces this supervisor and tracks the others.
#[derive(Debug)]
pub struct Discovery {
    config: DiscoveryConfig,
    beat: Heartbeat,
    peers: Arc<Mutex<PeerTable>>,
    events: broadcast::Sender<DiscoveryEvent>,
}

impl Discovery {
    /// Creates a loop announcing this host and process.
    #[must_use]
    pub fn new(config: DiscoveryConfig) -> Self {
        let beat = Heartbeat::new(local_hostname(), std::process::id() as i32);
        Self::with_heartbeat(config, beat)
    }

    /// Creates a loop announcing `beat`.
    #[must_use]
    pub fn with_heartbeat(config: DiscoveryConfig, beat: Heartbeat) -> Self {
        let (events, _) = broadcast::channel(256);
        let peers = Arc::new(Mutex::new(PeerTable::new(config.heart_rate)));
        Self {
            config,
            beat,
            peers,
            events,
        }
    }

    /// Receives every later presence change.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DiscoveryEvent> {
        self.events.subscribe()
    }

    /// Snapshot of live peers.
    #[must_use]
    pub fn peers(&self) -> Vec<Peer> {
        self.peers.lock().live().into_iter().cloned().collect()
    }

    /// Binds, joins the group, and beats until the task is dropped.
    ///
    /// Each tick sends a heartbeat and then expires silent peers. Malformed
    /// datagrams are logged and skipped.
    ///
    /// # Errors
    /// Returns an error if the socket cannot be set up or a send fails.
    pub async fn run(&self) -> Result<()> {
        let socket = self.bind().await?;
        let group = SocketAddr::V4(SocketAddrV4::new(self.config.address, self.config.port));
        tracing::info!(
            group = %group,
            heart_rate = ?self.config.heart_rate,
            host = %self.beat.hostname,
            pid = self.beat.pid,
            "discovery started"
        );

        let mut ticker = tokio::time::interval(self.config.heart_rate);
        let mut buffer = [0u8; MAX_PACKET_SIZE];
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let mut beat = self.beat.clone();
                    beat.timestamp = crate::heartbeat::now_millis();
                    socket.send_to(&beat.to_packet()?, group).await?;
                    self.check_timeouts(Instant::now());
                }
                received = socket.recv_from(&mut buffer) => {
                    let (len, from) = received?;
                    self.receive(&buffer[..len], Instant::now(), from);
                }
            }
        }
    }

    async fn bind(&self) -> Result<UdpSocket> {
        // Linux delivers multicast only to sockets bound to the group.
        let ip = if cfg!(target_os = "linux") {
            self.config.address
        } else {
            Ipv4Addr::UNSPECIFIED
        };
        let addr = SocketAddrV4::new(ip, self.config.port);
        let socket = UdpSocket::bind(addr).await.map_err(|source| DiscoveryError::Bind {
            addr: addr.to_string(),
            source,
        })?;
        socket.set_multicast_ttl_v4(self.config.ttl)?;
        socket.join_multicast_v4(self.config.address, Ipv4Addr::UNSPECIFIED)?;
        Ok(socket)
    }

    /// Handles one datagram.
    pub(crate) fn receive(&self, packet: &[u8], now: Instant, from: SocketAddr) {
        match Heartbeat::from_packet(packet) {
            Ok(beat) => {
                if self.peers.lock().record(beat.clone(), now) {
                    tracing::info!(peer = %beat.key(), "peer discovered");
                }
                let _ = self.events.send(DiscoveryEvent::Pulse(beat));
            }
            Err(e) => tracing::warn!(from = %from, error = %e, "dropping malformed heartbeat"),
        }
    }

    /// Drops silent peers and reports them.
    pub(crate) fn check_timeouts(&self, now: Instant) {
        let expired = self.peers.lock().expire(now);
        for peer in expired {
            tracing::warn!(peer = %peer.heartbeat.key(), "peer timed out");
            let _ = self.events.send(DiscoveryEvent::Timeout(peer.heartbeat));
        }
    }
}

/// This host's name.
#[must_use]
pub fn local_hostname() -> String {
    #[cfg(unix)]
    {
        nix::unistd::gethostname()
            .map(|h| h.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "localhost".to_string())
    }
    #[cfg(not(unix))]
    {
        std::env::var("COMPUTERNAME").unwrap_or_else(|_| "localhost".to_string())
    }
}
