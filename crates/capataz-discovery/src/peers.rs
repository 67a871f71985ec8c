//! Last-seen table of peer supervisors.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::heartbeat::Heartbeat;

/// A peer is stale after this many missed intervals.
pub const STALE_AFTER_INTERVALS: u32 = 3;

/// A heartbeat plus when it arrived.
#[derive(Debug, Clone, PartialEq)]
pub struct Peer {
    /// The last heartbeat received.
    pub heartbeat: Heartbeat,
    /// Local receive time.
    pub received: Instant,
}

/// Peers keyed by `hostname:pid`.
#[derive(Debug)]
pub struct PeerTable {
    peers: HashMap<String, Peer>,
    timeout: Duration,
}

impl PeerTable {
    /// Creates a table for peers beating every `interval`.
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            peers: HashMap::new(),
            timeout: interval * STALE_AFTER_INTERVALS,
        }
    }

    /// Silence after which a peer is stale.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Records a heartbeat. Returns true for a peer not seen before.
    pub fn record(&mut self, heartbeat: Heartbeat, received: Instant) -> bool {
        self.peers
            .insert(heartbeat.key(), Peer { heartbeat, received })
            .is_none()
    }

    /// Removes and returns every peer silent for at least the timeout.
    pub fn expire(&mut self, now: Instant) -> Vec<Peer> {
        let timeout = self.timeout;
        let stale: Vec<String> = self
            .peers
            .iter()
            .filter(|(_, p)| now.saturating_duration_since(p.received) >= timeout)
            .map(|(k, _)| k.clone())
            .collect();
        stale
            .into_iter()
            .filter_map(|key| self.peers.remove(&key))
            .collect()
    }

    /// Live peers.
    #[must_use]
    pub fn live(&self) -> Vec<&Peer> {
        self.peers.values().collect()
    }

    /// Whether `key` is live.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.peers.contains_key(key)
    }

    /// Number of live peers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Whether no peer is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
