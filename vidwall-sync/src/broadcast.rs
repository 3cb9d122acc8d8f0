//! Fire-and-forget fan-out to connected peers.
//!
//! Every state change leaves the coordinator through one capability,
//! [`Publish::publish`], addressed to [`Recipients::All`] or to a single
//! connection. Both audiences share one tokio broadcast channel of
//! [`Envelope`]s, so every connection sees its messages in publish order.
//! Each connection skips envelopes addressed to someone else.
//!
//! Payloads are encoded once and shared as `Arc<String>`. A receiver that
//! falls `capacity` envelopes behind loses the oldest ones and reports the
//! lag on its next read. Nothing waits for delivery, so publishing is safe
//! while the coordinator lock is held.

use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::protocol::ServerMessage;
use crate::registry::ConnectionId;

/// Audience of a published message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipients {
    All,
    Node(ConnectionId),
}

/// Outbound delivery capability.
pub trait Publish {
    fn publish(&self, message: &ServerMessage, recipients: Recipients);
}

/// One encoded message on the shared channel.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// `None` addresses every peer
    pub to: Option<ConnectionId>,
    pub text: Arc<String>,
}

impl Envelope {
    pub fn is_for(&self, peer_id: &ConnectionId) -> bool {
        self.to.is_none_or(|to| to == *peer_id)
    }
}

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub active_peers: usize,
}

/// Lock-free counters; `publish` only has `&self`.
#[derive(Default)]
struct AtomicBroadcastStats {
    messages_sent: AtomicU64,
    messages_dropped: AtomicU64,
}

/// Broadcast group covering every connection of the wall.
pub struct BroadcastGroup {
    sender: broadcast::Sender<Envelope>,

    /// Connections that may be addressed with `Recipients::Node`
    peers: HashSet<ConnectionId>,

    atomic_stats: AtomicBroadcastStats,
}

impl BroadcastGroup {
    /// `capacity` bounds how far a receiver may fall behind.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            peers: HashSet::new(),
            atomic_stats: AtomicBroadcastStats::default(),
        }
    }

    /// Add a peer and subscribe it to the channel.
    pub fn add_peer(&mut self, peer_id: ConnectionId) -> broadcast::Receiver<Envelope> {
        self.peers.insert(peer_id);
        self.sender.subscribe()
    }

    pub fn remove_peer(&mut self, peer_id: &ConnectionId) -> bool {
        self.peers.remove(peer_id)
    }

    pub fn has_peer(&self, peer_id: &ConnectionId) -> bool {
        self.peers.contains(peer_id)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            messages_sent: self.atomic_stats.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.atomic_stats.messages_dropped.load(Ordering::Relaxed),
            active_peers: self.peers.len(),
        }
    }

    /// Send pre-encoded text to every subscriber. Returns the receiver count.
    pub fn broadcast_raw(&self, encoded: Arc<String>) -> usize {
        let count = self.sender.send(Envelope { to: None, text: encoded }).unwrap_or(0);
        self.atomic_stats.messages_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    /// Send pre-encoded text to one peer. Returns whether it was sent.
    pub fn send_raw(&self, peer_id: &ConnectionId, encoded: Arc<String>) -> bool {
        if !self.peers.contains(peer_id) {
            self.atomic_stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
            log::debug!("Dropping direct message for unknown peer {peer_id}");
            return false;
        }

        let envelope = Envelope { to: Some(*peer_id), text: encoded };
        match self.sender.send(envelope) {
            Ok(_) => {
                self.atomic_stats.messages_sent.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.atomic_stats.messages_dropped.fetch_add(1, Ordering::Relaxed);
                log::debug!("No receivers left for peer {peer_id}");
                false
            }
        }
    }

    /// Account for envelopes a lagging receiver never saw.
    pub fn record_lag(&self, missed: u64) {
        self.atomic_stats.messages_dropped.fetch_add(missed, Ordering::Relaxed);
    }
}

impl Publish for BroadcastGroup {
    fn publish(&self, message: &ServerMessage, recipients: Recipients) {
        let encoded = match message.encode() {
            Ok(text) => Arc::new(text),
            Err(e) => {
                log::error!("Failed to encode {} message: {e}", message.kind());
                return;
            }
        };

        match recipients {
            Recipients::All => {
                let count = self.broadcast_raw(encoded);
                log::trace!("Broadcast {} to {count} peers", message.kind());
            }
            Recipients::Node(peer_id) => {
                self.send_raw(&peer_id, encoded);
            }
        }
    }
}

/// In-memory publisher that records every delivery in order.
///
/// Useful for driving a [`crate::Coordinator`] without a transport.
#[derive(Debug, Default)]
pub struct Outbox {
    deliveries: RefCell<Vec<(Recipients, ServerMessage)>>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take everything recorded so far.
    pub fn drain(&self) -> Vec<(Recipients, ServerMessage)> {
        self.deliveries.borrow_mut().drain(..).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.deliveries.borrow().is_empty()
    }
}

impl Publish for Outbox {
    fn publish(&self, message: &ServerMessage, recipients: Recipients) {
        self.deliveries.borrow_mut().push((recipients, message.clone()));
    }
}
