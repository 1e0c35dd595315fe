//! Live set of connected peers and broadcast fan-out.
//!
//! All membership changes go through one `RwLock`. Broadcast snapshots the
//! writers, releases the lock, then delivers; peers whose delivery fails are
//! removed afterwards.

use crate::error::{Error, Result};
use crate::protocol::{Packet, PeerSummary};
use crate::session::SessionWriter;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, warn};

/// How long one recipient may take to accept a broadcast before it is dropped.
pub const DELIVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Roster key for one connection.
pub type PeerId = u64;

/// Writer shared between a peer's own handler and broadcasters.
pub type SharedWriter = Arc<Mutex<SessionWriter>>;

struct RosterEntry {
    addr: SocketAddr,
    writer: SharedWriter,
    identity: Option<PeerSummary>,
    /// Authentication order, used to list users in join order.
    joined: u64,
}

#[derive(Default)]
struct RosterInner {
    peers: HashMap<PeerId, RosterEntry>,
    next_id: PeerId,
    next_join: u64,
}

/// The server's peers.
pub struct Roster {
    inner: RwLock<RosterInner>,
    delivery_timeout: Duration,
}

impl Default for Roster {
    fn default() -> Self {
        Self {
            inner: RwLock::default(),
            delivery_timeout: DELIVERY_TIMEOUT,
        }
    }
}

impl Roster {
    /// Create an empty roster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the per-recipient delivery bound.
    pub fn with_delivery_timeout(mut self, wait: Duration) -> Self {
        self.delivery_timeout = wait;
        self
    }

    /// Add an established session.
    pub async fn insert(&self, addr: SocketAddr, writer: SharedWriter) -> PeerId {
        let mut inner = self.inner.write().await;
        let id = inner.next_id;
        inner.next_id += 1;
        inner.peers.insert(
            id,
            RosterEntry {
                addr,
                writer,
                identity: None,
                joined: 0,
            },
        );
        id
    }

    /// Remove a peer, returning its identity if it had authenticated.
    pub async fn remove(&self, id: PeerId) -> Option<PeerSummary> {
        self.inner
            .write()
            .await
            .peers
            .remove(&id)
            .and_then(|entry| entry.identity)
    }

    /// Mark a peer authenticated.
    ///
    /// The uniqueness check and the update happen under one write lock.
    /// Names compare case-insensitively against other authenticated peers.
    pub async fn authenticate(&self, id: PeerId, identity: PeerSummary) -> Result<()> {
        let mut inner = self.inner.write().await;
        let wanted = identity.name.to_lowercase();

        let taken = inner.peers.iter().any(|(other, entry)| {
            *other != id
                && entry
                    .identity
                    .as_ref()
                    .is_some_and(|existing| existing.name.to_lowercase() == wanted)
        });
        if taken {
            return Err(Error::NameConflict);
        }

        let joined = inner.next_join;
        let entry = inner
            .peers
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("peer {}", id)))?;
        if entry.identity.is_some() {
            return Err(Error::ProtocolViolation(
                "Client is already authenticated.".into(),
            ));
        }
        entry.identity = Some(identity);
        entry.joined = joined;
        inner.next_join += 1;
        Ok(())
    }

    /// Number of connected peers.
    pub async fn len(&self) -> usize {
        self.inner.read().await.peers.len()
    }

    /// Whether no peer is connected.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.peers.is_empty()
    }

    /// Authenticated peers in join order.
    pub async fn users(&self) -> Vec<PeerSummary> {
        let inner = self.inner.read().await;
        let mut users: Vec<(u64, PeerSummary)> = inner
            .peers
            .values()
            .filter_map(|entry| entry.identity.clone().map(|id| (entry.joined, id)))
            .collect();
        users.sort_by_key(|(joined, _)| *joined);
        users.into_iter().map(|(_, user)| user).collect()
    }

    /// Deliver a packet to every peer.
    ///
    /// The packet is serialized once and encrypted per recipient. Returns
    /// the number of delivery attempts.
    pub async fn broadcast(&self, packet: &Packet) -> Result<usize> {
        let payload = packet.to_bytes()?;
        let targets: Vec<(PeerId, SocketAddr, SharedWriter)> = {
            let inner = self.inner.read().await;
            inner
                .peers
                .iter()
                .map(|(id, entry)| (*id, entry.addr, Arc::clone(&entry.writer)))
                .collect()
        };

        let mut failed = Vec::new();
        for (id, addr, writer) in &targets {
            let delivery = async { writer.lock().await.send_payload(&payload).await };
            match timeout(self.delivery_timeout, delivery).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(peer = %addr, error = %e, "Delivery failed, dropping peer");
                    failed.push(*id);
                }
                Err(_) => {
                    warn!(peer = %addr, "Delivery timed out, dropping peer");
                    failed.push(*id);
                }
            }
        }

        if !failed.is_empty() {
            let mut inner = self.inner.write().await;
            for id in failed {
                inner.peers.remove(&id);
            }
        }

        debug!(kind = %packet.kind, recipients = targets.len(), "Broadcast");
        Ok(targets.len())
    }

    /// Close every session and empty the roster.
    pub async fn close_all(&self) {
        let entries: Vec<RosterEntry> = {
            let mut inner = self.inner.write().await;
            inner.peers.drain().map(|(_, entry)| entry).collect()
        };
        for entry in entries {
            if let Err(e) = entry.writer.lock().await.close().await {
                debug!(peer = %entry.addr, error = %e, "Close failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::kind;
    use crate::session::{Session, SessionReader};
    use serde_json::json;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    /// Returns the shared writer for the server side and a reader for the peer side.
    fn pipe() -> (SharedWriter, SessionReader) {
        let (a, b) = tokio::io::duplex(64 * 1024);
        let (_, writer) = Session::new(a).split();
        let (reader, _) = Session::new(b).split();
        (Arc::new(Mutex::new(writer)), reader)
    }

    fn summary(name: &str) -> PeerSummary {
        PeerSummary {
            uid: format!("uid-{}", name),
            name: name.into(),
        }
    }

    #[tokio::test]
    async fn test_name_uniqueness_is_case_insensitive() {
        let roster = Roster::new();
        let (w1, _r1) = pipe();
        let (w2, _r2) = pipe();
        let alice = roster.insert(addr(1), w1).await;
        let other = roster.insert(addr(2), w2).await;

        roster.authenticate(alice, summary("Alice")).await.expect("first");
        let result = roster.authenticate(other, summary("alice")).await;
        assert!(matches!(result, Err(Error::NameConflict)));

        assert_eq!(roster.users().await, vec![summary("Alice")]);
        assert_eq!(roster.len().await, 2);
    }

    #[tokio::test]
    async fn test_authenticate_twice_rejected() {
        let roster = Roster::new();
        let (w, _r) = pipe();
        let id = roster.insert(addr(1), w).await;
        roster.authenticate(id, summary("bob")).await.expect("first");
        assert!(matches!(
            roster.authenticate(id, summary("robert")).await,
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_users_in_join_order() {
        let roster = Roster::new();
        let mut ids = Vec::new();
        let mut readers = Vec::new();
        for port in 0..3 {
            let (w, r) = pipe();
            ids.push(roster.insert(addr(port), w).await);
            readers.push(r);
        }
        roster.authenticate(ids[2], summary("carol")).await.expect("auth");
        roster.authenticate(ids[0], summary("alice")).await.expect("auth");

        let names: Vec<String> = roster.users().await.into_iter().map(|u| u.name).collect();
        assert_eq!(names, vec!["carol", "alice"]);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone() {
        let roster = Roster::new();
        let (w1, mut r1) = pipe();
        let (w2, mut r2) = pipe();
        roster.insert(addr(1), w1).await;
        roster.insert(addr(2), w2).await;

        let packet = Packet::new(kind::MESSAGE, json!({"content": "hi"}));
        assert_eq!(roster.broadcast(&packet).await.expect("broadcast"), 2);

        assert_eq!(r1.receive_packet(1024).await.expect("r1"), packet);
        assert_eq!(r2.receive_packet(1024).await.expect("r2"), packet);
    }

    #[tokio::test]
    async fn test_failed_peer_removed_others_still_served() {
        let roster = Roster::new();
        let (w1, r1) = pipe();
        let (w2, mut r2) = pipe();
        roster.insert(addr(1), w1).await;
        roster.insert(addr(2), w2).await;
        drop(r1);

        let packet = Packet::new(kind::MESSAGE, json!({"content": "still here"}));
        assert_eq!(roster.broadcast(&packet).await.expect("broadcast"), 2);
        assert_eq!(r2.receive_packet(1024).await.expect("r2"), packet);
        assert_eq!(roster.len().await, 1);
    }

    #[tokio::test]
    async fn test_stalled_peer_does_not_block_fan_out() {
        let roster = Roster::new().with_delivery_timeout(Duration::from_millis(100));
        let (stalled, stalled_reader) = {
            let (a, b) = tokio::io::duplex(16);
            let (_, writer) = Session::new(a).split();
            let (reader, _) = Session::new(b).split();
            (Arc::new(Mutex::new(writer)), reader)
        };
        let (healthy, mut reader) = pipe();
        roster.insert(addr(1), stalled).await;
        roster.insert(addr(2), healthy).await;

        let packet = Packet::new(kind::MESSAGE, json!({"content": "anyone there?"}));
        assert_eq!(roster.broadcast(&packet).await.expect("broadcast"), 2);
        assert_eq!(reader.receive_packet(1024).await.expect("healthy"), packet);
        assert_eq!(roster.len().await, 1);
        drop(stalled_reader);
    }

    #[tokio::test]
    async fn test_remove_returns_identity() {
        let roster = Roster::new();
        let (w, _r) = pipe();
        let id = roster.insert(addr(1), w).await;
        roster.authenticate(id, summary("dave")).await.expect("auth");

        assert_eq!(roster.remove(id).await, Some(summary("dave")));
        assert!(roster.is_empty().await);
        assert_eq!(roster.remove(id).await, None);
    }
}
