//! Connection registry: who is online and how to reach them

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::debug;

use peerline_core::{PeerId, Profile};

use crate::SignalError;

/// Server-assigned identifier of one transport connection
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generate a random connection id
    pub fn generate() -> Result<Self, SignalError> {
        let mut bytes = [0u8; 8];
        getrandom::fill(&mut bytes).map_err(|e| SignalError::Rng(e.to_string()))?;
        Ok(Self(hex::encode(bytes)))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Live handle to a connection's outbound queue
///
/// Sends never block; a closed connection simply reports `false`.
#[derive(Clone, Debug)]
pub struct PeerHandle {
    conn: ConnectionId,
    tx: mpsc::UnboundedSender<Message>,
}

impl PeerHandle {
    pub fn new(conn: ConnectionId, tx: mpsc::UnboundedSender<Message>) -> Self {
        Self { conn, tx }
    }

    pub fn conn(&self) -> &ConnectionId {
        &self.conn
    }

    /// Queue a text frame
    pub fn send_text(&self, text: String) -> bool {
        self.send(Message::Text(text))
    }

    /// Queue any frame
    pub fn send(&self, msg: Message) -> bool {
        self.tx.send(msg).is_ok()
    }
}

/// Public view of a registered peer
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSummary {
    pub user_id: PeerId,
    pub profile: Profile,
}

/// A registered peer
#[derive(Debug)]
pub struct PeerRecord {
    pub id: PeerId,
    pub handle: PeerHandle,
    pub profile: Profile,
}

impl PeerRecord {
    fn summary(&self) -> PeerSummary {
        PeerSummary {
            user_id: self.id.clone(),
            profile: self.profile.clone(),
        }
    }
}

/// Map from peer id to its live connection
///
/// Holds at most one record per id, and at most one id per connection.
/// Ordered by id so snapshots and search results are deterministic.
#[derive(Debug, Default)]
pub struct Registry {
    peers: BTreeMap<PeerId, PeerRecord>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record for `id`.
    ///
    /// Returns the id this connection held before, if it was a different one
    /// and has now been released.
    pub fn register(&mut self, id: PeerId, handle: PeerHandle, profile: Profile) -> Option<PeerId> {
        let previous = self
            .id_for(handle.conn())
            .filter(|old| **old != id)
            .cloned();

        if let Some(old) = &previous {
            self.peers.remove(old);
            debug!(peer = %old, conn = %handle.conn(), "Released previous identity");
        }

        self.peers.insert(
            id.clone(),
            PeerRecord {
                id,
                handle,
                profile,
            },
        );

        previous
    }

    /// Find the live record for `id`
    pub fn lookup(&self, id: &PeerId) -> Option<&PeerRecord> {
        self.peers.get(id)
    }

    /// Id currently registered on a connection
    pub fn id_for(&self, conn: &ConnectionId) -> Option<&PeerId> {
        self.peers
            .values()
            .find(|r| r.handle.conn() == conn)
            .map(|r| &r.id)
    }

    /// Drop the record owned by a closing connection
    ///
    /// A connection whose id was since re-registered elsewhere owns nothing
    /// and yields `None`.
    pub fn remove_by_handle(&mut self, conn: &ConnectionId) -> Option<PeerId> {
        let id = self.id_for(conn)?.clone();
        self.peers.remove(&id);
        Some(id)
    }

    /// Case-insensitive display-name search, excluding the requester
    pub fn search(&self, excluding: Option<&PeerId>, query: &str) -> Vec<PeerSummary> {
        let needle = query.to_lowercase();
        self.peers
            .values()
            .filter(|r| Some(&r.id) != excluding)
            .filter(|r| r.profile.name_matches(&needle))
            .map(PeerRecord::summary)
            .collect()
    }

    /// Every registered peer, as of now
    pub fn snapshot(&self) -> Vec<PeerSummary> {
        self.peers.values().map(PeerRecord::summary).collect()
    }

    /// Handles of every registered connection
    pub fn handles(&self) -> impl Iterator<Item = &PeerHandle> {
        self.peers.values().map(|r| &r.handle)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
