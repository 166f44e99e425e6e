//! Signal hub: the single serialization point of the server
//!
//! The registry and the blocking ledger live together behind one lock.
//! Every inbound envelope is handled to completion while the lock is held,
//! so mutations are serialized and frames from one sender reach a given
//! target in the order they arrived.

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use peerline_core::{PeerId, Profile, SignalConfig};

use crate::ledger::BlockLedger;
use crate::messages::{ClientMessage, Envelope, ServerMessage};
use crate::registry::{ConnectionId, PeerHandle, PeerSummary, Registry};

/// Shared server state
pub struct SignalHub {
    state: Mutex<HubState>,
    notify_offline: bool,
}

/// Authoritative tables guarded by the hub lock
#[derive(Debug, Default)]
pub(crate) struct HubState {
    pub(crate) registry: Registry,
    pub(crate) ledger: BlockLedger,
}

impl SignalHub {
    pub fn new(config: &SignalConfig) -> Self {
        Self {
            state: Mutex::new(HubState::default()),
            notify_offline: config.notify_offline,
        }
    }

    /// Dispatch one envelope received on `origin`
    pub fn handle(&self, origin: &PeerHandle, envelope: &Envelope) {
        let mut state = self.state.lock();

        let sender = envelope
            .message
            .claimed_sender()
            .cloned()
            .or_else(|| state.registry.id_for(origin.conn()).cloned());

        match &envelope.message {
            ClientMessage::Register { user_id, profile } => {
                state.register(origin, user_id, profile.clone().unwrap_or_default());
            }
            ClientMessage::Search { query, .. } => {
                state.search(origin, sender.as_ref(), query);
            }
            ClientMessage::Unknown => {
                debug!(conn = %origin.conn(), "Ignoring message of unknown type");
            }
            message => {
                let Some(from) = sender else {
                    debug!(
                        conn = %origin.conn(),
                        kind = message.kind(),
                        "Dropping message from unidentified connection"
                    );
                    return;
                };
                state.negotiate(origin, &from, envelope, self.notify_offline);
            }
        }
    }

    /// Forget a closed connection and tell everyone who is left
    pub fn disconnect(&self, conn: &ConnectionId) -> Option<PeerId> {
        let mut state = self.state.lock();
        let id = state.registry.remove_by_handle(conn)?;

        info!(peer = %id, conn = %conn, "Peer disconnected");
        state.broadcast_presence();
        Some(id)
    }

    /// Number of registered peers
    pub fn peer_count(&self) -> usize {
        self.state.lock().registry.len()
    }

    /// Number of block relations
    pub fn block_count(&self) -> usize {
        self.state.lock().ledger.len()
    }

    pub fn is_blocked(&self, blocker: &PeerId, blocked: &PeerId) -> bool {
        self.state.lock().ledger.is_blocked(blocker, blocked)
    }

    /// Current presence snapshot
    pub fn online_peers(&self) -> Vec<PeerSummary> {
        self.state.lock().registry.snapshot()
    }
}

impl HubState {
    fn register(&mut self, origin: &PeerHandle, id: &PeerId, profile: Profile) {
        if let Some(old) = self.registry.register(id.clone(), origin.clone(), profile) {
            info!(peer = %old, conn = %origin.conn(), "Connection dropped its previous identity");
        }
        info!(peer = %id, conn = %origin.conn(), "Peer registered");

        reply(origin, &ServerMessage::Registered { user_id: id.clone() });
        self.broadcast_presence();
    }

    fn search(&self, origin: &PeerHandle, requester: Option<&PeerId>, query: &str) {
        let results = self.registry.search(requester, query);
        debug!(conn = %origin.conn(), query, hits = results.len(), "Search");
        reply(origin, &ServerMessage::SearchResults { results });
    }

    /// Push the full membership to every registered connection
    pub(crate) fn broadcast_presence(&self) {
        let msg = ServerMessage::OnlineUsers {
            users: self.registry.snapshot(),
        };
        let text = match msg.to_json() {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Failed to encode presence");
                return;
            }
        };

        let mut sent = 0;
        for handle in self.registry.handles() {
            if handle.send_text(text.clone()) {
                sent += 1;
            }
        }
        debug!(peers = self.registry.len(), sent, "Presence broadcast");
    }
}

/// Answer the connection a message came from
pub(crate) fn reply(origin: &PeerHandle, msg: &ServerMessage) -> bool {
    match msg.to_json() {
        Ok(text) => origin.send_text(text),
        Err(e) => {
            warn!(conn = %origin.conn(), error = %e, "Failed to encode reply");
            false
        }
    }
}
