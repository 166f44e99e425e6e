//! Blocking ledger
//!
//! Directed relation "blocker refuses calls from blocked". Lives for the
//! process lifetime and is independent of who is currently connected.

use std::collections::{HashMap, HashSet};

use tracing::info;

use peerline_core::PeerId;

#[derive(Debug, Default)]
pub struct BlockLedger {
    blocked: HashMap<PeerId, HashSet<PeerId>>,
}

impl BlockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `blocker` refuses `blocked`. Idempotent.
    pub fn block(&mut self, blocker: &PeerId, blocked: &PeerId) {
        let added = self
            .blocked
            .entry(blocker.clone())
            .or_default()
            .insert(blocked.clone());

        if added {
            info!(blocker = %blocker, blocked = %blocked, "Peer blocked");
        }
    }

    /// Lift a block. Removing an absent pair is a no-op.
    pub fn unblock(&mut self, blocker: &PeerId, blocked: &PeerId) {
        let Some(set) = self.blocked.get_mut(blocker) else {
            return;
        };

        if set.remove(blocked) {
            info!(blocker = %blocker, blocked = %blocked, "Peer unblocked");
        }
        if set.is_empty() {
            self.blocked.remove(blocker);
        }
    }

    pub fn is_blocked(&self, blocker: &PeerId, blocked: &PeerId) -> bool {
        self.blocked
            .get(blocker)
            .is_some_and(|set| set.contains(blocked))
    }

    /// Number of (blocker, blocked) pairs
    pub fn len(&self) -> usize {
        self.blocked.values().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.blocked.is_empty()
    }
}
