//! Best-effort message router
//!
//! Resolves a target through the registry and queues the frame on its live
//! handle. An offline target is a normal outcome: nothing is queued, retried,
//! or reported to the sender.

use tracing::{debug, warn};

use peerline_core::PeerId;

use crate::messages::{Envelope, ServerMessage};
use crate::registry::Registry;

pub struct Router<'a> {
    registry: &'a Registry,
}

impl<'a> Router<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Send a server-built message to `target`
    pub fn forward(&self, target: &PeerId, msg: &ServerMessage) -> bool {
        match msg.to_json() {
            Ok(text) => self.deliver(target, text),
            Err(e) => {
                warn!(target = %target, error = %e, "Failed to encode message");
                false
            }
        }
    }

    /// Relay a client frame verbatim, stamped with the sender's id
    pub fn relay(&self, target: &PeerId, envelope: &Envelope, from: &PeerId) -> bool {
        match envelope.stamped(from) {
            Ok(text) => self.deliver(target, text),
            Err(e) => {
                warn!(target = %target, error = %e, "Failed to encode relay");
                false
            }
        }
    }

    fn deliver(&self, target: &PeerId, text: String) -> bool {
        let Some(record) = self.registry.lookup(target) else {
            debug!(target = %target, "Target offline, dropping");
            return false;
        };

        let delivered = record.handle.send_text(text);
        if !delivered {
            debug!(target = %target, "Target connection closing, dropping");
        }
        delivered
    }
}
