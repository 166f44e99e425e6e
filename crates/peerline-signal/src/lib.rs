//! Peerline Signal Server
//!
//! Presence directory and call negotiation relay for peer-to-peer
//! audio/video/chat sessions. Clients connect via WebSocket and exchange
//! JSON envelopes; media itself never passes through the server.
//!
//! # Protocol
//!
//! 1. Client registers its peer id and profile; everyone receives the new
//!    presence snapshot
//! 2. Caller sends `call-request`; the server refuses it on the callee's
//!    behalf if the callee has blocked the caller, otherwise rings the callee
//! 3. Callee answers with `call-response` (possibly listen-only, possibly
//!    blocking the caller)
//! 4. Server relays `offer` / `answer` / `ice-candidate` verbatim
//! 5. Either side sends `call-ended`
//!
//! All state is in memory and lasts as long as the process.

pub mod error;
pub mod http;
pub mod hub;
pub mod ledger;
pub mod messages;
mod negotiation;
pub mod registry;
pub mod router;
pub mod server;

pub use error::SignalError;
pub use hub::SignalHub;
pub use ledger::BlockLedger;
pub use messages::{ClientMessage, Envelope, ServerMessage};
pub use registry::{ConnectionId, PeerHandle, PeerSummary, Registry};
pub use router::Router;
pub use server::SignalServer;

pub use peerline_core::{DEFAULT_MAX_MESSAGE_BYTES, DEFAULT_PORT};
