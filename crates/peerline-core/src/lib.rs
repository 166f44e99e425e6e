//! Peerline Core - Shared types, configuration, and protocol errors
//!
//! This crate contains the foundational types used across all Peerline components.
//! It has no dependencies on networking code.

pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, ConfigError, SignalConfig};
pub use error::ProtocolError;
pub use types::{deserialize_truthy, is_truthy, PeerId, Profile};

/// Default signaling port
pub const DEFAULT_PORT: u16 = 3000;

/// Default cap on a single inbound WebSocket message (64 KB)
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 64 * 1024;
