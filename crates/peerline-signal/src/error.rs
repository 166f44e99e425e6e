//! Server-side errors

use thiserror::Error;

/// Errors that end a single connection, or the server on startup
#[derive(Error, Debug)]
pub enum SignalError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("random number generator failed: {0}")]
    Rng(String),
}
