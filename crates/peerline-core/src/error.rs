//! Error types for the Peerline signaling protocol

use thiserror::Error;

/// Envelope-level errors
///
/// All of these are recovered on the connection that produced them; the
/// server logs them and keeps the connection open.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("envelope is not a JSON object")]
    NotAnObject,

    #[error("envelope has no string `type` field")]
    MissingType,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            ProtocolError::MissingType.to_string(),
            "envelope has no string `type` field"
        );

        let err: ProtocolError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(err.to_string().starts_with("malformed envelope"));
    }
}
