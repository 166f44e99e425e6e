//! Signal protocol messages
//!
//! Every frame is a JSON object with a `type` discriminator. Inbound frames
//! decode into [`ClientMessage`]; the server answers and relays with
//! [`ServerMessage`]. Negotiation payloads (`offer`, `answer`,
//! `ice-candidate`) are never decoded past their addressing fields: the raw
//! object kept in [`Envelope`] is what gets relayed. Only `type` and the
//! peer ids have a required shape; every other field is taken as whatever
//! JSON the client sent, and flags use loose truthiness.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use peerline_core::{deserialize_truthy, PeerId, Profile, ProtocolError};

use crate::registry::PeerSummary;

/// Messages sent by clients
///
/// `user_id` is the sender's claimed identity. It is optional everywhere
/// but `register`; when absent the identity registered on the connection
/// is used instead.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Announce (or replace) this connection's identity and profile
    #[serde(rename_all = "camelCase")]
    Register {
        user_id: PeerId,
        #[serde(default)]
        profile: Option<Profile>,
    },

    /// Find connected peers by display name
    #[serde(rename_all = "camelCase")]
    Search {
        #[serde(default)]
        user_id: Option<PeerId>,
        #[serde(default)]
        query: String,
    },

    /// Session description offer, relayed verbatim
    #[serde(rename_all = "camelCase")]
    Offer {
        #[serde(default)]
        user_id: Option<PeerId>,
        target_user_id: PeerId,
    },

    /// Session description answer, relayed verbatim
    #[serde(rename_all = "camelCase")]
    Answer {
        #[serde(default)]
        user_id: Option<PeerId>,
        target_user_id: PeerId,
    },

    /// Connectivity candidate, relayed verbatim
    #[serde(rename_all = "camelCase")]
    IceCandidate {
        #[serde(default)]
        user_id: Option<PeerId>,
        target_user_id: PeerId,
    },

    /// Ask the target for a session
    #[serde(rename_all = "camelCase")]
    CallRequest {
        #[serde(default)]
        user_id: Option<PeerId>,
        target_user_id: PeerId,
        #[serde(default)]
        from_profile: Option<Profile>,
        #[serde(default)]
        call_type: Option<Value>,
        #[serde(default)]
        call_mode: Option<Value>,
    },

    /// Accept or reject an incoming call
    #[serde(rename_all = "camelCase")]
    CallResponse {
        #[serde(default)]
        user_id: Option<PeerId>,
        target_user_id: PeerId,
        #[serde(default, deserialize_with = "deserialize_truthy")]
        accepted: bool,
        #[serde(default, deserialize_with = "deserialize_truthy")]
        blocked: bool,
        #[serde(default)]
        one_way_mode: Option<Value>,
    },

    /// Lift a block the sender holds against the target
    #[serde(rename_all = "camelCase")]
    UnblockUser {
        #[serde(default)]
        user_id: Option<PeerId>,
        target_user_id: PeerId,
    },

    /// Leave a listen-only session, optionally blocking its originator
    #[serde(rename_all = "camelCase")]
    RejectOneWayCall {
        #[serde(default)]
        user_id: Option<PeerId>,
        target_user_id: PeerId,
        #[serde(default, deserialize_with = "deserialize_truthy")]
        blocked: bool,
    },

    /// Grant a listen-only peer's request to speak
    #[serde(rename_all = "camelCase")]
    AcceptSpeaking {
        #[serde(default)]
        user_id: Option<PeerId>,
        target_user_id: PeerId,
    },

    /// Refuse a listen-only peer's request to speak
    #[serde(rename_all = "camelCase")]
    RejectSpeaking {
        #[serde(default)]
        user_id: Option<PeerId>,
        target_user_id: PeerId,
        #[serde(default, deserialize_with = "deserialize_truthy")]
        blocked: bool,
    },

    /// Hang up
    #[serde(rename_all = "camelCase")]
    CallEnded {
        #[serde(default)]
        user_id: Option<PeerId>,
        target_user_id: PeerId,
    },

    /// Any `type` this server does not know; ignored
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Wire name of the message, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Register { .. } => "register",
            ClientMessage::Search { .. } => "search",
            ClientMessage::Offer { .. } => "offer",
            ClientMessage::Answer { .. } => "answer",
            ClientMessage::IceCandidate { .. } => "ice-candidate",
            ClientMessage::CallRequest { .. } => "call-request",
            ClientMessage::CallResponse { .. } => "call-response",
            ClientMessage::UnblockUser { .. } => "unblock-user",
            ClientMessage::RejectOneWayCall { .. } => "reject-one-way-call",
            ClientMessage::AcceptSpeaking { .. } => "accept-speaking",
            ClientMessage::RejectSpeaking { .. } => "reject-speaking",
            ClientMessage::CallEnded { .. } => "call-ended",
            ClientMessage::Unknown => "unknown",
        }
    }

    /// Identity the sender claims in the message itself
    pub fn claimed_sender(&self) -> Option<&PeerId> {
        match self {
            ClientMessage::Register { user_id, .. } => Some(user_id),
            ClientMessage::Search { user_id, .. }
            | ClientMessage::Offer { user_id, .. }
            | ClientMessage::Answer { user_id, .. }
            | ClientMessage::IceCandidate { user_id, .. }
            | ClientMessage::CallRequest { user_id, .. }
            | ClientMessage::CallResponse { user_id, .. }
            | ClientMessage::UnblockUser { user_id, .. }
            | ClientMessage::RejectOneWayCall { user_id, .. }
            | ClientMessage::AcceptSpeaking { user_id, .. }
            | ClientMessage::RejectSpeaking { user_id, .. }
            | ClientMessage::CallEnded { user_id, .. } => user_id.as_ref(),
            ClientMessage::Unknown => None,
        }
    }
}

/// Messages sent by the server
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Registration acknowledged
    #[serde(rename = "registered", rename_all = "camelCase")]
    Registered { user_id: PeerId },

    /// Full presence snapshot
    #[serde(rename = "onlineUsers")]
    OnlineUsers { users: Vec<PeerSummary> },

    /// Answer to a search
    #[serde(rename = "searchResults")]
    SearchResults { results: Vec<PeerSummary> },

    /// Someone is calling
    #[serde(rename = "incoming-call", rename_all = "camelCase")]
    IncomingCall {
        from_user_id: PeerId,
        #[serde(skip_serializing_if = "Option::is_none")]
        from_profile: Option<Profile>,
        #[serde(skip_serializing_if = "Option::is_none")]
        call_type: Option<Value>,
        call_mode: Value,
    },

    /// Outcome of a call request, relayed or synthesized
    #[serde(rename = "call-response", rename_all = "camelCase")]
    CallResponse {
        from_user_id: PeerId,
        accepted: bool,
        blocked: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        one_way_mode: Option<Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    /// A block against the receiver was lifted
    #[serde(rename = "user-unblocked", rename_all = "camelCase")]
    UserUnblocked { from_user_id: PeerId },

    #[serde(rename = "reject-one-way-call", rename_all = "camelCase")]
    RejectOneWayCall { from_user_id: PeerId, blocked: bool },

    #[serde(rename = "accept-speaking", rename_all = "camelCase")]
    AcceptSpeaking { from_user_id: PeerId },

    #[serde(rename = "reject-speaking", rename_all = "camelCase")]
    RejectSpeaking { from_user_id: PeerId, blocked: bool },

    #[serde(rename = "call-ended", rename_all = "camelCase")]
    CallEnded { from_user_id: PeerId },

    /// The target of a call request is not connected (opt-in)
    #[serde(rename = "peer-offline", rename_all = "camelCase")]
    PeerOffline { target_user_id: PeerId },
}

impl ServerMessage {
    /// Synthetic rejection sent on behalf of a peer who blocked the caller
    pub fn blocked_rejection(from: PeerId) -> Self {
        ServerMessage::CallResponse {
            from_user_id: from,
            accepted: false,
            blocked: true,
            one_way_mode: None,
            reason: Some("blocked".into()),
        }
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Field under which relayed frames carry the sender's identity
pub const FROM_FIELD: &str = "fromUserId";

/// A decoded inbound frame plus the object it came from
#[derive(Clone, Debug)]
pub struct Envelope {
    pub message: ClientMessage,
    pub raw: Map<String, Value>,
}

impl Envelope {
    /// Parse a text frame
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let raw = match serde_json::from_str::<Value>(text)? {
            Value::Object(map) => map,
            _ => return Err(ProtocolError::NotAnObject),
        };

        if !matches!(raw.get("type"), Some(Value::String(_))) {
            return Err(ProtocolError::MissingType);
        }

        let message = serde_json::from_value(Value::Object(raw.clone()))?;
        Ok(Self { message, raw })
    }

    /// Re-encode the raw frame with the sender's identity attached
    pub fn stamped(&self, from: &PeerId) -> Result<String, serde_json::Error> {
        let mut raw = self.raw.clone();
        raw.insert(FROM_FIELD.into(), Value::String(from.to_string()));
        serde_json::to_string(&raw)
    }
}
