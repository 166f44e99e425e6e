//! Call negotiation protocol
//!
//! The server keeps no call object. Ringing, negotiating and active phases
//! exist only in the two clients; the server authorizes the request step
//! against the blocking ledger and otherwise relays. Blocks are recorded
//! when a rejection carries `blocked`, and lifted only by `unblock-user`.

use serde_json::Value;
use tracing::{debug, info};

use peerline_core::{is_truthy, PeerId, Profile};

use crate::hub::{reply, HubState};
use crate::messages::{ClientMessage, Envelope, ServerMessage};
use crate::registry::PeerHandle;
use crate::router::Router;

/// Mode announced to the callee when the caller names none
const DEFAULT_CALL_MODE: &str = "normal";

impl HubState {
    /// Handle every message that is part of a two-party conversation
    pub(crate) fn negotiate(
        &mut self,
        origin: &PeerHandle,
        from: &PeerId,
        envelope: &Envelope,
        notify_offline: bool,
    ) {
        match &envelope.message {
            ClientMessage::CallRequest {
                target_user_id,
                from_profile,
                call_type,
                call_mode,
                ..
            } => self.call_request(
                origin,
                from,
                target_user_id,
                from_profile.as_ref(),
                call_type.clone(),
                call_mode
                    .clone()
                    .filter(is_truthy)
                    .unwrap_or_else(|| Value::from(DEFAULT_CALL_MODE)),
                notify_offline,
            ),

            ClientMessage::CallResponse {
                target_user_id,
                accepted,
                blocked,
                one_way_mode,
                ..
            } => self.call_response(
                from,
                target_user_id,
                *accepted,
                *blocked,
                one_way_mode.clone(),
            ),

            ClientMessage::Offer { target_user_id, .. }
            | ClientMessage::Answer { target_user_id, .. }
            | ClientMessage::IceCandidate { target_user_id, .. } => {
                let delivered = Router::new(&self.registry).relay(target_user_id, envelope, from);
                debug!(
                    from = %from,
                    target = %target_user_id,
                    kind = envelope.message.kind(),
                    delivered,
                    "Negotiation relay"
                );
            }

            ClientMessage::UnblockUser { target_user_id, .. } => {
                self.ledger.unblock(from, target_user_id);
                self.forward(
                    target_user_id,
                    ServerMessage::UserUnblocked {
                        from_user_id: from.clone(),
                    },
                );
            }

            ClientMessage::RejectOneWayCall {
                target_user_id,
                blocked,
                ..
            } => {
                if *blocked {
                    self.ledger.block(from, target_user_id);
                }
                self.forward(
                    target_user_id,
                    ServerMessage::RejectOneWayCall {
                        from_user_id: from.clone(),
                        blocked: *blocked,
                    },
                );
            }

            ClientMessage::AcceptSpeaking { target_user_id, .. } => {
                self.forward(
                    target_user_id,
                    ServerMessage::AcceptSpeaking {
                        from_user_id: from.clone(),
                    },
                );
            }

            ClientMessage::RejectSpeaking {
                target_user_id,
                blocked,
                ..
            } => {
                if *blocked {
                    self.ledger.block(from, target_user_id);
                }
                self.forward(
                    target_user_id,
                    ServerMessage::RejectSpeaking {
                        from_user_id: from.clone(),
                        blocked: *blocked,
                    },
                );
            }

            ClientMessage::CallEnded { target_user_id, .. } => {
                self.forward(
                    target_user_id,
                    ServerMessage::CallEnded {
                        from_user_id: from.clone(),
                    },
                );
            }

            // Handled by the hub itself
            ClientMessage::Register { .. } | ClientMessage::Search { .. } | ClientMessage::Unknown => {}
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn call_request(
        &self,
        origin: &PeerHandle,
        from: &PeerId,
        target: &PeerId,
        from_profile: Option<&Profile>,
        call_type: Option<Value>,
        call_mode: Value,
        notify_offline: bool,
    ) {
        if self.ledger.is_blocked(target, from) {
            info!(from = %from, target = %target, "Call request refused: caller is blocked");
            reply(origin, &ServerMessage::blocked_rejection(target.clone()));
            return;
        }

        // Fall back to the caller's registered profile
        let from_profile = from_profile
            .cloned()
            .or_else(|| self.registry.lookup(from).map(|r| r.profile.clone()));

        let delivered = self.forward(
            target,
            ServerMessage::IncomingCall {
                from_user_id: from.clone(),
                from_profile,
                call_type,
                call_mode,
            },
        );

        if delivered {
            info!(from = %from, target = %target, "Call request delivered");
        } else if notify_offline {
            reply(
                origin,
                &ServerMessage::PeerOffline {
                    target_user_id: target.clone(),
                },
            );
        }
    }

    fn call_response(
        &mut self,
        from: &PeerId,
        target: &PeerId,
        accepted: bool,
        blocked: bool,
        one_way_mode: Option<Value>,
    ) {
        // The responder refuses the caller from now on
        if !accepted && blocked {
            self.ledger.block(from, target);
        }

        self.forward(
            target,
            ServerMessage::CallResponse {
                from_user_id: from.clone(),
                accepted,
                blocked,
                one_way_mode,
                reason: None,
            },
        );
        debug!(from = %from, target = %target, accepted, blocked, "Call response");
    }

    fn forward(&self, target: &PeerId, msg: ServerMessage) -> bool {
        Router::new(&self.registry).forward(target, &msg)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use crate::hub::test_support::{hub, TestPeer};
    use crate::hub::SignalHub;
    use peerline_core::{PeerId, SignalConfig};

    fn pair(hub: &SignalHub) -> (TestPeer, TestPeer) {
        let mut ann = TestPeer::new();
        let mut bob = TestPeer::new();
        ann.register(hub, "ann", "Ann");
        bob.register(hub, "bob", "Bob");
        ann.drain();
        bob.drain();
        (ann, bob)
    }

    fn call_request(kind: &str) -> Value {
        json!({
            "type": "call-request",
            "userId": "ann",
            "targetUserId": "bob",
            "fromProfile": {"name": "Ann"},
            "callType": kind
        })
    }

    #[test]
    fn test_call_request_delivered() {
        let hub = hub();
        let (mut ann, mut bob) = pair(&hub);

        ann.send(&hub, call_request("video"));

        let msgs = bob.drain_calls();
        assert_eq!(msgs.len(), 1);
        assert_eq!(
            msgs[0],
            json!({
                "type": "incoming-call",
                "fromUserId": "ann",
                "fromProfile": {"name": "Ann"},
                "callType": "video",
                "callMode": "normal"
            })
        );
        assert!(ann.drain_calls().is_empty());
    }

    #[test]
    fn test_call_request_carries_mode_and_registered_profile() {
        let hub = hub();
        let (ann, mut bob) = pair(&hub);

        ann.send(
            &hub,
            json!({
                "type": "call-request",
                "userId": "ann",
                "targetUserId": "bob",
                "callType": "audio",
                "callMode": "one-way"
            }),
        );

        let msgs = bob.drain_calls();
        assert_eq!(msgs[0]["callMode"], "one-way");
        assert_eq!(msgs[0]["fromProfile"]["name"], "Ann");
    }

    #[test]
    fn test_loosely_typed_call_fields_still_ring() {
        let hub = hub();
        let (mut ann, mut bob) = pair(&hub);

        ann.send(
            &hub,
            json!({
                "type": "call-request",
                "userId": "ann",
                "targetUserId": "bob",
                "fromProfile": {"name": null, "avatar": 4},
                "callType": 3,
                "callMode": null
            }),
        );

        assert_eq!(
            bob.drain_calls(),
            vec![json!({
                "type": "incoming-call",
                "fromUserId": "ann",
                "fromProfile": {"name": null, "avatar": 4},
                "callType": 3,
                "callMode": "normal"
            })]
        );

        bob.send(
            &hub,
            json!({
                "type": "call-response",
                "userId": "bob",
                "targetUserId": "ann",
                "accepted": 1,
                "blocked": null,
                "oneWayMode": "listen-only"
            }),
        );
        assert_eq!(
            ann.drain_calls(),
            vec![json!({
                "type": "call-response",
                "fromUserId": "bob",
                "accepted": true,
                "blocked": false,
                "oneWayMode": "listen-only"
            })]
        );
    }

    #[test]
    fn test_null_blocked_flag_records_nothing() {
        let hub = hub();
        let (mut ann, bob) = pair(&hub);

        bob.send(
            &hub,
            json!({"type": "reject-speaking", "userId": "bob", "targetUserId": "ann", "blocked": null}),
        );
        assert_eq!(
            ann.drain_calls(),
            vec![json!({"type": "reject-speaking", "fromUserId": "bob", "blocked": false})]
        );
        assert_eq!(hub.block_count(), 0);

        ann.send(&hub, call_request("video"));
        assert!(ann.drain_calls().is_empty());
    }

    #[test]
    fn test_block_via_rejection_then_auto_reject() {
        let hub = hub();
        let (mut ann, mut bob) = pair(&hub);

        ann.send(&hub, call_request("video"));
        assert_eq!(bob.drain_calls()[0]["type"], "incoming-call");

        bob.send(
            &hub,
            json!({
                "type": "call-response",
                "userId": "bob",
                "targetUserId": "ann",
                "accepted": false,
                "blocked": true
            }),
        );
        assert_eq!(
            ann.drain_calls(),
            vec![json!({
                "type": "call-response",
                "fromUserId": "bob",
                "accepted": false,
                "blocked": true
            })]
        );
        assert!(hub.is_blocked(&PeerId::from("bob"), &PeerId::from("ann")));
        assert!(!hub.is_blocked(&PeerId::from("ann"), &PeerId::from("bob")));

        ann.send(&hub, call_request("video"));
        assert_eq!(
            ann.drain_calls(),
            vec![json!({
                "type": "call-response",
                "fromUserId": "bob",
                "accepted": false,
                "blocked": true,
                "reason": "blocked"
            })]
        );
        assert!(bob.drain_calls().is_empty());
    }

    #[test]
    fn test_plain_rejection_does_not_block() {
        let hub = hub();
        let (mut ann, mut bob) = pair(&hub);

        bob.send(
            &hub,
            json!({"type": "call-response", "userId": "bob", "targetUserId": "ann", "accepted": false}),
        );
        assert_eq!(ann.drain_calls()[0]["blocked"], false);
        assert_eq!(hub.block_count(), 0);

        ann.send(&hub, call_request("audio"));
        assert_eq!(bob.drain_calls()[0]["type"], "incoming-call");
    }

    #[test]
    fn test_unblock_restores_delivery() {
        let hub = hub();
        let (mut ann, mut bob) = pair(&hub);

        bob.send(
            &hub,
            json!({"type": "call-response", "userId": "bob", "targetUserId": "ann",
                   "accepted": false, "blocked": true}),
        );
        ann.drain();

        bob.send(&hub, json!({"type": "unblock-user", "userId": "bob", "targetUserId": "ann"}));
        assert_eq!(
            ann.drain_calls(),
            vec![json!({"type": "user-unblocked", "fromUserId": "bob"})]
        );
        assert_eq!(hub.block_count(), 0);

        ann.send(&hub, call_request("chat"));
        let msgs = bob.drain_calls();
        assert_eq!(msgs[0]["type"], "incoming-call");
        assert_eq!(msgs[0]["callType"], "chat");
    }

    #[test]
    fn test_blocked_caller_cannot_unblock_itself() {
        let hub = hub();
        let (mut ann, mut bob) = pair(&hub);

        bob.send(
            &hub,
            json!({"type": "call-response", "userId": "bob", "targetUserId": "ann",
                   "accepted": false, "blocked": true}),
        );
        // Clears (ann blocks bob), which never existed
        ann.send(&hub, json!({"type": "unblock-user", "userId": "ann", "targetUserId": "bob"}));
        assert!(hub.is_blocked(&PeerId::from("bob"), &PeerId::from("ann")));
        bob.drain();
        ann.drain();

        ann.send(&hub, call_request("video"));
        assert_eq!(ann.drain_calls()[0]["reason"], "blocked");
        assert!(bob.drain_calls().is_empty());
    }

    #[test]
    fn test_block_applies_while_blocker_offline() {
        let hub = hub();
        let (mut ann, bob) = pair(&hub);

        bob.send(
            &hub,
            json!({"type": "call-response", "userId": "bob", "targetUserId": "ann",
                   "accepted": false, "blocked": true}),
        );
        hub.disconnect(bob.handle.conn());
        ann.drain();

        ann.send(&hub, call_request("video"));
        assert_eq!(ann.drain_calls()[0]["reason"], "blocked");
    }

    #[test]
    fn test_one_way_session_and_rejection() {
        let hub = hub();
        let (mut ann, mut bob) = pair(&hub);

        ann.send(&hub, call_request("video"));
        bob.drain();

        // Bob's client auto-accepts in listen-only mode
        bob.send(
            &hub,
            json!({"type": "call-response", "userId": "bob", "targetUserId": "ann",
                   "accepted": true, "oneWayMode": true}),
        );
        assert_eq!(
            ann.drain_calls(),
            vec![json!({
                "type": "call-response",
                "fromUserId": "bob",
                "accepted": true,
                "blocked": false,
                "oneWayMode": true
            })]
        );

        bob.send(
            &hub,
            json!({"type": "reject-one-way-call", "userId": "bob", "targetUserId": "ann",
                   "blocked": true}),
        );
        assert_eq!(
            ann.drain_calls(),
            vec![json!({"type": "reject-one-way-call", "fromUserId": "bob", "blocked": true})]
        );
        assert!(hub.is_blocked(&PeerId::from("bob"), &PeerId::from("ann")));
    }

    #[test]
    fn test_speaking_promotion() {
        let hub = hub();
        let (mut ann, mut bob) = pair(&hub);

        ann.send(&hub, json!({"type": "accept-speaking", "userId": "ann", "targetUserId": "bob"}));
        assert_eq!(
            bob.drain_calls(),
            vec![json!({"type": "accept-speaking", "fromUserId": "ann"})]
        );

        ann.send(
            &hub,
            json!({"type": "reject-speaking", "userId": "ann", "targetUserId": "bob"}),
        );
        assert_eq!(
            bob.drain_calls(),
            vec![json!({"type": "reject-speaking", "fromUserId": "ann", "blocked": false})]
        );
        assert_eq!(hub.block_count(), 0);

        ann.send(
            &hub,
            json!({"type": "reject-speaking", "userId": "ann", "targetUserId": "bob",
                   "blocked": true}),
        );
        assert_eq!(bob.drain_calls()[0]["blocked"], true);
        assert!(hub.is_blocked(&PeerId::from("ann"), &PeerId::from("bob")));

        bob.send(
            &hub,
            json!({"type": "call-request", "userId": "bob", "targetUserId": "ann",
                   "callType": "audio"}),
        );
        assert_eq!(bob.drain_calls()[0]["reason"], "blocked");
        assert!(ann.drain_calls().is_empty());
    }

    #[test]
    fn test_negotiation_relayed_in_order() {
        let hub = hub();
        let (ann, mut bob) = pair(&hub);

        ann.send(
            &hub,
            json!({"type": "offer", "userId": "ann", "targetUserId": "bob",
                   "offer": {"type": "offer", "sdp": "v=0"}}),
        );
        for i in 0..3 {
            ann.send(
                &hub,
                json!({"type": "ice-candidate", "userId": "ann", "targetUserId": "bob",
                       "candidate": {"candidate": format!("c{}", i)}}),
            );
        }

        let msgs = bob.drain_calls();
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[0]["type"], "offer");
        assert_eq!(msgs[0]["offer"]["sdp"], "v=0");
        assert_eq!(msgs[0]["fromUserId"], "ann");
        for (i, msg) in msgs[1..].iter().enumerate() {
            assert_eq!(msg["type"], "ice-candidate");
            assert_eq!(msg["candidate"]["candidate"], format!("c{}", i));
        }
    }

    #[test]
    fn test_call_ended_to_offline_peer_is_dropped() {
        let hub = hub();
        let (mut ann, bob) = pair(&hub);
        hub.disconnect(bob.handle.conn());
        ann.drain();

        ann.send(&hub, json!({"type": "call-ended", "userId": "ann", "targetUserId": "bob"}));
        assert!(ann.drain().is_empty());
    }

    #[test]
    fn test_offline_target_silent_by_default() {
        let hub = hub();
        let mut ann = TestPeer::new();
        ann.register(&hub, "ann", "Ann");
        ann.drain();

        ann.send(&hub, call_request("video"));
        assert!(ann.drain().is_empty());
    }

    #[test]
    fn test_offline_target_notified_when_enabled() {
        let config = SignalConfig {
            notify_offline: true,
            ..Default::default()
        };
        let hub = SignalHub::new(&config);
        let mut ann = TestPeer::new();
        ann.register(&hub, "ann", "Ann");
        ann.drain();

        ann.send(&hub, call_request("video"));
        assert_eq!(
            ann.drain(),
            vec![json!({"type": "peer-offline", "targetUserId": "bob"})]
        );
    }

    #[test]
    fn test_sender_defaults_to_registered_identity() {
        let hub = hub();
        let (ann, mut bob) = pair(&hub);

        ann.send(&hub, json!({"type": "call-ended", "targetUserId": "bob"}));
        assert_eq!(
            bob.drain_calls(),
            vec![json!({"type": "call-ended", "fromUserId": "ann"})]
        );
    }
}
