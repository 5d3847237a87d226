mod common;

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use callbridge_protocol::{
    CallId, CallType, ClientMessage, EndReason, ErrorReason, Payload, ServerMessage, UserId,
};
use common::{start_server, TestClient};

async fn invite(caller: &mut TestClient, callee: &mut TestClient, target: &str) -> CallId {
    caller
        .send(&ClientMessage::InitiateCall {
            target_user_id: UserId::from(target),
            call_type: CallType::Video,
            caller_info: None,
        })
        .await;
    let ringing = match caller.recv().await {
        ServerMessage::CallRinging { call_id, .. } => call_id,
        other => panic!("expected call-ringing, got {other:?}"),
    };
    match callee.recv().await {
        ServerMessage::IncomingCall { call_id, .. } => {
            assert_eq!(call_id, ringing);
            call_id
        }
        other => panic!("expected incoming-call, got {other:?}"),
    }
}

async fn accept(
    callee: &mut TestClient,
    caller: &mut TestClient,
    caller_id: &str,
    call_id: &CallId,
) {
    callee
        .send(&ClientMessage::AcceptCall {
            caller_id: UserId::from(caller_id),
            call_id: call_id.clone(),
        })
        .await;
    assert!(matches!(caller.recv().await, ServerMessage::CallAccepted { .. }));
    assert!(matches!(callee.recv().await, ServerMessage::CallAccepted { .. }));
}

#[tokio::test]
async fn invite_to_unknown_user_reports_error() {
    let (address, state) = start_server().await;
    let mut alice = TestClient::joined(address, "alice").await;

    alice
        .send(&ClientMessage::InitiateCall {
            target_user_id: UserId::from("ghost"),
            call_type: CallType::Voice,
            caller_info: None,
        })
        .await;

    assert_eq!(
        alice.recv().await,
        ServerMessage::Error {
            reason: ErrorReason::UnknownTarget,
            target_user_id: Some(UserId::from("ghost")),
            call_id: None,
        }
    );
    assert!(state.relay().rooms().is_empty().await);
}

#[tokio::test]
async fn accepted_call_relays_negotiation_and_ends_on_hangup() {
    let (address, state) = start_server().await;
    let mut alice = TestClient::joined(address, "alice").await;
    let mut bob = TestClient::joined(address, "bob").await;

    alice
        .send(&ClientMessage::InitiateCall {
            target_user_id: UserId::from("bob"),
            call_type: CallType::Video,
            caller_info: None,
        })
        .await;
    let call_id = match bob.recv().await {
        ServerMessage::IncomingCall {
            caller_id,
            caller_name,
            call_type,
            call_id,
        } => {
            assert_eq!(caller_id, UserId::from("alice"));
            assert_eq!(caller_name, "ALICE");
            assert_eq!(call_type, CallType::Video);
            call_id
        }
        other => panic!("expected incoming-call, got {other:?}"),
    };
    assert_eq!(
        alice.recv().await,
        ServerMessage::CallRinging {
            call_id: call_id.clone(),
            target_user_id: UserId::from("bob"),
        }
    );
    alice.assert_silent().await;

    bob.send(&ClientMessage::AcceptCall {
        caller_id: UserId::from("alice"),
        call_id: call_id.clone(),
    })
    .await;
    let accepted = ServerMessage::CallAccepted {
        room_id: call_id.clone(),
        call_id: call_id.clone(),
    };
    assert_eq!(alice.recv().await, accepted);
    assert_eq!(bob.recv().await, accepted);
    assert_eq!(state.relay().rooms().len().await, 1);

    let offer = Payload::new(json!({ "type": "offer", "sdp": "v=0 offer" }));
    alice
        .send(&ClientMessage::WebrtcOffer {
            room_id: call_id.clone(),
            offer: offer.clone(),
        })
        .await;
    assert_eq!(
        bob.recv().await,
        ServerMessage::WebrtcOffer {
            room_id: call_id.clone(),
            offer,
            from: UserId::from("alice"),
        }
    );

    let answer = Payload::new(json!({ "type": "answer", "sdp": "v=0 answer" }));
    bob.send(&ClientMessage::WebrtcAnswer {
        room_id: call_id.clone(),
        answer: answer.clone(),
    })
    .await;
    assert_eq!(
        alice.recv().await,
        ServerMessage::WebrtcAnswer {
            room_id: call_id.clone(),
            answer,
            from: UserId::from("bob"),
        }
    );

    let candidate = Payload::new(json!({
        "candidate": "candidate:1 1 udp 2122260223 192.0.2.10 54321 typ host",
        "sdpMid": "0",
        "sdpMLineIndex": 0
    }));
    alice
        .send(&ClientMessage::WebrtcIceCandidate {
            room_id: call_id.clone(),
            candidate: candidate.clone(),
        })
        .await;
    assert_eq!(
        bob.recv().await,
        ServerMessage::WebrtcIceCandidate {
            room_id: call_id.clone(),
            candidate,
            from: UserId::from("alice"),
        }
    );

    alice
        .send(&ClientMessage::EndCall {
            room_id: call_id.clone(),
            call_id: call_id.clone(),
        })
        .await;
    let ended = ServerMessage::CallEnded {
        call_id: call_id.clone(),
        reason: EndReason::Hangup,
    };
    assert_eq!(alice.recv().await, ended);
    assert_eq!(bob.recv().await, ended);
    assert!(state.relay().rooms().get(&call_id).await.is_none());
}

#[tokio::test]
async fn rejected_invite_creates_no_room() {
    let (address, state) = start_server().await;
    let mut alice = TestClient::joined(address, "alice").await;
    let mut bob = TestClient::joined(address, "bob").await;

    let call_id = invite(&mut alice, &mut bob, "bob").await;
    bob.send(&ClientMessage::RejectCall {
        caller_id: UserId::from("alice"),
        call_id: call_id.clone(),
    })
    .await;

    assert_eq!(alice.recv().await, ServerMessage::CallRejected { call_id });
    bob.assert_silent().await;
    assert!(state.relay().rooms().is_empty().await);
}

#[tokio::test]
async fn disconnect_mid_call_notifies_the_other_member() {
    let (address, state) = start_server().await;
    let mut alice = TestClient::joined(address, "alice").await;
    let mut bob = TestClient::joined(address, "bob").await;

    let call_id = invite(&mut alice, &mut bob, "bob").await;
    accept(&mut bob, &mut alice, "alice", &call_id).await;

    bob.close().await;

    assert_eq!(
        alice.recv().await,
        ServerMessage::CallEnded {
            call_id: call_id.clone(),
            reason: EndReason::UserDisconnected,
        }
    );
    assert!(state.relay().rooms().get(&call_id).await.is_none());
    assert!(state
        .relay()
        .presence()
        .lookup(&UserId::from("bob"))
        .await
        .is_none());
}

#[tokio::test]
async fn negotiation_payloads_pass_through_verbatim() {
    let (address, _state) = start_server().await;
    let mut alice = TestClient::joined(address, "alice").await;
    let mut bob = TestClient::joined(address, "bob").await;
    let call_id = invite(&mut alice, &mut bob, "bob").await;
    accept(&mut bob, &mut alice, "alice", &call_id).await;

    let candidate = json!({
        "candidate": "candidate:1 1 udp 2122260223 192.0.2.10 54321 typ host",
        "sdpMid": "0",
        "sdpMLineIndex": 70000,
        "usernameFragment": "x9Fq"
    });
    alice
        .send_raw(
            &json!({
                "event": "webrtc-ice-candidate",
                "data": { "roomId": call_id.as_str(), "candidate": candidate }
            })
            .to_string(),
        )
        .await;
    let relayed = bob.recv_raw().await;
    assert_eq!(relayed["event"], "webrtc-ice-candidate");
    assert_eq!(relayed["data"]["candidate"], candidate);

    let offer = json!({ "type": "restart", "sdp": "v=0", "x-vendor": [1, 2] });
    alice
        .send_raw(
            &json!({
                "event": "webrtc-offer",
                "data": { "roomId": call_id.as_str(), "offer": offer }
            })
            .to_string(),
        )
        .await;
    let relayed = bob.recv_raw().await;
    assert_eq!(relayed["data"]["offer"], offer);
    assert_eq!(relayed["data"]["from"], "alice");
}

#[tokio::test]
async fn caller_leaving_cancels_the_invite() {
    let (address, state) = start_server().await;
    let mut alice = TestClient::joined(address, "alice").await;
    let mut bob = TestClient::joined(address, "bob").await;
    let call_id = invite(&mut alice, &mut bob, "bob").await;
    assert_eq!(state.relay().invites().len().await, 1);

    alice.close().await;

    assert_eq!(
        bob.recv().await,
        ServerMessage::CallCancelled {
            call_id: call_id.clone()
        }
    );
    assert!(state.relay().invites().is_empty().await);

    bob.send(&ClientMessage::AcceptCall {
        caller_id: UserId::from("alice"),
        call_id,
    })
    .await;
    bob.assert_silent().await;
    assert!(state.relay().rooms().is_empty().await);
}

#[tokio::test]
async fn malformed_messages_do_not_close_the_connection() {
    let (address, _state) = start_server().await;
    let mut alice = TestClient::connect(address).await;

    alice.send_raw("this is not json").await;
    alice.send_raw(r#"{"event":"no-such-event","data":{}}"#).await;
    alice.assert_silent().await;

    alice
        .send(&ClientMessage::Join {
            user_id: UserId::from("alice"),
            display_label: "Alice".to_owned(),
        })
        .await;
    assert!(matches!(alice.recv().await, ServerMessage::Joined { .. }));
}

#[tokio::test]
async fn invite_reaches_the_latest_connection_of_a_user() {
    let (address, _state) = start_server().await;
    let mut bob_old = TestClient::joined(address, "bob").await;
    let mut bob_new = TestClient::joined(address, "bob").await;
    let mut alice = TestClient::joined(address, "alice").await;

    invite(&mut alice, &mut bob_new, "bob").await;
    bob_old.assert_silent().await;
}

#[tokio::test]
async fn health_reports_live_counts() {
    let (address, _state) = start_server().await;
    let _alice = TestClient::joined(address, "alice").await;
    let _bob = TestClient::joined(address, "bob").await;

    let mut stream = TcpStream::connect(address).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200"), "{response}");
    let (_, body) = response.split_once("\r\n\r\n").unwrap();
    let health: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["participants"], 2);
    assert_eq!(health["rooms"], 0);
    assert_eq!(health["pendingInvites"], 0);
    assert_eq!(health["version"], env!("CARGO_PKG_VERSION"));
    assert!(health["uptimeSecs"].is_u64());
}
