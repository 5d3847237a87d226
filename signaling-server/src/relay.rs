use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use callbridge_protocol::{
    CallId, CallType, CallerInfo, ClientMessage, EndReason, ErrorReason, RoomId, ServerMessage,
    UserId,
};

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::invites::{Invite, InviteRegistry};
use crate::presence::PresenceRegistry;
use crate::rooms::{Member, RoomError, RoomRegistry};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identity a connection registered with `join`.
#[derive(Debug, Clone)]
pub struct Joined {
    pub user_id: UserId,
    pub display_label: String,
}

/// Per-connection state, owned by the task reading that connection.
#[derive(Debug)]
pub struct Connection {
    handle: ConnectionHandle,
    joined: Option<Joined>,
}

impl Connection {
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    #[must_use]
    pub const fn joined(&self) -> Option<&Joined> {
        self.joined.as_ref()
    }
}

/// Routes call control and negotiation messages between participants.
///
/// The relay owns no global state: presence, pending invites and rooms are injected
/// and can be shared with other parts of the server (e.g. the status endpoint).
#[derive(Debug, Default, Clone)]
pub struct Relay {
    presence: PresenceRegistry,
    rooms: RoomRegistry,
    invites: InviteRegistry,
}

impl Relay {
    #[must_use]
    pub const fn new(
        presence: PresenceRegistry,
        rooms: RoomRegistry,
        invites: InviteRegistry,
    ) -> Self {
        Self {
            presence,
            rooms,
            invites,
        }
    }

    #[must_use]
    pub const fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    #[must_use]
    pub const fn rooms(&self) -> &RoomRegistry {
        &self.rooms
    }

    #[must_use]
    pub const fn invites(&self) -> &InviteRegistry {
        &self.invites
    }

    /// Allocate a connection and the queue its outbound messages go through.
    #[must_use]
    pub fn open_connection(&self) -> (Connection, mpsc::UnboundedReceiver<ServerMessage>) {
        let id = ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Connection {
            handle: ConnectionHandle::new(id, tx),
            joined: None,
        };
        (connection, rx)
    }

    /// Serve a websocket until the peer goes away.
    pub async fn user_connected(self, ws: WebSocket) {
        let (mut connection, rx) = self.open_connection();
        let connection_id = connection.id();
        info!("new connection: {}", connection_id);

        let (mut user_ws_tx, mut user_ws_rx) = ws.split();
        let mut rx = UnboundedReceiverStream::new(rx);

        tokio::task::spawn(async move {
            while let Some(message) = rx.next().await {
                let text = match serde_json::to_string(&message) {
                    Ok(text) => text,
                    Err(err) => {
                        error!("failed to serialize {:?}: {}", message, err);
                        continue;
                    }
                };
                if let Err(err) = user_ws_tx.send(Message::Text(text)).await {
                    warn!("websocket send error (connection={}): {}", connection_id, err);
                    break;
                }
            }
        });

        while let Some(result) = user_ws_rx.next().await {
            let msg = match result {
                Ok(msg) => msg,
                Err(err) => {
                    warn!("websocket error (connection={}): {}", connection_id, err);
                    break;
                }
            };

            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(request) => self.user_message(&mut connection, request).await,
                    Err(err) => {
                        warn!("dropping malformed message from {}: {}", connection_id, err);
                    }
                },
                Message::Close(_) => break,
                Message::Binary(_) => {
                    warn!("dropping binary frame from {}", connection_id);
                }
                Message::Ping(_) | Message::Pong(_) => {}
            }
        }

        self.user_disconnected(&connection).await;
    }

    /// Apply one client message. Messages violating their preconditions are dropped.
    pub async fn user_message(&self, connection: &mut Connection, request: ClientMessage) {
        debug!("message received from {}: {:?}", connection.id(), request);

        let Some(joined) = connection.joined.clone() else {
            match request {
                ClientMessage::Join {
                    user_id,
                    display_label,
                } => self.join(connection, user_id, display_label).await,
                other => warn!(
                    "connection {} sent {:?} before joining, dropping",
                    connection.id(),
                    other
                ),
            }
            return;
        };

        match request {
            ClientMessage::Join { user_id, .. } => {
                warn!(
                    "connection {} already joined as {}, ignoring join as {}",
                    connection.id(),
                    joined.user_id,
                    user_id
                );
            }
            ClientMessage::InitiateCall {
                target_user_id,
                call_type,
                caller_info,
            } => {
                self.initiate_call(connection, &joined, target_user_id, call_type, caller_info)
                    .await;
            }
            ClientMessage::AcceptCall { caller_id, call_id } => {
                self.accept_call(connection, &joined, &caller_id, call_id)
                    .await;
            }
            ClientMessage::RejectCall { caller_id, call_id } => {
                match self.invites.answer(&call_id, connection.id(), &caller_id).await {
                    Some(invite) => {
                        info!("call rejected: {} by {}", call_id, joined.user_id);
                        invite
                            .caller
                            .connection
                            .send(ServerMessage::CallRejected { call_id });
                    }
                    None => debug!("reject of {} matches no pending invite, dropping", call_id),
                }
            }
            ClientMessage::CancelCall { call_id } => {
                match self.invites.cancel(&call_id, connection.id()).await {
                    Some(invite) => {
                        info!("call cancelled: {} by {}", call_id, joined.user_id);
                        invite
                            .callee
                            .connection
                            .send(ServerMessage::CallCancelled { call_id });
                    }
                    None => debug!("cancel of {} matches no pending invite, dropping", call_id),
                }
            }
            // pass negotiation messages to the other member of the room without changing anything
            ClientMessage::WebrtcOffer { room_id, offer } => {
                self.relay_in_room(connection, &room_id, |from| ServerMessage::WebrtcOffer {
                    room_id: room_id.clone(),
                    offer,
                    from,
                })
                .await;
            }
            ClientMessage::WebrtcAnswer { room_id, answer } => {
                self.relay_in_room(connection, &room_id, |from| ServerMessage::WebrtcAnswer {
                    room_id: room_id.clone(),
                    answer,
                    from,
                })
                .await;
            }
            ClientMessage::WebrtcIceCandidate { room_id, candidate } => {
                self.relay_in_room(connection, &room_id, |from| {
                    ServerMessage::WebrtcIceCandidate {
                        room_id: room_id.clone(),
                        candidate,
                        from,
                    }
                })
                .await;
            }
            ClientMessage::EndCall { room_id, call_id } => {
                self.end_call(connection, &room_id, &call_id).await;
            }
        }
    }

    async fn join(&self, connection: &mut Connection, user_id: UserId, display_label: String) {
        if let Some(replaced) = self
            .presence
            .register(user_id.clone(), connection.handle.clone())
            .await
        {
            info!(
                "{} joined again on connection {}, replacing connection {}",
                user_id,
                connection.id(),
                replaced.id()
            );
        }
        info!("{} ({}) joined on connection {}", display_label, user_id, connection.id());

        connection.handle.send(ServerMessage::Joined {
            user_id: user_id.clone(),
            display_label: display_label.clone(),
        });
        connection.joined = Some(Joined {
            user_id,
            display_label,
        });
    }

    async fn initiate_call(
        &self,
        connection: &Connection,
        joined: &Joined,
        target_user_id: UserId,
        call_type: CallType,
        caller_info: Option<CallerInfo>,
    ) {
        if target_user_id == joined.user_id {
            warn!("{} tried to call itself, dropping", joined.user_id);
            return;
        }

        let unknown_target = |target_user_id: UserId| {
            info!(
                "call from {} to unknown user {}",
                joined.user_id, target_user_id
            );
            connection.handle.send(ServerMessage::Error {
                reason: ErrorReason::UnknownTarget,
                target_user_id: Some(target_user_id),
                call_id: None,
            });
        };

        let Some(callee) = self.presence.lookup(&target_user_id).await else {
            unknown_target(target_user_id);
            return;
        };

        let caller_name = if joined.display_label.is_empty() {
            caller_info
                .map(|info| info.display_label)
                .unwrap_or_else(|| joined.user_id.to_string())
        } else {
            joined.display_label.clone()
        };

        let call_id = generate_call_id();
        let invite = Invite::new(
            call_id.clone(),
            Member::new(joined.user_id.clone(), connection.handle.clone()),
            Member::new(target_user_id.clone(), callee.clone()),
            call_type,
        );
        // the callee may have left between lookup and insert
        if !self.invites.insert(invite).await {
            unknown_target(target_user_id);
            return;
        }

        info!(
            "call initiated: {} -> {} ({}, {})",
            joined.user_id, target_user_id, call_type, call_id
        );
        callee.send(ServerMessage::IncomingCall {
            caller_id: joined.user_id.clone(),
            caller_name,
            call_type,
            call_id,
        });
    }

    async fn accept_call(
        &self,
        connection: &Connection,
        joined: &Joined,
        caller_id: &UserId,
        call_id: CallId,
    ) {
        let Some(invite) = self.invites.answer(&call_id, connection.id(), caller_id).await else {
            debug!("accept of {} matches no pending invite, dropping", call_id);
            return;
        };
        let caller = invite.caller.connection.clone();

        let created = self
            .rooms
            .create(
                call_id.clone(),
                invite.caller,
                Member::new(joined.user_id.clone(), connection.handle.clone()),
            )
            .await;

        match created {
            Ok(room) => {
                info!("call accepted: {}", room.id);
                // notify the caller first, it starts the negotiation
                for member in &room.members {
                    member.connection.send(ServerMessage::CallAccepted {
                        room_id: room.id.clone(),
                        call_id: call_id.clone(),
                    });
                }
            }
            Err(RoomError::DuplicateRoom(room_id)) => {
                warn!("room {} already exists, ignoring second accept", room_id);
            }
            Err(err @ RoomError::ParticipantBusy { .. }) => {
                warn!("cannot accept {}: {}", call_id, err);
                connection.handle.send(ServerMessage::Error {
                    reason: ErrorReason::ParticipantBusy,
                    target_user_id: None,
                    call_id: Some(call_id.clone()),
                });
                caller.send(ServerMessage::CallRejected { call_id });
            }
            Err(err @ RoomError::Disconnected { .. }) => {
                info!("cannot accept {}: {}", call_id, err);
                connection.handle.send(ServerMessage::CallEnded {
                    call_id,
                    reason: EndReason::UserDisconnected,
                });
            }
        }
    }

    async fn relay_in_room(
        &self,
        connection: &Connection,
        room_id: &RoomId,
        message: impl FnOnce(UserId) -> ServerMessage,
    ) {
        let Some(room) = self.rooms.get(room_id).await else {
            debug!("no such room: {}, dropping", room_id);
            return;
        };
        let (Some(sender), Some(recipient)) =
            (room.member(connection.id()), room.other(connection.id()))
        else {
            warn!(
                "connection {} is not a member of room {}, dropping",
                connection.id(),
                room_id
            );
            return;
        };

        if !recipient
            .connection
            .send(message(sender.user_id.clone()))
        {
            debug!("recipient {} of room {} already gone", recipient.user_id, room_id);
        }
    }

    async fn end_call(&self, connection: &Connection, room_id: &RoomId, call_id: &CallId) {
        match self.rooms.get(room_id).await {
            Some(room) if room.involves(connection.id()) => {}
            Some(_) => {
                warn!(
                    "connection {} tried to end foreign room {}, dropping",
                    connection.id(),
                    room_id
                );
                return;
            }
            None => {
                debug!("end-call for missing room {} ({})", room_id, call_id);
                return;
            }
        }

        // the other member may be ending the same room concurrently, only the winner notifies
        if let Some(room) = self.rooms.destroy(room_id).await {
            info!("call ended: {}", room.id);
            for member in &room.members {
                member.connection.send(ServerMessage::CallEnded {
                    call_id: room.id.clone(),
                    reason: EndReason::Hangup,
                });
            }
        }
    }

    /// Forget the connection, withdraw its pending invites and end every call it was part of.
    pub async fn user_disconnected(&self, connection: &Connection) {
        info!("connection closed: {}", connection.id());
        // refuse new rooms and invites before cleaning up, an accept in flight
        // either lands in a room found below or fails to create one
        connection.handle.close();

        if let Some(user_id) = self.presence.unregister(connection.id()).await {
            info!("{} left", user_id);
        }

        for invite in self.invites.remove_all_involving(connection.id()).await {
            info!("invite {} withdrawn by disconnect", invite.call_id);
            if invite.caller.connection.id() == connection.id() {
                invite.callee.connection.send(ServerMessage::CallCancelled {
                    call_id: invite.call_id,
                });
            } else {
                invite.caller.connection.send(ServerMessage::CallRejected {
                    call_id: invite.call_id,
                });
            }
        }

        for room in self.rooms.destroy_all_involving(connection.id()).await {
            info!("call {} ended by disconnect", room.id);
            if let Some(remaining) = room.other(connection.id()) {
                remaining.connection.send(ServerMessage::CallEnded {
                    call_id: room.id.clone(),
                    reason: EndReason::UserDisconnected,
                });
            }
        }
    }
}

/// `call_<unix millis>_<random suffix>`, unique and opaque to clients.
fn generate_call_id() -> CallId {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or_default();
    CallId::new(format!("call_{}_{}", millis, Uuid::new_v4().simple()))
}

#[cfg(test)]
mod test {
    use callbridge_protocol::Payload;
    use serde_json::json;

    use super::*;

    struct Peer {
        connection: Connection,
        rx: mpsc::UnboundedReceiver<ServerMessage>,
    }

    impl Peer {
        fn next(&mut self) -> ServerMessage {
            self.rx.try_recv().expect("expected a message")
        }

        fn assert_silent(&mut self) {
            assert!(self.rx.try_recv().is_err(), "expected no message");
        }
    }

    async fn joined_peer(relay: &Relay, name: &str) -> Peer {
        let (mut connection, mut rx) = relay.open_connection();
        relay
            .user_message(
                &mut connection,
                ClientMessage::Join {
                    user_id: UserId::from(name),
                    display_label: name.to_uppercase(),
                },
            )
            .await;
        assert!(matches!(rx.try_recv(), Ok(ServerMessage::Joined { .. })));
        Peer { connection, rx }
    }

    async fn ring(relay: &Relay, caller: &mut Peer, callee: &mut Peer) -> CallId {
        let target_user_id = callee.connection.joined().unwrap().user_id.clone();
        relay
            .user_message(
                &mut caller.connection,
                ClientMessage::InitiateCall {
                    target_user_id,
                    call_type: CallType::Voice,
                    caller_info: None,
                },
            )
            .await;
        let ringing = match caller.next() {
            ServerMessage::CallRinging { call_id, .. } => call_id,
            other => panic!("expected call-ringing, got {other:?}"),
        };
        match callee.next() {
            ServerMessage::IncomingCall { call_id, .. } => {
                assert_eq!(call_id, ringing);
                call_id
            }
            other => panic!("expected incoming-call, got {other:?}"),
        }
    }

    fn offer() -> Payload {
        Payload::new(json!({ "type": "offer", "sdp": "v=0" }))
    }

    async fn bridge(relay: &Relay, caller: &mut Peer, callee: &mut Peer) -> CallId {
        let call_id = ring(relay, caller, callee).await;
        let caller_id = caller.connection.joined().unwrap().user_id.clone();
        relay
            .user_message(
                &mut callee.connection,
                ClientMessage::AcceptCall {
                    caller_id,
                    call_id: call_id.clone(),
                },
            )
            .await;
        assert!(matches!(caller.next(), ServerMessage::CallAccepted { .. }));
        assert!(matches!(callee.next(), ServerMessage::CallAccepted { .. }));
        call_id
    }

    #[tokio::test]
    async fn messages_before_join_are_dropped() {
        let relay = Relay::default();
        let mut bob = joined_peer(&relay, "bob").await;
        let (mut anonymous, mut rx) = relay.open_connection();

        relay
            .user_message(
                &mut anonymous,
                ClientMessage::InitiateCall {
                    target_user_id: UserId::from("bob"),
                    call_type: CallType::Video,
                    caller_info: None,
                },
            )
            .await;

        bob.assert_silent();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn second_join_on_same_connection_is_ignored() {
        let relay = Relay::default();
        let mut alice = joined_peer(&relay, "alice").await;

        relay
            .user_message(
                &mut alice.connection,
                ClientMessage::Join {
                    user_id: UserId::from("mallory"),
                    display_label: "Mallory".to_owned(),
                },
            )
            .await;

        alice.assert_silent();
        assert!(relay.presence().lookup(&UserId::from("mallory")).await.is_none());
        assert_eq!(
            alice.connection.joined().map(|j| j.user_id.as_str()),
            Some("alice")
        );
    }

    #[tokio::test]
    async fn invite_carries_joined_identity() {
        let relay = Relay::default();
        let mut alice = joined_peer(&relay, "alice").await;
        let mut bob = joined_peer(&relay, "bob").await;

        relay
            .user_message(
                &mut alice.connection,
                ClientMessage::InitiateCall {
                    target_user_id: UserId::from("bob"),
                    call_type: CallType::Screen,
                    caller_info: Some(CallerInfo {
                        user_id: UserId::from("somebody-else"),
                        display_label: "Impostor".to_owned(),
                    }),
                },
            )
            .await;

        match bob.next() {
            ServerMessage::IncomingCall {
                caller_id,
                caller_name,
                call_type,
                call_id,
            } => {
                assert_eq!(caller_id.as_str(), "alice");
                assert_eq!(caller_name, "ALICE");
                assert_eq!(call_type, CallType::Screen);
                assert!(call_id.as_str().starts_with("call_"));
            }
            other => panic!("expected incoming-call, got {other:?}"),
        }
        assert!(matches!(
            alice.next(),
            ServerMessage::CallRinging { target_user_id, .. } if target_user_id.as_str() == "bob"
        ));
        alice.assert_silent();
        assert!(relay.rooms().is_empty().await);
        assert_eq!(relay.invites().len().await, 1);
    }

    #[test]
    fn generated_call_ids_are_unique() {
        assert_ne!(generate_call_id(), generate_call_id());
    }

    #[tokio::test]
    async fn offer_from_non_member_is_dropped() {
        let relay = Relay::default();
        let mut alice = joined_peer(&relay, "alice").await;
        let mut bob = joined_peer(&relay, "bob").await;
        let mut eve = joined_peer(&relay, "eve").await;
        let call_id = bridge(&relay, &mut alice, &mut bob).await;

        relay
            .user_message(
                &mut eve.connection,
                ClientMessage::WebrtcOffer {
                    room_id: call_id,
                    offer: offer(),
                },
            )
            .await;

        alice.assert_silent();
        bob.assert_silent();
        eve.assert_silent();
    }

    #[tokio::test]
    async fn candidates_reach_only_the_other_member() {
        let relay = Relay::default();
        let mut alice = joined_peer(&relay, "alice").await;
        let mut bob = joined_peer(&relay, "bob").await;
        let call_id = bridge(&relay, &mut alice, &mut bob).await;
        let candidate = Payload::new(json!({
            "candidate": "candidate:0 1 udp 1 192.0.2.1 4000 typ host",
            "sdpMid": "0",
            "sdpMLineIndex": 0,
            "usernameFragment": "x9Fq"
        }));

        relay
            .user_message(
                &mut bob.connection,
                ClientMessage::WebrtcIceCandidate {
                    room_id: call_id.clone(),
                    candidate: candidate.clone(),
                },
            )
            .await;

        assert_eq!(
            alice.next(),
            ServerMessage::WebrtcIceCandidate {
                room_id: call_id,
                candidate,
                from: UserId::from("bob"),
            }
        );
        bob.assert_silent();
    }

    #[tokio::test]
    async fn signaling_after_teardown_is_dropped() {
        let relay = Relay::default();
        let mut alice = joined_peer(&relay, "alice").await;
        let mut bob = joined_peer(&relay, "bob").await;
        let call_id = bridge(&relay, &mut alice, &mut bob).await;

        relay
            .user_message(
                &mut alice.connection,
                ClientMessage::EndCall {
                    room_id: call_id.clone(),
                    call_id: call_id.clone(),
                },
            )
            .await;
        assert!(matches!(alice.next(), ServerMessage::CallEnded { .. }));
        assert!(matches!(bob.next(), ServerMessage::CallEnded { .. }));

        relay
            .user_message(
                &mut bob.connection,
                ClientMessage::WebrtcAnswer {
                    room_id: call_id.clone(),
                    answer: Payload::new(json!({ "type": "answer", "sdp": "v=0" })),
                },
            )
            .await;
        relay
            .user_message(
                &mut bob.connection,
                ClientMessage::EndCall {
                    room_id: call_id.clone(),
                    call_id,
                },
            )
            .await;
        alice.assert_silent();
        bob.assert_silent();
    }

    #[tokio::test]
    async fn second_accept_of_same_call_is_a_no_op() {
        let relay = Relay::default();
        let mut alice = joined_peer(&relay, "alice").await;
        let mut bob = joined_peer(&relay, "bob").await;
        let call_id = bridge(&relay, &mut alice, &mut bob).await;

        relay
            .user_message(
                &mut bob.connection,
                ClientMessage::AcceptCall {
                    caller_id: UserId::from("alice"),
                    call_id,
                },
            )
            .await;

        alice.assert_silent();
        bob.assert_silent();
        assert_eq!(relay.rooms().len().await, 1);
    }

    #[tokio::test]
    async fn accepting_while_busy_rejects_the_new_call() {
        let relay = Relay::default();
        let mut alice = joined_peer(&relay, "alice").await;
        let mut bob = joined_peer(&relay, "bob").await;
        let mut carol = joined_peer(&relay, "carol").await;
        bridge(&relay, &mut alice, &mut bob).await;

        let second_call = ring(&relay, &mut carol, &mut bob).await;
        relay
            .user_message(
                &mut bob.connection,
                ClientMessage::AcceptCall {
                    caller_id: UserId::from("carol"),
                    call_id: second_call.clone(),
                },
            )
            .await;

        assert_eq!(
            bob.next(),
            ServerMessage::Error {
                reason: ErrorReason::ParticipantBusy,
                target_user_id: None,
                call_id: Some(second_call.clone()),
            }
        );
        assert_eq!(
            carol.next(),
            ServerMessage::CallRejected {
                call_id: second_call
            }
        );
        alice.assert_silent();
        assert_eq!(relay.rooms().len().await, 1);
    }

    #[tokio::test]
    async fn reject_notifies_only_the_caller() {
        let relay = Relay::default();
        let mut alice = joined_peer(&relay, "alice").await;
        let mut bob = joined_peer(&relay, "bob").await;
        let call_id = ring(&relay, &mut alice, &mut bob).await;

        relay
            .user_message(
                &mut bob.connection,
                ClientMessage::RejectCall {
                    caller_id: UserId::from("alice"),
                    call_id: call_id.clone(),
                },
            )
            .await;

        assert_eq!(alice.next(), ServerMessage::CallRejected { call_id });
        bob.assert_silent();
        assert!(relay.rooms().is_empty().await);
        assert!(relay.invites().is_empty().await);
    }

    #[tokio::test]
    async fn answers_without_pending_invite_are_dropped() {
        let relay = Relay::default();
        let mut alice = joined_peer(&relay, "alice").await;
        let mut bob = joined_peer(&relay, "bob").await;
        let mut carol = joined_peer(&relay, "carol").await;

        relay
            .user_message(
                &mut bob.connection,
                ClientMessage::AcceptCall {
                    caller_id: UserId::from("alice"),
                    call_id: CallId::from("call_made_up"),
                },
            )
            .await;
        alice.assert_silent();
        bob.assert_silent();

        // carol was not invited, her answers must not touch alice's invite
        let call_id = ring(&relay, &mut alice, &mut bob).await;
        relay
            .user_message(
                &mut carol.connection,
                ClientMessage::AcceptCall {
                    caller_id: UserId::from("alice"),
                    call_id: call_id.clone(),
                },
            )
            .await;
        relay
            .user_message(
                &mut carol.connection,
                ClientMessage::RejectCall {
                    caller_id: UserId::from("alice"),
                    call_id: call_id.clone(),
                },
            )
            .await;
        alice.assert_silent();
        carol.assert_silent();
        assert!(relay.rooms().is_empty().await);

        relay
            .user_message(
                &mut bob.connection,
                ClientMessage::AcceptCall {
                    caller_id: UserId::from("alice"),
                    call_id,
                },
            )
            .await;
        assert!(matches!(alice.next(), ServerMessage::CallAccepted { .. }));
        assert_eq!(relay.rooms().len().await, 1);
    }

    #[tokio::test]
    async fn cancelled_invite_cannot_be_accepted() {
        let relay = Relay::default();
        let mut alice = joined_peer(&relay, "alice").await;
        let mut bob = joined_peer(&relay, "bob").await;
        let call_id = ring(&relay, &mut alice, &mut bob).await;

        relay
            .user_message(
                &mut bob.connection,
                ClientMessage::CancelCall {
                    call_id: call_id.clone(),
                },
            )
            .await;
        bob.assert_silent();
        assert_eq!(relay.invites().len().await, 1);

        relay
            .user_message(
                &mut alice.connection,
                ClientMessage::CancelCall {
                    call_id: call_id.clone(),
                },
            )
            .await;
        assert_eq!(
            bob.next(),
            ServerMessage::CallCancelled {
                call_id: call_id.clone()
            }
        );

        relay
            .user_message(
                &mut bob.connection,
                ClientMessage::AcceptCall {
                    caller_id: UserId::from("alice"),
                    call_id,
                },
            )
            .await;
        alice.assert_silent();
        bob.assert_silent();
        assert!(relay.rooms().is_empty().await);
    }

    #[tokio::test]
    async fn disconnect_withdraws_pending_invites() {
        let relay = Relay::default();
        let mut alice = joined_peer(&relay, "alice").await;
        let mut bob = joined_peer(&relay, "bob").await;
        let mut carol = joined_peer(&relay, "carol").await;
        let outgoing = ring(&relay, &mut bob, &mut carol).await;
        let incoming = ring(&relay, &mut alice, &mut bob).await;

        relay.user_disconnected(&bob.connection).await;

        assert_eq!(alice.next(), ServerMessage::CallRejected { call_id: incoming });
        assert_eq!(
            carol.next(),
            ServerMessage::CallCancelled { call_id: outgoing }
        );
        assert!(relay.invites().is_empty().await);
    }

    #[tokio::test]
    async fn accept_racing_caller_disconnect_leaves_no_room() {
        let relay = Relay::default();
        let mut alice = joined_peer(&relay, "alice").await;
        let mut bob = joined_peer(&relay, "bob").await;
        let call_id = ring(&relay, &mut alice, &mut bob).await;

        // alice's connection is going away while bob's accept is being applied
        alice.connection.handle.close();
        relay
            .user_message(
                &mut bob.connection,
                ClientMessage::AcceptCall {
                    caller_id: UserId::from("alice"),
                    call_id: call_id.clone(),
                },
            )
            .await;
        relay.user_disconnected(&alice.connection).await;

        assert_eq!(
            bob.next(),
            ServerMessage::CallEnded {
                call_id,
                reason: EndReason::UserDisconnected,
            }
        );
        bob.assert_silent();
        alice.assert_silent();
        assert!(relay.rooms().is_empty().await);
        assert!(relay.invites().is_empty().await);
    }

    #[tokio::test]
    async fn disconnect_ends_call_for_remaining_member() {
        let relay = Relay::default();
        let mut alice = joined_peer(&relay, "alice").await;
        let mut bob = joined_peer(&relay, "bob").await;
        let call_id = bridge(&relay, &mut alice, &mut bob).await;

        relay.user_disconnected(&bob.connection).await;

        assert_eq!(
            alice.next(),
            ServerMessage::CallEnded {
                call_id: call_id.clone(),
                reason: EndReason::UserDisconnected,
            }
        );
        assert!(relay.rooms().get(&call_id).await.is_none());
        assert!(relay.presence().lookup(&UserId::from("bob")).await.is_none());
        assert!(relay.presence().lookup(&UserId::from("alice")).await.is_some());
    }
}
