/*!
Call state machine of one participant.

```text
Idle -> Dialing -> Negotiating -> Active -> Ending -> Idle     (outgoing)
Idle -> Ringing -> Negotiating -> Active -> Ending -> Idle     (incoming)
```

Every non-idle state can fall into `Error` when the link to the signaling server is lost.
Local media is only held from the moment the call is accepted until it returns to `Idle`,
and every way back to `Idle` releases it.

`start_call` only checks that the required devices exist. The caller captures when
`call-accepted` arrives and the callee when it answers, so a denied or failed capture
surfaces there: the call is ended and the error is published as `last_error`.

The caller learns the id of its call from `call-ringing`, sent by the relay before the callee
can answer. Replies naming any other call id belong to an abandoned dial and are ignored.
A dial abandoned before its `call-ringing` arrived is cancelled as soon as the id shows up.
*/

use std::collections::VecDeque;
use std::fmt::{Display, Formatter};
use std::time::Duration;

use callbridge_protocol::{
    CallId, CallType, CallerInfo, ClientMessage, EndReason, ErrorReason, IceCandidate, Payload,
    RoomId, ServerMessage, SessionDescription, UserId,
};
use log::{debug, info, warn};

use crate::error::{CallError, NegotiationError, Result};
use crate::events::{CallEvent, EventSink};
use crate::media::{LocalMedia, LocalTrack, MediaDevices, MediaSource, TrackId, TrackKind};
use crate::transport::{
    ConnectionState, MediaTransport, NegotiationSession, SenderId, SessionEvent, SessionEvents,
    SignalSink,
};

/// Who this client is on the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: UserId,
    pub display_label: String,
}

impl Identity {
    #[must_use]
    pub fn new(user_id: impl Into<UserId>, display_label: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_label: display_label.into(),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CallConfig {
    /// How long an unanswered invite rings before it is rejected.
    pub ring_timeout: Duration,
    /// How long the caller waits for the callee to pick up.
    pub dial_timeout: Duration,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            ring_timeout: Duration::from_secs(30),
            dial_timeout: Duration::from_secs(45),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum CallPhase {
    #[default]
    Idle,
    Dialing,
    Ringing,
    Negotiating,
    Active,
    Ending,
    Error,
}

impl Display for CallPhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Dialing => "dialing",
            Self::Ringing => "ringing",
            Self::Negotiating => "negotiating",
            Self::Active => "active",
            Self::Ending => "ending",
            Self::Error => "in error",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
}

/// Published view of the call, for user interfaces.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CallSnapshot {
    pub phase: CallPhase,
    /// `join` was acknowledged by the relay
    pub registered: bool,
    pub peer: Option<UserId>,
    pub peer_name: Option<String>,
    pub call_type: Option<CallType>,
    pub call_id: Option<CallId>,
    pub direction: Option<Direction>,
    pub muted: bool,
    pub video_enabled: bool,
    pub screen_sharing: bool,
    pub last_error: Option<CallError>,
}

struct Call<S> {
    peer: UserId,
    peer_name: Option<String>,
    call_type: CallType,
    direction: Direction,
    // the caller learns the id only with `call-ringing`
    call_id: Option<CallId>,
    room_ready: bool,
    media: LocalMedia,
    session: Option<S>,
    video_sender: Option<SenderId>,
    screen_share: Option<LocalTrack>,
    remote_description_set: bool,
    pending_candidates: Vec<IceCandidate>,
}

impl<S> Call<S> {
    fn outgoing(peer: UserId, call_type: CallType) -> Self {
        Self::new(peer, None, call_type, Direction::Outgoing, None)
    }

    fn incoming(peer: UserId, peer_name: String, call_type: CallType, call_id: CallId) -> Self {
        Self::new(
            peer,
            Some(peer_name),
            call_type,
            Direction::Incoming,
            Some(call_id),
        )
    }

    fn new(
        peer: UserId,
        peer_name: Option<String>,
        call_type: CallType,
        direction: Direction,
        call_id: Option<CallId>,
    ) -> Self {
        Self {
            peer,
            peer_name,
            call_type,
            direction,
            call_id,
            room_ready: false,
            media: LocalMedia::default(),
            session: None,
            video_sender: None,
            screen_share: None,
            remote_description_set: false,
            pending_candidates: Vec::new(),
        }
    }

    fn is(&self, call_id: &CallId) -> bool {
        self.call_id.as_ref() == Some(call_id)
    }

    fn end_message(&self) -> Option<ClientMessage> {
        self.call_id.clone().map(|call_id| ClientMessage::EndCall {
            room_id: call_id.clone(),
            call_id,
        })
    }

    fn cancel_message(&self) -> Option<ClientMessage> {
        self.call_id
            .clone()
            .map(|call_id| ClientMessage::CancelCall { call_id })
    }

    fn reject_message(&self) -> Option<ClientMessage> {
        self.call_id.clone().map(|call_id| ClientMessage::RejectCall {
            caller_id: self.peer.clone(),
            call_id,
        })
    }

    fn outgoing_video(&self) -> Option<&LocalTrack> {
        self.screen_share
            .as_ref()
            .or_else(|| self.media.first_of(TrackKind::Video))
    }
}

/// Drives one participant's side of a call.
///
/// All inputs go through [`CallMachine::handle`], one at a time.
pub struct CallMachine<D, T: MediaTransport, S> {
    identity: Identity,
    config: CallConfig,
    devices: D,
    transport: T,
    signals: S,
    events: EventSink,
    phase: CallPhase,
    registered: bool,
    call: Option<Call<T::Session>>,
    // bumped whenever a call begins or ends, session events of other generations are stale
    generation: u64,
    // targets of invites given up before their `call-ringing` arrived, oldest first
    abandoned_dials: VecDeque<UserId>,
    timer_seq: u64,
    last_error: Option<CallError>,
}

impl<D, T, S> CallMachine<D, T, S>
where
    D: MediaDevices,
    T: MediaTransport,
    S: SignalSink,
{
    pub fn new(
        identity: Identity,
        config: CallConfig,
        devices: D,
        transport: T,
        signals: S,
        events: EventSink,
    ) -> Self {
        Self {
            identity,
            config,
            devices,
            transport,
            signals,
            events,
            phase: CallPhase::Idle,
            registered: false,
            call: None,
            generation: 0,
            abandoned_dials: VecDeque::new(),
            timer_seq: 0,
            last_error: None,
        }
    }

    pub const fn identity(&self) -> &Identity {
        &self.identity
    }

    pub const fn phase(&self) -> CallPhase {
        self.phase
    }

    pub fn snapshot(&self) -> CallSnapshot {
        let call = self.call.as_ref();
        CallSnapshot {
            phase: self.phase,
            registered: self.registered,
            peer: call.map(|call| call.peer.clone()),
            peer_name: call.and_then(|call| call.peer_name.clone()),
            call_type: call.map(|call| call.call_type),
            call_id: call.and_then(|call| call.call_id.clone()),
            direction: call.map(|call| call.direction),
            muted: call
                .and_then(|call| call.media.first_of(TrackKind::Audio))
                .is_some_and(|track| !track.enabled),
            video_enabled: call
                .and_then(Call::outgoing_video)
                .is_some_and(|track| track.enabled),
            screen_sharing: call.is_some_and(|call| call.screen_share.is_some()),
            last_error: self.last_error.clone(),
        }
    }

    /// Apply one event. Any error is also kept as the snapshot's `last_error`.
    pub async fn handle(&mut self, event: CallEvent) -> Result<()> {
        let result = match event {
            CallEvent::StartCall { target, call_type } => self.start_call(target, call_type).await,
            CallEvent::Answer => self.answer_call().await,
            CallEvent::Reject => self.reject_call().await,
            CallEvent::End | CallEvent::Shutdown => self.end_call().await,
            CallEvent::ToggleMute => {
                self.toggle(TrackKind::Audio);
                Ok(())
            }
            CallEvent::ToggleVideo => {
                self.toggle(TrackKind::Video);
                Ok(())
            }
            CallEvent::StartScreenShare => self.start_screen_share().await,
            CallEvent::Signal(message) => self.on_signal(message).await,
            CallEvent::Session { generation, event } => {
                if generation == self.generation {
                    self.on_session_event(event).await
                } else {
                    debug!("ignoring stale session event {:?}", event);
                    Ok(())
                }
            }
            CallEvent::CaptureEnded { track } => {
                self.on_capture_ended(&track).await;
                Ok(())
            }
            CallEvent::Timeout { seq } => self.on_timeout(seq).await,
            CallEvent::RelayDisconnected => self.on_relay_disconnected().await,
        };

        if let Err(err) = &result {
            warn!("{}", err);
            self.last_error = Some(err.clone());
        }
        result
    }

    async fn start_call(&mut self, target: UserId, call_type: CallType) -> Result<()> {
        self.expect_phase(CallPhase::Idle, "start a call")?;
        if target == self.identity.user_id {
            return Err(CallError::CallingSelf);
        }
        for &source in MediaSource::for_call(call_type) {
            self.devices.check_available(source).await?;
        }

        self.signals.send(ClientMessage::InitiateCall {
            target_user_id: target.clone(),
            call_type,
            caller_info: Some(CallerInfo {
                user_id: self.identity.user_id.clone(),
                display_label: self.identity.display_label.clone(),
            }),
        })?;
        info!("calling {} ({})", target, call_type);

        self.begin(Call::outgoing(target, call_type));
        self.enter(CallPhase::Dialing);
        self.arm_timer(self.config.dial_timeout);
        Ok(())
    }

    fn on_incoming_invite(
        &mut self,
        caller_id: UserId,
        caller_name: String,
        call_type: CallType,
        call_id: CallId,
    ) {
        if self.phase != CallPhase::Idle {
            info!(
                "rejecting call {} from {}, already {}",
                call_id, caller_id, self.phase
            );
            self.send_or_warn(ClientMessage::RejectCall { caller_id, call_id });
            return;
        }

        info!(
            "incoming {} call {} from {} ({})",
            call_type, call_id, caller_name, caller_id
        );
        self.begin(Call::incoming(caller_id, caller_name, call_type, call_id));
        self.enter(CallPhase::Ringing);
        self.arm_timer(self.config.ring_timeout);
    }

    async fn answer_call(&mut self) -> Result<()> {
        self.expect_phase(CallPhase::Ringing, "answer")?;
        let call_type = self
            .call
            .as_ref()
            .map(|call| call.call_type)
            .ok_or_else(|| self.invalid("answer"))?;

        let media = match LocalMedia::acquire(&mut self.devices, call_type, &self.events).await {
            Ok(media) => media,
            Err(err) => return self.abort(err).await,
        };

        let mut accept = None;
        if let Some(call) = self.call.as_mut() {
            call.media = media;
            accept = call.call_id.clone().map(|call_id| ClientMessage::AcceptCall {
                caller_id: call.peer.clone(),
                call_id,
            });
        }
        if let Some(accept) = accept {
            if let Err(err) = self.signals.send(accept) {
                return self.abort(err).await;
            }
        }

        self.enter(CallPhase::Negotiating);
        // the relay confirms with `call-accepted`, give up if it never does
        self.arm_timer(self.config.ring_timeout);
        Ok(())
    }

    async fn reject_call(&mut self) -> Result<()> {
        self.expect_phase(CallPhase::Ringing, "reject")?;
        let farewell = self.farewell();
        self.teardown(farewell).await;
        Ok(())
    }

    /// Hang up. Safe to call in any state.
    async fn end_call(&mut self) -> Result<()> {
        match self.phase {
            CallPhase::Idle | CallPhase::Ending => {}
            CallPhase::Error => self.enter(CallPhase::Idle),
            CallPhase::Dialing
            | CallPhase::Ringing
            | CallPhase::Negotiating
            | CallPhase::Active => {
                let farewell = self.farewell();
                self.teardown(farewell).await;
            }
        }
        Ok(())
    }

    async fn on_signal(&mut self, message: ServerMessage) -> Result<()> {
        match message {
            ServerMessage::Joined {
                user_id,
                display_label,
            } => {
                info!("joined as {} ({})", display_label, user_id);
                self.registered = true;
                Ok(())
            }
            ServerMessage::IncomingCall {
                caller_id,
                caller_name,
                call_type,
                call_id,
            } => {
                self.on_incoming_invite(caller_id, caller_name, call_type, call_id);
                Ok(())
            }
            ServerMessage::CallRinging {
                call_id,
                target_user_id,
            } => {
                self.on_call_ringing(call_id, &target_user_id);
                Ok(())
            }
            ServerMessage::CallAccepted { room_id, call_id } => {
                self.on_call_accepted(room_id, call_id).await
            }
            ServerMessage::CallRejected { call_id } => {
                if self.call.as_ref().is_some_and(|call| call.is(&call_id)) {
                    info!("call {} was rejected", call_id);
                    self.teardown(None).await;
                } else {
                    debug!("ignoring rejection of unknown call {}", call_id);
                }
                Ok(())
            }
            ServerMessage::CallCancelled { call_id } => {
                let ours = self.call.as_ref().is_some_and(|call| {
                    call.direction == Direction::Incoming && call.is(&call_id) && !call.room_ready
                });
                if ours {
                    info!("call {} was cancelled by the caller", call_id);
                    self.teardown(None).await;
                } else {
                    debug!("ignoring cancellation of unknown call {}", call_id);
                }
                Ok(())
            }
            ServerMessage::WebrtcOffer {
                room_id,
                offer,
                from,
            } => self.on_remote_offer(room_id, offer, &from).await,
            ServerMessage::WebrtcAnswer {
                room_id,
                answer,
                from,
            } => self.on_remote_answer(room_id, answer, &from).await,
            ServerMessage::WebrtcIceCandidate {
                room_id,
                candidate,
                from,
            } => {
                self.on_remote_candidate(&room_id, candidate, &from).await;
                Ok(())
            }
            ServerMessage::CallEnded { call_id, reason } => {
                if self.call.as_ref().is_some_and(|call| call.is(&call_id)) {
                    match reason {
                        EndReason::Hangup => info!("call {} ended", call_id),
                        EndReason::UserDisconnected => {
                            info!("call {} ended, peer disconnected", call_id);
                        }
                    }
                    self.teardown(None).await;
                } else {
                    debug!("ignoring end of unknown call {}", call_id);
                }
                Ok(())
            }
            ServerMessage::Error {
                reason,
                target_user_id,
                call_id,
            } => self.on_relay_error(reason, target_user_id, call_id).await,
        }
    }

    /// Every `initiate-call` gets exactly one `call-ringing` or `unknown-target` reply, in order.
    fn on_call_ringing(&mut self, call_id: CallId, target: &UserId) {
        if let Some(abandoned) = self.abandoned_dials.pop_front() {
            info!("cancelling call {} to {}, dial was abandoned", call_id, abandoned);
            self.send_or_warn(ClientMessage::CancelCall { call_id });
            return;
        }

        match (self.phase, self.call.as_mut()) {
            (CallPhase::Dialing, Some(call)) if call.call_id.is_none() && &call.peer == target => {
                info!("ringing {} (call {})", target, call_id);
                call.call_id = Some(call_id);
            }
            (phase, _) => {
                info!("cancelling unexpected call {} to {} while {}", call_id, target, phase);
                self.send_or_warn(ClientMessage::CancelCall { call_id });
            }
        }
    }

    async fn on_call_accepted(&mut self, room_id: RoomId, call_id: CallId) -> Result<()> {
        match (self.phase, self.call.as_mut()) {
            (CallPhase::Dialing, Some(call)) if call.is(&call_id) => {
                info!("call {} accepted by {}", call_id, call.peer);
                call.room_ready = true;
                self.disarm_timer();
                match self.start_negotiation().await {
                    Ok(()) => Ok(()),
                    Err(err) => self.abort(err).await,
                }
            }
            (CallPhase::Negotiating | CallPhase::Active, Some(call)) if call.is(&call_id) => {
                call.room_ready = true;
                self.disarm_timer();
                Ok(())
            }
            (phase, _) => {
                // nobody on this side is waiting for it, make the relay drop the room
                info!("ending call {} accepted while {}", call_id, phase);
                self.send_or_warn(ClientMessage::EndCall { room_id, call_id });
                Ok(())
            }
        }
    }

    /// Caller side: capture media, open a session and send the offer.
    async fn start_negotiation(&mut self) -> Result<()> {
        let Some(call) = self.call.as_mut() else {
            return Ok(());
        };
        call.media = LocalMedia::acquire(&mut self.devices, call.call_type, &self.events).await?;

        let events = SessionEvents::new(self.generation, self.events.clone());
        let (session, video_sender) =
            Self::open_session(&mut self.transport, events, &call.media).await?;
        call.video_sender = video_sender;
        let offer = call.session.insert(session).create_offer().await?;
        let offer = Payload::encode(&offer).map_err(NegotiationError::from)?;

        if let Some(room_id) = call.call_id.clone() {
            self.signals
                .send(ClientMessage::WebrtcOffer { room_id, offer })?;
        }
        self.enter(CallPhase::Negotiating);
        Ok(())
    }

    async fn open_session(
        transport: &mut T,
        events: SessionEvents,
        media: &LocalMedia,
    ) -> Result<(T::Session, Option<SenderId>), NegotiationError> {
        let mut session = transport.create_session(events).await?;
        let mut video_sender = None;
        for track in media.tracks() {
            match session.attach_local_track(track).await {
                Ok(sender) if track.kind() == TrackKind::Video => video_sender = Some(sender),
                Ok(_) => {}
                Err(err) => {
                    session.close().await;
                    return Err(err);
                }
            }
        }
        Ok((session, video_sender))
    }

    async fn on_remote_offer(
        &mut self,
        room_id: RoomId,
        offer: Payload,
        from: &UserId,
    ) -> Result<()> {
        let expected = self.phase == CallPhase::Negotiating
            && self
                .call
                .as_ref()
                .is_some_and(|call| call.direction == Direction::Incoming && call.is(&room_id));
        if !expected {
            warn!(
                "dropping offer for {} from {} while {}",
                room_id, from, self.phase
            );
            return Ok(());
        }

        let answered = match offer.decode::<SessionDescription>() {
            Ok(offer) => self.answer_offer(room_id, offer).await,
            Err(err) => Err(NegotiationError::from(err).into()),
        };
        match answered {
            Ok(()) => Ok(()),
            Err(err) => self.abort(err).await,
        }
    }

    /// Callee side: open a session, apply the offer and send the answer.
    async fn answer_offer(&mut self, room_id: RoomId, offer: SessionDescription) -> Result<()> {
        let Some(call) = self.call.as_mut() else {
            return Ok(());
        };
        if call.session.is_none() {
            let events = SessionEvents::new(self.generation, self.events.clone());
            let (session, video_sender) =
                Self::open_session(&mut self.transport, events, &call.media).await?;
            call.session = Some(session);
            call.video_sender = video_sender;
        }
        let Some(session) = call.session.as_mut() else {
            return Ok(());
        };

        session.set_remote_description(offer).await?;
        call.remote_description_set = true;
        let pending = std::mem::take(&mut call.pending_candidates);
        add_candidates(session, pending).await;

        let answer = session.create_answer().await?;
        let answer = Payload::encode(&answer).map_err(NegotiationError::from)?;
        self.signals
            .send(ClientMessage::WebrtcAnswer { room_id, answer })?;
        Ok(())
    }

    async fn on_remote_answer(
        &mut self,
        room_id: RoomId,
        answer: Payload,
        from: &UserId,
    ) -> Result<()> {
        let Some(call) = self.call.as_mut().filter(|call| {
            call.direction == Direction::Outgoing && call.is(&room_id) && call.session.is_some()
        }) else {
            warn!(
                "dropping answer for {} from {} while {}",
                room_id, from, self.phase
            );
            return Ok(());
        };
        let Some(session) = call.session.as_mut() else {
            return Ok(());
        };

        let applied = match answer.decode::<SessionDescription>() {
            Ok(answer) => session.set_remote_description(answer).await,
            Err(err) => Err(err.into()),
        };
        if let Err(err) = applied {
            return self.abort(err).await;
        }
        call.remote_description_set = true;
        let pending = std::mem::take(&mut call.pending_candidates);
        add_candidates(session, pending).await;
        Ok(())
    }

    async fn on_remote_candidate(&mut self, room_id: &RoomId, candidate: Payload, from: &UserId) {
        let Some(call) = self.call.as_mut().filter(|call| call.is(room_id)) else {
            debug!("dropping candidate for {} from {}", room_id, from);
            return;
        };
        let candidate = match candidate.decode::<IceCandidate>() {
            Ok(candidate) => candidate,
            Err(err) => {
                warn!("dropping malformed candidate from {}: {}", from, err);
                return;
            }
        };

        if call.remote_description_set {
            if let Some(session) = call.session.as_mut() {
                add_candidates(session, vec![candidate]).await;
                return;
            }
        }
        debug!("buffering candidate from {} until the remote description is set", from);
        call.pending_candidates.push(candidate);
    }

    async fn on_session_event(&mut self, event: SessionEvent) -> Result<()> {
        match event {
            SessionEvent::LocalCandidate(candidate) => {
                let room_id = self
                    .call
                    .as_ref()
                    .filter(|call| call.room_ready)
                    .and_then(|call| call.call_id.clone());
                if let Some(room_id) = room_id {
                    match Payload::encode(&candidate) {
                        Ok(candidate) => {
                            self.send_or_warn(ClientMessage::WebrtcIceCandidate { room_id, candidate });
                        }
                        Err(err) => warn!("dropping local candidate: {}", err),
                    }
                }
                Ok(())
            }
            SessionEvent::RemoteTrack { kind } => {
                if self.phase == CallPhase::Negotiating {
                    info!("received first remote {:?} track, call is active", kind);
                    self.disarm_timer();
                    self.enter(CallPhase::Active);
                } else {
                    debug!("received remote {:?} track while {}", kind, self.phase);
                }
                Ok(())
            }
            SessionEvent::ConnectionStateChanged(state) => match state {
                ConnectionState::Failed | ConnectionState::Disconnected
                    if matches!(self.phase, CallPhase::Negotiating | CallPhase::Active) =>
                {
                    self.abort(NegotiationError::ConnectionLost(state)).await
                }
                _ => {
                    debug!("peer connection {}", state);
                    Ok(())
                }
            },
        }
    }

    async fn on_relay_error(
        &mut self,
        reason: ErrorReason,
        target_user_id: Option<UserId>,
        call_id: Option<CallId>,
    ) -> Result<()> {
        match reason {
            ErrorReason::UnknownTarget => {
                // answers the oldest invite still waiting for a reply
                if let Some(abandoned) = self.abandoned_dials.pop_front() {
                    debug!("abandoned dial to {} found nobody", abandoned);
                    return Ok(());
                }
                let dialed = target_user_id.filter(|target| {
                    self.phase == CallPhase::Dialing
                        && self
                            .call
                            .as_ref()
                            .is_some_and(|call| call.call_id.is_none() && &call.peer == target)
                });
                if let Some(target) = dialed {
                    self.teardown(None).await;
                    return Err(CallError::UnknownTarget(target));
                }
            }
            ErrorReason::ParticipantBusy => {
                let ours = self.phase == CallPhase::Negotiating
                    && self
                        .call
                        .as_ref()
                        .zip(call_id.as_ref())
                        .is_some_and(|(call, rejected)| call.is(rejected));
                if ours {
                    // the room was never created, nothing to end
                    self.teardown(None).await;
                    return Err(CallError::ParticipantBusy);
                }
            }
        }
        warn!("ignoring relay error {:?} while {}", reason, self.phase);
        Ok(())
    }

    fn toggle(&mut self, kind: TrackKind) {
        let Some(call) = self.call.as_mut() else {
            debug!("no call, nothing to toggle");
            return;
        };
        let track = match kind {
            TrackKind::Audio => call.media.first_of_mut(TrackKind::Audio),
            TrackKind::Video => match call.screen_share.as_mut() {
                Some(share) => Some(share),
                None => call.media.first_of_mut(TrackKind::Video),
            },
        };
        let Some(track) = track else {
            debug!("no local {:?} track to toggle", kind);
            return;
        };

        track.enabled = !track.enabled;
        self.devices.set_enabled(&track.id, track.enabled);
        info!(
            "{} {}",
            track.source,
            if track.enabled { "enabled" } else { "disabled" }
        );
    }

    async fn start_screen_share(&mut self) -> Result<()> {
        let phase = self.phase;
        let call = self
            .call
            .as_mut()
            .filter(|_| matches!(phase, CallPhase::Negotiating | CallPhase::Active))
            .ok_or(CallError::InvalidState {
                operation: "share the screen",
                phase,
            })?;
        if call.screen_share.is_some() {
            return Ok(());
        }
        let (Some(session), Some(sender)) = (call.session.as_mut(), call.video_sender) else {
            return Err(CallError::NoVideoSender);
        };

        let track = self
            .devices
            .acquire(MediaSource::Display, self.events.clone())
            .await?;
        if let Err(err) = session.replace_track(sender, Some(&track)).await {
            self.devices.stop(&track.id);
            return Err(err.into());
        }
        info!("sharing screen");
        call.screen_share = Some(track);
        Ok(())
    }

    async fn on_capture_ended(&mut self, track_id: &TrackId) {
        let Some(call) = self.call.as_mut() else {
            debug!("capture {} ended after the call", track_id);
            return;
        };

        let restore = if call
            .screen_share
            .as_ref()
            .is_some_and(|share| &share.id == track_id)
        {
            if let Some(share) = call.screen_share.take() {
                self.devices.stop(&share.id);
            }
            info!("screen share ended");
            call.media.first_of(TrackKind::Video)
        } else if let Some(track) = call.media.remove(track_id) {
            self.devices.stop(&track.id);
            warn!("{} capture ended", track.source);
            if track.kind() == TrackKind::Audio || call.screen_share.is_some() {
                return;
            }
            None
        } else {
            debug!("capture of unknown track {} ended", track_id);
            return;
        };

        if let (Some(session), Some(sender)) = (call.session.as_mut(), call.video_sender) {
            if let Err(err) = session.replace_track(sender, restore).await {
                warn!("failed to switch outgoing video: {}", err);
            }
        }
    }

    async fn on_timeout(&mut self, seq: u64) -> Result<()> {
        if seq != self.timer_seq {
            debug!("ignoring stale timer {}", seq);
            return Ok(());
        }
        let phase = self.phase;
        let expired = match phase {
            CallPhase::Dialing | CallPhase::Ringing => true,
            CallPhase::Negotiating => self
                .call
                .as_ref()
                .is_some_and(|call| call.direction == Direction::Incoming && !call.room_ready),
            CallPhase::Idle | CallPhase::Active | CallPhase::Ending | CallPhase::Error => false,
        };
        if !expired {
            return Ok(());
        }
        self.abort(CallError::Timeout { phase }).await
    }

    async fn on_relay_disconnected(&mut self) -> Result<()> {
        self.registered = false;
        // the relay forgot every invite of the old connection
        self.abandoned_dials.clear();
        if !matches!(self.phase, CallPhase::Idle | CallPhase::Error) {
            self.disarm_timer();
            self.release().await;
            self.enter(CallPhase::Error);
        }
        Err(CallError::TransportDisconnect)
    }

    /// Tear the call down after a failure and report it.
    async fn abort(&mut self, err: impl Into<CallError>) -> Result<()> {
        let err = err.into();
        let farewell = self.farewell();
        self.teardown(farewell).await;
        Err(err)
    }

    /// Message telling the peer this side is gone, if it is waiting for one.
    fn farewell(&mut self) -> Option<ClientMessage> {
        let call = self.call.as_ref()?;
        match self.phase {
            CallPhase::Ringing => call.reject_message(),
            CallPhase::Dialing if call.room_ready => call.end_message(),
            CallPhase::Dialing => {
                let cancel = call.cancel_message();
                if cancel.is_none() {
                    self.abandoned_dials.push_back(call.peer.clone());
                }
                cancel
            }
            CallPhase::Negotiating | CallPhase::Active => call.end_message(),
            CallPhase::Idle | CallPhase::Ending | CallPhase::Error => None,
        }
    }

    async fn teardown(&mut self, farewell: Option<ClientMessage>) {
        self.enter(CallPhase::Ending);
        self.disarm_timer();
        if let Some(message) = farewell {
            self.send_or_warn(message);
        }
        self.release().await;
        self.enter(CallPhase::Idle);
    }

    /// Stop every local track and close the session.
    async fn release(&mut self) {
        self.generation += 1;
        let Some(mut call) = self.call.take() else {
            return;
        };
        call.media.release(&mut self.devices);
        if let Some(share) = call.screen_share.take() {
            self.devices.stop(&share.id);
        }
        if let Some(mut session) = call.session.take() {
            session.close().await;
        }
        debug!("released call with {}", call.peer);
    }

    fn begin(&mut self, call: Call<T::Session>) {
        self.generation += 1;
        self.last_error = None;
        self.call = Some(call);
    }

    fn enter(&mut self, phase: CallPhase) {
        if self.phase != phase {
            debug!("{} -> {}", self.phase, phase);
            self.phase = phase;
        }
    }

    fn expect_phase(&self, expected: CallPhase, operation: &'static str) -> Result<()> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(self.invalid(operation))
        }
    }

    const fn invalid(&self, operation: &'static str) -> CallError {
        CallError::InvalidState {
            operation,
            phase: self.phase,
        }
    }

    fn send_or_warn(&mut self, message: ClientMessage) {
        if let Err(err) = self.signals.send(message) {
            warn!("failed to send signal: {}", err);
        }
    }

    fn arm_timer(&mut self, after: Duration) {
        self.timer_seq += 1;
        let seq = self.timer_seq;
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            events.emit(CallEvent::Timeout { seq });
        });
    }

    fn disarm_timer(&mut self) {
        self.timer_seq += 1;
    }
}

async fn add_candidates<N>(session: &mut N, candidates: Vec<IceCandidate>)
where
    N: NegotiationSession + ?Sized,
{
    for candidate in candidates {
        if let Err(err) = session.add_ice_candidate(candidate).await {
            warn!("ignoring remote candidate: {}", err);
        }
    }
}
