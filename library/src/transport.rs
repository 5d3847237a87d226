use std::fmt::{Display, Formatter};

use async_trait::async_trait;
use callbridge_protocol::{ClientMessage, IceCandidate, SessionDescription};
use tokio::sync::mpsc;

use crate::error::{NegotiationError, SignalError};
use crate::events::{CallEvent, EventSink};
use crate::media::{LocalTrack, TrackKind};

/// Handle of an outgoing track slot in a negotiation session.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SenderId(u64);

impl SenderId {
    #[must_use]
    pub const fn new(inner: u64) -> Self {
        Self(inner)
    }

    #[must_use]
    pub const fn into_inner(self) -> u64 {
        self.0
    }
}

/// State of the peer-to-peer connection, as reported by the media library.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::New => "new",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Something happened inside a negotiation session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LocalCandidate(IceCandidate),
    RemoteTrack { kind: TrackKind },
    ConnectionStateChanged(ConnectionState),
}

/// Where a session reports its [`SessionEvent`]s.
///
/// Events are tagged with the call they belong to, so a session outliving its call
/// cannot affect the next one.
#[derive(Debug, Clone)]
pub struct SessionEvents {
    generation: u64,
    sink: EventSink,
}

impl SessionEvents {
    #[must_use]
    pub const fn new(generation: u64, sink: EventSink) -> Self {
        Self { generation, sink }
    }

    /// Returns `false` if the controller is gone.
    pub fn emit(&self, event: SessionEvent) -> bool {
        self.sink.emit(CallEvent::Session {
            generation: self.generation,
            event,
        })
    }
}

/// One peer-to-peer negotiation, e.g. an `RTCPeerConnection`.
#[async_trait]
pub trait NegotiationSession: Send {
    async fn attach_local_track(&mut self, track: &LocalTrack)
        -> Result<SenderId, NegotiationError>;

    /// Create an offer and apply it as the local description.
    async fn create_offer(&mut self) -> Result<SessionDescription, NegotiationError>;

    /// Create an answer and apply it as the local description.
    async fn create_answer(&mut self) -> Result<SessionDescription, NegotiationError>;

    async fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError>;

    async fn add_ice_candidate(&mut self, candidate: IceCandidate)
        -> Result<(), NegotiationError>;

    /// Swap the track sent through `sender` without renegotiating. `None` sends nothing.
    async fn replace_track(
        &mut self,
        sender: SenderId,
        track: Option<&LocalTrack>,
    ) -> Result<(), NegotiationError>;

    async fn close(&mut self);
}

/// Factory of negotiation sessions.
#[async_trait]
pub trait MediaTransport: Send {
    type Session: NegotiationSession;

    async fn create_session(
        &mut self,
        events: SessionEvents,
    ) -> Result<Self::Session, NegotiationError>;
}

/// Outbound half of the signaling link.
pub trait SignalSink: Send {
    fn send(&mut self, message: ClientMessage) -> Result<(), SignalError>;
}

impl SignalSink for mpsc::UnboundedSender<ClientMessage> {
    fn send(&mut self, message: ClientMessage) -> Result<(), SignalError> {
        mpsc::UnboundedSender::send(self, message).map_err(|_closed| SignalError::Closed)
    }
}
