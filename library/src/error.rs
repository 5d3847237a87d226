use callbridge_protocol::UserId;

use crate::call::CallPhase;
use crate::media::MediaSource;
use crate::transport::ConnectionState;

/// Failure to capture local media.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    #[error("permission to capture the {0} was denied")]
    PermissionDenied(MediaSource),
    #[error("no {0} available")]
    NotFound(MediaSource),
    #[error("capture failed: {0}")]
    Other(String),
}

/// Failure of the peer-to-peer negotiation session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NegotiationError {
    #[error("failed to create negotiation session: {0}")]
    Session(String),
    #[error("failed to attach local track: {0}")]
    AttachTrack(String),
    #[error("failed to create offer: {0}")]
    CreateOffer(String),
    #[error("failed to create answer: {0}")]
    CreateAnswer(String),
    #[error("failed to apply remote description: {0}")]
    RemoteDescription(String),
    #[error("failed to add ICE candidate: {0}")]
    IceCandidate(String),
    #[error("failed to replace outgoing track: {0}")]
    ReplaceTrack(String),
    #[error("peer connection is {0}")]
    ConnectionLost(ConnectionState),
    #[error("malformed negotiation payload: {0}")]
    Payload(String),
}

impl From<serde_json::Error> for NegotiationError {
    fn from(err: serde_json::Error) -> Self {
        Self::Payload(err.to_string())
    }
}

/// Failure of the websocket link to the signaling relay.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("failed to connect to the signaling server: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connection to the signaling server is closed")]
    Closed,
}

/// Everything that can go wrong with a call.
///
/// Every error that ends a call is also published in
/// [`CallSnapshot::last_error`](crate::CallSnapshot::last_error).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallError {
    #[error("cannot {operation} while {phase}")]
    InvalidState {
        operation: &'static str,
        phase: CallPhase,
    },
    #[error("cannot call yourself")]
    CallingSelf,
    #[error("media acquisition failed: {0}")]
    MediaAcquisition(#[from] CaptureError),
    #[error("negotiation failed: {0}")]
    Negotiation(#[from] NegotiationError),
    #[error("connection to the signaling server was lost")]
    TransportDisconnect,
    #[error("user {0} is not connected")]
    UnknownTarget(UserId),
    #[error("participant is already in another call")]
    ParticipantBusy,
    #[error("call timed out while {phase}")]
    Timeout { phase: CallPhase },
    #[error("call has no outgoing video sender")]
    NoVideoSender,
    #[error("call controller is not running")]
    ControllerClosed,
}

impl From<SignalError> for CallError {
    fn from(_: SignalError) -> Self {
        Self::TransportDisconnect
    }
}

pub type Result<T, E = CallError> = std::result::Result<T, E>;
