use callbridge_protocol::{CallType, ServerMessage, UserId};
use tokio::sync::{mpsc, oneshot};

use crate::error::Result;
use crate::media::TrackId;
use crate::transport::SessionEvent;

/// Input of the call state machine. User commands, relay messages, media library
/// callbacks and timers all arrive as one of these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    StartCall { target: UserId, call_type: CallType },
    Answer,
    Reject,
    End,
    ToggleMute,
    ToggleVideo,
    StartScreenShare,
    Signal(ServerMessage),
    Session { generation: u64, event: SessionEvent },
    CaptureEnded { track: TrackId },
    Timeout { seq: u64 },
    RelayDisconnected,
    Shutdown,
}

/// Event plus an optional channel for its outcome.
#[derive(Debug)]
pub struct Envelope {
    pub event: CallEvent,
    pub reply: Option<oneshot::Sender<Result<()>>>,
}

/// Cloneable entry point into the call controller's queue.
#[derive(Debug, Clone)]
pub struct EventSink(mpsc::UnboundedSender<Envelope>);

impl EventSink {
    #[must_use]
    pub const fn new(tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self(tx)
    }

    /// Queue an event nobody waits on. Returns `false` if the controller is gone.
    pub fn emit(&self, event: CallEvent) -> bool {
        self.send(Envelope { event, reply: None })
    }

    pub fn send(&self, envelope: Envelope) -> bool {
        self.0.send(envelope).is_ok()
    }
}
