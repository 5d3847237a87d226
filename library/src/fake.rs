/*!
In-memory media devices and negotiation sessions.

Both fakes are cheap to clone and every clone observes the same state, so a test can keep
one clone for assertions while the call machine owns the other.
*/

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use callbridge_protocol::{IceCandidate, SdpType, SessionDescription};

use crate::error::{CaptureError, NegotiationError};
use crate::events::{CallEvent, EventSink};
use crate::media::{LocalTrack, MediaDevices, MediaSource, TrackId};
use crate::transport::{MediaTransport, NegotiationSession, SenderId, SessionEvent, SessionEvents};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct DevicesState {
    next_track: u64,
    failures: HashMap<MediaSource, CaptureError>,
    held: Vec<(LocalTrack, EventSink)>,
}

/// Capture devices that hand out numbered tracks.
#[derive(Debug, Clone, Default)]
pub struct FakeDevices {
    state: Arc<Mutex<DevicesState>>,
}

impl FakeDevices {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The device exists but capturing from it is refused.
    pub fn deny(&self, source: MediaSource) {
        lock(&self.state)
            .failures
            .insert(source, CaptureError::PermissionDenied(source));
    }

    /// The device does not exist at all.
    pub fn remove(&self, source: MediaSource) {
        lock(&self.state)
            .failures
            .insert(source, CaptureError::NotFound(source));
    }

    /// Tracks currently capturing.
    #[must_use]
    pub fn held(&self) -> Vec<LocalTrack> {
        lock(&self.state)
            .held
            .iter()
            .map(|(track, _)| track.clone())
            .collect()
    }

    /// Simulate the device ending the capture on its own. Returns `false` for unknown tracks.
    pub fn end_capture(&self, track: &TrackId) -> bool {
        let ended = {
            let mut state = lock(&self.state);
            let index = state.held.iter().position(|(held, _)| &held.id == track);
            index.map(|index| state.held.remove(index))
        };
        match ended {
            Some((track, events)) => events.emit(CallEvent::CaptureEnded { track: track.id }),
            None => false,
        }
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn check_available(&mut self, source: MediaSource) -> Result<(), CaptureError> {
        match lock(&self.state).failures.get(&source) {
            Some(CaptureError::NotFound(_)) => Err(CaptureError::NotFound(source)),
            _ => Ok(()),
        }
    }

    async fn acquire(
        &mut self,
        source: MediaSource,
        events: EventSink,
    ) -> Result<LocalTrack, CaptureError> {
        let mut state = lock(&self.state);
        if let Some(err) = state.failures.get(&source) {
            return Err(err.clone());
        }
        state.next_track += 1;
        let track = LocalTrack {
            id: TrackId::new(format!("{source}-{}", state.next_track)),
            source,
            enabled: true,
        };
        state.held.push((track.clone(), events));
        Ok(track)
    }

    fn set_enabled(&mut self, track: &TrackId, enabled: bool) {
        let mut state = lock(&self.state);
        if let Some((held, _)) = state.held.iter_mut().find(|(held, _)| &held.id == track) {
            held.enabled = enabled;
        }
    }

    fn stop(&mut self, track: &TrackId) {
        lock(&self.state).held.retain(|(held, _)| &held.id != track);
    }
}

/// Operation performed on a [`FakeSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOp {
    AttachTrack(TrackId),
    CreateOffer,
    CreateAnswer,
    SetRemoteDescription(SdpType),
    AddIceCandidate(String),
    ReplaceTrack(SenderId, Option<TrackId>),
    Close,
}

/// Operation a [`FakeTransport`] can be told to fail.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FailPoint {
    CreateSession,
    CreateOffer,
    CreateAnswer,
    SetRemoteDescription,
}

#[derive(Debug)]
struct SessionRecord {
    ops: Vec<SessionOp>,
    events: SessionEvents,
}

#[derive(Debug, Default)]
struct TransportState {
    sessions: Vec<SessionRecord>,
    fail_at: Option<FailPoint>,
}

/// Transport whose sessions only record what was done to them.
#[derive(Debug, Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<TransportState>>,
}

impl FakeTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_at(&self, point: FailPoint) {
        lock(&self.state).fail_at = Some(point);
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        lock(&self.state).sessions.len()
    }

    /// Operations on the `index`-th session created, in order.
    #[must_use]
    pub fn ops(&self, index: usize) -> Vec<SessionOp> {
        lock(&self.state)
            .sessions
            .get(index)
            .map(|session| session.ops.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn last_ops(&self) -> Vec<SessionOp> {
        lock(&self.state)
            .sessions
            .last()
            .map(|session| session.ops.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_closed(&self, index: usize) -> bool {
        self.ops(index).contains(&SessionOp::Close)
    }

    /// Report `event` from the most recent session, as the media library would.
    pub fn emit(&self, event: SessionEvent) -> bool {
        let index = self.session_count().saturating_sub(1);
        self.emit_to(index, event)
    }

    pub fn emit_to(&self, index: usize, event: SessionEvent) -> bool {
        let events = lock(&self.state)
            .sessions
            .get(index)
            .map(|session| session.events.clone());
        events.is_some_and(|events| events.emit(event))
    }
}

#[async_trait]
impl MediaTransport for FakeTransport {
    type Session = FakeSession;

    async fn create_session(
        &mut self,
        events: SessionEvents,
    ) -> Result<Self::Session, NegotiationError> {
        let mut state = lock(&self.state);
        if state.fail_at == Some(FailPoint::CreateSession) {
            return Err(NegotiationError::Session("injected failure".to_owned()));
        }
        state.sessions.push(SessionRecord {
            ops: Vec::new(),
            events,
        });
        Ok(FakeSession {
            index: state.sessions.len() - 1,
            state: Arc::clone(&self.state),
            next_sender: 0,
            remote_description_set: false,
        })
    }
}

/// Session created by [`FakeTransport`].
#[derive(Debug)]
pub struct FakeSession {
    index: usize,
    state: Arc<Mutex<TransportState>>,
    next_sender: u64,
    remote_description_set: bool,
}

impl FakeSession {
    fn record(&self, op: SessionOp) -> Option<FailPoint> {
        let mut state = lock(&self.state);
        if let Some(session) = state.sessions.get_mut(self.index) {
            session.ops.push(op);
        }
        state.fail_at
    }
}

#[async_trait]
impl NegotiationSession for FakeSession {
    async fn attach_local_track(
        &mut self,
        track: &LocalTrack,
    ) -> Result<SenderId, NegotiationError> {
        self.record(SessionOp::AttachTrack(track.id.clone()));
        self.next_sender += 1;
        Ok(SenderId::new(self.next_sender))
    }

    async fn create_offer(&mut self) -> Result<SessionDescription, NegotiationError> {
        if self.record(SessionOp::CreateOffer) == Some(FailPoint::CreateOffer) {
            return Err(NegotiationError::CreateOffer("injected failure".to_owned()));
        }
        Ok(SessionDescription::offer(format!(
            "v=0 fake offer {}",
            self.index
        )))
    }

    async fn create_answer(&mut self) -> Result<SessionDescription, NegotiationError> {
        if self.record(SessionOp::CreateAnswer) == Some(FailPoint::CreateAnswer) {
            return Err(NegotiationError::CreateAnswer("injected failure".to_owned()));
        }
        Ok(SessionDescription::answer(format!(
            "v=0 fake answer {}",
            self.index
        )))
    }

    async fn set_remote_description(
        &mut self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        let fail_at = self.record(SessionOp::SetRemoteDescription(description.sdp_type));
        if fail_at == Some(FailPoint::SetRemoteDescription) {
            return Err(NegotiationError::RemoteDescription(
                "injected failure".to_owned(),
            ));
        }
        self.remote_description_set = true;
        Ok(())
    }

    async fn add_ice_candidate(&mut self, candidate: IceCandidate) -> Result<(), NegotiationError> {
        if !self.remote_description_set {
            return Err(NegotiationError::IceCandidate(
                "no remote description".to_owned(),
            ));
        }
        self.record(SessionOp::AddIceCandidate(candidate.candidate));
        Ok(())
    }

    async fn replace_track(
        &mut self,
        sender: SenderId,
        track: Option<&LocalTrack>,
    ) -> Result<(), NegotiationError> {
        self.record(SessionOp::ReplaceTrack(
            sender,
            track.map(|track| track.id.clone()),
        ));
        Ok(())
    }

    async fn close(&mut self) {
        self.record(SessionOp::Close);
    }
}
