use std::fmt::{Display, Formatter};

use async_trait::async_trait;
use callbridge_protocol::CallType;
use log::debug;

use crate::error::CaptureError;
use crate::events::EventSink;

/// Identifier of a captured local track, unique per device implementation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackId(String);

impl TrackId {
    #[must_use]
    pub const fn new(inner: String) -> Self {
        Self(inner)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TrackId {
    fn from(inner: &str) -> Self {
        Self(inner.to_owned())
    }
}

impl Display for TrackId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Audio,
    Video,
}

/// Local capture device.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum MediaSource {
    Microphone,
    Camera,
    Display,
}

impl MediaSource {
    #[must_use]
    pub const fn kind(self) -> TrackKind {
        match self {
            Self::Microphone => TrackKind::Audio,
            Self::Camera | Self::Display => TrackKind::Video,
        }
    }

    /// Devices a call of `call_type` captures from.
    #[must_use]
    pub const fn for_call(call_type: CallType) -> &'static [Self] {
        match call_type {
            CallType::Voice => &[Self::Microphone],
            CallType::Video => &[Self::Microphone, Self::Camera],
            CallType::Screen => &[Self::Microphone, Self::Display],
        }
    }
}

impl Display for MediaSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Microphone => "microphone",
            Self::Camera => "camera",
            Self::Display => "display",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTrack {
    pub id: TrackId,
    pub source: MediaSource,
    pub enabled: bool,
}

impl LocalTrack {
    #[must_use]
    pub const fn kind(&self) -> TrackKind {
        self.source.kind()
    }
}

/// Access to local capture devices.
///
/// A device that stops capturing on its own (user revoked access, shared window closed)
/// reports it by emitting [`CallEvent::CaptureEnded`](crate::CallEvent::CaptureEnded)
/// on the sink it was given in [`MediaDevices::acquire`].
#[async_trait]
pub trait MediaDevices: Send {
    /// Check that `source` exists without capturing from it.
    async fn check_available(&mut self, source: MediaSource) -> Result<(), CaptureError>;

    async fn acquire(
        &mut self,
        source: MediaSource,
        events: EventSink,
    ) -> Result<LocalTrack, CaptureError>;

    fn set_enabled(&mut self, track: &TrackId, enabled: bool);

    /// Stop capturing and release the device. Stopping an unknown track is a no-op.
    fn stop(&mut self, track: &TrackId);
}

/// Tracks captured for one call.
#[derive(Debug, Default)]
pub struct LocalMedia {
    tracks: Vec<LocalTrack>,
}

impl LocalMedia {
    /// Capture every device `call_type` needs. On failure nothing stays captured.
    pub async fn acquire<D>(
        devices: &mut D,
        call_type: CallType,
        events: &EventSink,
    ) -> Result<Self, CaptureError>
    where
        D: MediaDevices + ?Sized,
    {
        let mut media = Self::default();
        for &source in MediaSource::for_call(call_type) {
            match devices.acquire(source, events.clone()).await {
                Ok(track) => media.tracks.push(track),
                Err(err) => {
                    media.release(devices);
                    return Err(err);
                }
            }
        }
        debug!("captured {} local tracks for {} call", media.tracks.len(), call_type);
        Ok(media)
    }

    #[must_use]
    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    #[must_use]
    pub fn first_of(&self, kind: TrackKind) -> Option<&LocalTrack> {
        self.tracks.iter().find(|track| track.kind() == kind)
    }

    pub fn first_of_mut(&mut self, kind: TrackKind) -> Option<&mut LocalTrack> {
        self.tracks.iter_mut().find(|track| track.kind() == kind)
    }

    pub fn remove(&mut self, id: &TrackId) -> Option<LocalTrack> {
        let index = self.tracks.iter().position(|track| &track.id == id)?;
        Some(self.tracks.remove(index))
    }

    /// Stop every track.
    pub fn release<D>(&mut self, devices: &mut D)
    where
        D: MediaDevices + ?Sized,
    {
        for track in self.tracks.drain(..) {
            devices.stop(&track.id);
        }
    }
}
