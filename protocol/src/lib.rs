/*!
Helper crate that declares common types and structures shared between [callbridge](../callbridge/index.html)
and [callbridge-signaling-server](../callbridge_signaling_server/index.html).
*/

#![warn(missing_docs)]

use std::convert::Infallible;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod common;
pub mod signal;

pub use common::{IceCandidate, Payload, SdpType, SessionDescription};
pub use signal::{CallerInfo, ClientMessage, EndReason, ErrorReason, ServerMessage};

/// Stable identifier of a user, supplied by the client when joining the signaling server.
/// The signaling server treats it as an opaque string.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize, Hash)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Wrap String into a `UserId` `struct`
    #[must_use]
    pub const fn new(inner: String) -> Self {
        Self(inner)
    }

    /// Return reference to the underling string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Acquire the underlying type
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl FromStr for UserId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_owned()))
    }
}

impl From<&str> for UserId {
    fn from(val: &str) -> Self {
        Self(val.to_owned())
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier of a call, generated by the signaling server when a call is initiated.
/// Once the call is accepted the same value identifies the room bridging both peers.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize, Hash)]
#[serde(transparent)]
pub struct CallId(String);

impl CallId {
    /// Wrap String into a `CallId` `struct`
    #[must_use]
    pub const fn new(inner: String) -> Self {
        Self(inner)
    }

    /// Return reference to the underling string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Acquire the underlying type
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl FromStr for CallId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_owned()))
    }
}

impl From<&str> for CallId {
    fn from(val: &str) -> Self {
        Self(val.to_owned())
    }
}

impl Display for CallId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Rooms reuse the identifier of the call they bridge.
pub type RoomId = CallId;

/// Kind of call requested by the caller, decides which capture devices are used.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize, Hash)]
#[serde(rename_all = "lowercase")]
pub enum CallType {
    /// Microphone only
    Voice,
    /// Microphone and camera
    Video,
    /// Microphone and display capture
    Screen,
}

impl CallType {
    /// Whether the call sends a video track from the start.
    #[must_use]
    pub const fn has_video(self) -> bool {
        matches!(self, Self::Video | Self::Screen)
    }
}

impl Display for CallType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Voice => "voice",
            Self::Video => "video",
            Self::Screen => "screen",
        };
        f.write_str(name)
    }
}
