/*!
Negotiation payloads carried by the signaling messages.

The signaling server never looks inside them, they are forwarded to the other peer as received.
Clients that want to work with them decode a [`Payload`] into the typed views
[`SessionDescription`] and [`IceCandidate`].
*/

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Negotiation payload exactly as the sending peer produced it.
///
/// Unknown fields and values outside of the typed views are kept,
/// so a payload survives the relay byte for byte (modulo JSON formatting).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Value);

impl Payload {
    /// Wrap a raw JSON value
    #[must_use]
    pub const fn new(inner: Value) -> Self {
        Self(inner)
    }

    /// Return reference to the raw JSON value
    #[must_use]
    pub const fn as_value(&self) -> &Value {
        &self.0
    }

    /// Acquire the underlying type
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn into_inner(self) -> Value {
        self.0
    }

    /// Serialize a typed view, e.g. a [`SessionDescription`].
    ///
    /// # Errors
    /// If `value` cannot be represented as JSON.
    pub fn encode<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        serde_json::to_value(value).map(Self)
    }

    /// Parse the payload into a typed view.
    ///
    /// # Errors
    /// If the payload does not have the shape of `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.0)
    }
}

impl From<Value> for Payload {
    fn from(inner: Value) -> Self {
        Self(inner)
    }
}

/// Proposed ICE candidate, in the shape produced by `RTCPeerConnection.onicecandidate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    /// Candidate description line
    pub candidate: String,
    /// Media stream identification tag
    #[serde(default)]
    pub sdp_mid: Option<String>,
    /// Index of the media description the candidate is associated with
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_m_line_index: Option<u16>,
    /// ICE username fragment of the session the candidate belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Type of a session description.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    /// Initial proposal of the caller
    Offer,
    /// Final response of the callee
    Answer,
    /// Provisional response
    Pranswer,
    /// Cancels the current negotiation
    Rollback,
}

/// `SDP` session description, in the shape of `RTCSessionDescriptionInit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Whether this is an offer or an answer
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    /// Raw `SDP` body
    pub sdp: String,
}

impl SessionDescription {
    /// Create an offer with given `SDP` body
    #[must_use]
    pub const fn offer(sdp: String) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp,
        }
    }

    /// Create an answer with given `SDP` body
    #[must_use]
    pub const fn answer(sdp: String) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp,
        }
    }
}
