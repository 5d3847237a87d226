/*!
Signaling messages exchanged between callbridge clients and the signaling server.

On the wire each message is a JSON text frame of the form
`{"event": "<kebab-case-name>", "data": { ...camelCase fields... }}`.
Two main categories are messages used to set up a call (join, invite, accept, reject, end)
and messages used to set up the `WebRTC` connection afterwards (offer, answer, candidates),
the latter are addressed by room and passed to the other peer without modifications.

An invite lives from `initiate-call` until it is accepted, rejected, cancelled
or one of both users disconnects. The caller learns the call id from
[`ServerMessage::CallRinging`], replies to an invite that is no longer pending are dropped.
*/

use serde::{Deserialize, Serialize};

use crate::common::Payload;
use crate::{CallId, CallType, RoomId, UserId};

/// Identity the caller attaches to an invite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerInfo {
    /// Stable identifier of the caller
    pub user_id: UserId,
    /// Human readable name of the caller
    pub display_label: String,
}

/// Messages sent by a client to the signaling server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    /// Bind this connection to a user id, must be the first message on a connection
    Join {
        /// Stable identifier of the user
        user_id: UserId,
        /// Human readable name of the user
        display_label: String,
    },

    /// Ring another user
    InitiateCall {
        /// Callee
        target_user_id: UserId,
        /// Requested kind of call
        call_type: CallType,
        /// Identity of the caller, informational only
        #[serde(default)]
        caller_info: Option<CallerInfo>,
    },

    /// Accept an invite received in [`ServerMessage::IncomingCall`]
    AcceptCall {
        /// Caller that sent the invite
        caller_id: UserId,
        /// Call being accepted
        call_id: CallId,
    },

    /// Decline an invite received in [`ServerMessage::IncomingCall`]
    RejectCall {
        /// Caller that sent the invite
        caller_id: UserId,
        /// Call being declined
        call_id: CallId,
    },

    /// Withdraw an invite that was not answered yet
    CancelCall {
        /// Call reported in [`ServerMessage::CallRinging`]
        call_id: CallId,
    },

    /// `SDP` offer that gets passed to the other member of the room without modifications
    WebrtcOffer {
        /// Room of the call
        room_id: RoomId,
        /// Opaque offer
        offer: Payload,
    },

    /// `SDP` answer that gets passed to the other member of the room without modifications
    WebrtcAnswer {
        /// Room of the call
        room_id: RoomId,
        /// Opaque answer
        answer: Payload,
    },

    /// ICE candidate that gets passed to the other member of the room without modifications
    WebrtcIceCandidate {
        /// Room of the call
        room_id: RoomId,
        /// Opaque candidate
        candidate: Payload,
    },

    /// Hang up
    EndCall {
        /// Room of the call
        room_id: RoomId,
        /// Call being ended, same as the room id
        call_id: CallId,
    },
}

/// Why a call ended.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndReason {
    /// One of the members sent `end-call`
    Hangup,
    /// One of the members lost its connection to the signaling server
    UserDisconnected,
}

/// Why a request was refused by the signaling server.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorReason {
    /// Invite addressed to a user that is not connected
    UnknownTarget,
    /// Caller or callee is already in another call
    ParticipantBusy,
}

/// Messages sent by the signaling server to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    /// Acknowledge [`ClientMessage::Join`]
    Joined {
        /// Registered user id
        user_id: UserId,
        /// Registered name
        display_label: String,
    },

    /// Invite was delivered to the callee, sent to the caller before the callee is rung
    CallRinging {
        /// Identifier generated for this call
        call_id: CallId,
        /// Callee
        target_user_id: UserId,
    },

    /// Somebody is calling
    IncomingCall {
        /// Caller
        caller_id: UserId,
        /// Human readable name of the caller
        caller_name: String,
        /// Requested kind of call
        call_type: CallType,
        /// Identifier generated for this call
        call_id: CallId,
    },

    /// Report back to both users that the room is ready
    CallAccepted {
        /// Room bridging both users
        room_id: RoomId,
        /// Accepted call, same as the room id
        call_id: CallId,
    },

    /// The callee declined the invite or left before answering
    CallRejected {
        /// Declined call
        call_id: CallId,
    },

    /// The caller withdrew the invite or left before it was answered
    CallCancelled {
        /// Withdrawn call
        call_id: CallId,
    },

    /// Offer relayed from the other member of the room
    WebrtcOffer {
        /// Room of the call
        room_id: RoomId,
        /// Opaque offer
        offer: Payload,
        /// Sender of the offer
        from: UserId,
    },

    /// Answer relayed from the other member of the room
    WebrtcAnswer {
        /// Room of the call
        room_id: RoomId,
        /// Opaque answer
        answer: Payload,
        /// Sender of the answer
        from: UserId,
    },

    /// ICE candidate relayed from the other member of the room
    WebrtcIceCandidate {
        /// Room of the call
        room_id: RoomId,
        /// Opaque candidate
        candidate: Payload,
        /// Sender of the candidate
        from: UserId,
    },

    /// The room was torn down
    CallEnded {
        /// Ended call
        call_id: CallId,
        /// What ended it
        reason: EndReason,
    },

    /// Generic error containing information about the cause
    Error {
        /// Cause of the error
        reason: ErrorReason,
        /// Invite target that could not be reached
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_user_id: Option<UserId>,
        /// Call the error refers to
        #[serde(default, skip_serializing_if = "Option::is_none")]
        call_id: Option<CallId>,
    },
}
