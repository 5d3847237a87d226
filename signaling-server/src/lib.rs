/*!
Signaling relay brokering one-to-one calls between `WebRTC` peers.

Clients connect over a websocket on `/ws`, register a user id with `join`
and then exchange call control messages through the relay.
Once a call is accepted both peers are bound into a room and the relay passes
`SDP` offers, answers and ICE candidates between them without looking inside.
*/

pub mod config;
pub mod connection;
pub mod invites;
pub mod presence;
pub mod relay;
pub mod rooms;
pub mod router;
