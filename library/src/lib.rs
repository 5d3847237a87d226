/*!
Client side of callbridge: one participant's voice, video and screen-share calls.

# Overview

A call goes through a signaling relay (see the accompanying `callbridge-signaling-server` crate)
until both peers have exchanged enough information to talk to each other directly.
This crate keeps track of where a call is in that process and makes sure local media
is captured only while it is needed and always released afterwards.

The library does not capture media or speak `WebRTC` itself. Platform code plugs in through
two traits, [`MediaDevices`] for capture and [`MediaTransport`] for negotiation sessions,
and the [`CallMachine`] drives them.
With the `fake-media` feature in-memory implementations of both are available in the `fake` module.

# Example

```no_run
use callbridge::{CallConfig, CallPhase, CallType, Identity, MediaDevices, MediaTransport, UserId};

async fn call_bob<D, T>(devices: D, transport: T) -> Result<(), Box<dyn std::error::Error>>
where
    D: MediaDevices + 'static,
    T: MediaTransport + 'static,
{
    let alice = callbridge::connect(
        "ws://127.0.0.1:9001/ws",
        Identity::new("alice", "Alice"),
        CallConfig::default(),
        devices,
        transport,
    )
    .await?;

    alice.start_call(UserId::from("bob"), CallType::Video).await?;
    alice.wait_for(|call| call.phase == CallPhase::Active).await?;
    alice.end_call().await?;
    Ok(())
}
```
*/

#![allow(clippy::module_name_repetitions)]
// clippy WARN level lints
#![warn(
    clippy::cargo,
    clippy::pedantic,
    clippy::dbg_macro,
    clippy::unwrap_used,
    clippy::integer_division,
    clippy::large_include_file,
    clippy::map_err_ignore,
    clippy::panic,
    clippy::todo,
    clippy::undocumented_unsafe_blocks,
    clippy::unimplemented,
    clippy::unreachable
)]
// clippy WARN level lints, that can be upgraded to DENY if preferred
#![warn(
    clippy::float_arithmetic,
    clippy::modulo_arithmetic,
    clippy::as_conversions,
    clippy::assertions_on_result_states,
    clippy::clone_on_ref_ptr,
    clippy::deref_by_slicing,
    clippy::empty_drop,
    clippy::empty_structs_with_brackets,
    clippy::exit,
    clippy::float_cmp_const,
    clippy::if_then_some_else_none,
    clippy::indexing_slicing,
    clippy::let_underscore_must_use,
    clippy::lossy_float_literal,
    clippy::string_slice,
    clippy::try_err
)]
// clippy DENY level lints, they always have a quick fix that should be preferred
#![deny(
    clippy::wildcard_imports,
    clippy::multiple_inherent_impl,
    clippy::rc_buffer,
    clippy::rc_mutex,
    clippy::rest_pat_in_fully_bound_structs,
    clippy::same_name_method,
    clippy::self_named_module_files,
    clippy::separated_literal_suffix,
    clippy::shadow_unrelated,
    clippy::str_to_string,
    clippy::string_add,
    clippy::string_to_string,
    clippy::unnecessary_self_imports,
    clippy::unneeded_field_pattern,
    clippy::verbose_file_reads
)]

pub mod call;
pub mod controller;
mod error;
pub mod events;
#[cfg(any(test, feature = "fake-media"))]
pub mod fake;
pub mod media;
pub mod signaling;
pub mod transport;

pub use call::{CallConfig, CallMachine, CallPhase, CallSnapshot, Direction, Identity};
pub use controller::{CallController, CallHandle};
pub use error::{CallError, CaptureError, NegotiationError, Result, SignalError};
pub use events::{CallEvent, EventSink};
pub use media::{LocalTrack, MediaDevices, MediaSource, TrackId, TrackKind};
pub use signaling::connect;
pub use transport::{
    ConnectionState, MediaTransport, NegotiationSession, SenderId, SessionEvent, SessionEvents,
    SignalSink,
};
pub use callbridge_protocol::{CallId, CallType, UserId};
