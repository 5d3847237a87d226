use callbridge_protocol::{CallType, UserId};
use log::{debug, info};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::call::{CallConfig, CallMachine, CallSnapshot, Identity};
use crate::error::{CallError, Result};
use crate::events::{CallEvent, Envelope, EventSink};
use crate::media::MediaDevices;
use crate::transport::{MediaTransport, SignalSink};

/// Actor owning a [`CallMachine`].
///
/// Processes queued events strictly one at a time and publishes a [`CallSnapshot`]
/// after each of them.
pub struct CallController<D, T: MediaTransport, S> {
    machine: CallMachine<D, T, S>,
    rx: mpsc::UnboundedReceiver<Envelope>,
    snapshots: watch::Sender<CallSnapshot>,
}

impl<D, T, S> CallController<D, T, S>
where
    D: MediaDevices,
    T: MediaTransport,
    S: SignalSink,
{
    pub fn new(
        identity: Identity,
        config: CallConfig,
        devices: D,
        transport: T,
        signals: S,
    ) -> (Self, CallHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let events = EventSink::new(tx);
        let machine = CallMachine::new(
            identity,
            config,
            devices,
            transport,
            signals,
            events.clone(),
        );
        let (snapshots, snapshot_rx) = watch::channel(machine.snapshot());

        let controller = Self {
            machine,
            rx,
            snapshots,
        };
        let handle = CallHandle {
            events,
            snapshots: snapshot_rx,
        };
        (controller, handle)
    }

    /// Run until [`CallHandle::shutdown`] is called or every handle is dropped.
    pub async fn run(mut self) {
        info!("call controller for {} started", self.machine.identity().user_id);
        while let Some(Envelope { event, reply }) = self.rx.recv().await {
            let shutdown = event == CallEvent::Shutdown;
            let result = self.machine.handle(event).await;
            self.snapshots.send_replace(self.machine.snapshot());

            if let Some(reply) = reply {
                if reply.send(result).is_err() {
                    debug!("requester went away before the reply");
                }
            }
            if shutdown {
                break;
            }
        }
        info!("call controller for {} stopped", self.machine.identity().user_id);
    }

    pub fn spawn(self) -> JoinHandle<()>
    where
        Self: 'static,
    {
        tokio::spawn(self.run())
    }
}

/// Cloneable remote control of a running [`CallController`].
#[derive(Debug, Clone)]
pub struct CallHandle {
    events: EventSink,
    snapshots: watch::Receiver<CallSnapshot>,
}

impl CallHandle {
    async fn request(&self, event: CallEvent) -> Result<()> {
        let (reply, outcome) = oneshot::channel();
        if !self.events.send(Envelope {
            event,
            reply: Some(reply),
        }) {
            return Err(CallError::ControllerClosed);
        }
        outcome.await.map_err(|_closed| CallError::ControllerClosed)?
    }

    /// Ring `target`. Fails right away if a required device is missing.
    ///
    /// Devices are only captured once `target` accepts, a capture failure at that
    /// point ends the call and shows up in [`CallSnapshot::last_error`](crate::CallSnapshot::last_error).
    pub async fn start_call(&self, target: UserId, call_type: CallType) -> Result<()> {
        self.request(CallEvent::StartCall { target, call_type })
            .await
    }

    pub async fn answer_call(&self) -> Result<()> {
        self.request(CallEvent::Answer).await
    }

    pub async fn reject_call(&self) -> Result<()> {
        self.request(CallEvent::Reject).await
    }

    pub async fn end_call(&self) -> Result<()> {
        self.request(CallEvent::End).await
    }

    pub async fn toggle_mute(&self) -> Result<()> {
        self.request(CallEvent::ToggleMute).await
    }

    pub async fn toggle_video(&self) -> Result<()> {
        self.request(CallEvent::ToggleVideo).await
    }

    pub async fn start_screen_share(&self) -> Result<()> {
        self.request(CallEvent::StartScreenShare).await
    }

    /// End any call and stop the controller.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(CallEvent::Shutdown).await
    }

    #[must_use]
    pub fn snapshot(&self) -> CallSnapshot {
        self.snapshots.borrow().clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<CallSnapshot> {
        self.snapshots.clone()
    }

    /// Wait for the first snapshot matching `predicate`, the current one included.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&CallSnapshot) -> bool,
    ) -> Result<CallSnapshot> {
        let mut snapshots = self.snapshots.clone();
        let snapshot = snapshots
            .wait_for(predicate)
            .await
            .map_err(|_closed| CallError::ControllerClosed)?;
        Ok(snapshot.clone())
    }

    /// Entry point for events coming from outside, e.g. the signaling link.
    #[must_use]
    pub fn events(&self) -> EventSink {
        self.events.clone()
    }
}

#[cfg(test)]
mod test {
    use callbridge_protocol::{CallId, ClientMessage, ServerMessage};

    use super::*;
    use crate::call::CallPhase;
    use crate::fake::{FakeDevices, FakeTransport};

    fn spawn_controller() -> (CallHandle, mpsc::UnboundedReceiver<ClientMessage>) {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (controller, handle) = CallController::new(
            Identity::new("bob", "Bob"),
            CallConfig::default(),
            FakeDevices::new(),
            FakeTransport::new(),
            signal_tx,
        );
        controller.spawn();
        (handle, signal_rx)
    }

    #[tokio::test]
    async fn commands_reply_with_their_outcome() {
        let (handle, _signals) = spawn_controller();

        let result = handle.answer_call().await;
        assert_eq!(
            result,
            Err(CallError::InvalidState {
                operation: "answer",
                phase: CallPhase::Idle,
            })
        );
        assert_eq!(handle.snapshot().last_error, result.err());
    }

    #[tokio::test]
    async fn relay_messages_update_the_snapshot() {
        let (handle, mut signals) = spawn_controller();

        handle.events().emit(CallEvent::Signal(ServerMessage::IncomingCall {
            caller_id: UserId::from("alice"),
            caller_name: "Alice".to_owned(),
            call_type: CallType::Video,
            call_id: CallId::from("call_1"),
        }));
        let ringing = handle
            .wait_for(|snapshot| snapshot.phase == CallPhase::Ringing)
            .await
            .unwrap();
        assert_eq!(ringing.peer_name.as_deref(), Some("Alice"));

        handle.reject_call().await.unwrap();
        assert_eq!(handle.snapshot().phase, CallPhase::Idle);
        assert!(matches!(
            signals.recv().await,
            Some(ClientMessage::RejectCall { .. })
        ));
    }

    #[tokio::test]
    async fn shutdown_stops_the_controller() {
        let (handle, _signals) = spawn_controller();

        handle.shutdown().await.unwrap();
        assert_eq!(
            handle.end_call().await,
            Err(CallError::ControllerClosed)
        );
    }
}
