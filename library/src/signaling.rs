/*!
Websocket link to the signaling relay.

[`connect`] opens the socket, announces the user with `join` and wires both directions
to a freshly spawned [`CallController`]:
messages from the relay become [`CallEvent::Signal`]s and the machine's outgoing
[`ClientMessage`]s are written to the socket in order.
When the socket closes the controller receives [`CallEvent::RelayDisconnected`].
*/

use callbridge_protocol::{ClientMessage, ServerMessage};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::call::{CallConfig, Identity};
use crate::controller::{CallController, CallHandle};
use crate::error::SignalError;
use crate::events::{CallEvent, EventSink};
use crate::media::MediaDevices;
use crate::transport::MediaTransport;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connect to the relay at `url` (e.g. `ws://127.0.0.1:9001/ws`) and start a call controller.
///
/// # Errors
/// [`SignalError::Connect`] if the websocket handshake fails.
pub async fn connect<D, T>(
    url: &str,
    identity: Identity,
    config: CallConfig,
    devices: D,
    transport: T,
) -> Result<CallHandle, SignalError>
where
    D: MediaDevices + 'static,
    T: MediaTransport + 'static,
{
    let (socket, _response) = connect_async(url).await?;
    info!("connected to signaling server at {}", url);
    let (socket_tx, socket_rx) = socket.split();

    let join = ClientMessage::Join {
        user_id: identity.user_id.clone(),
        display_label: identity.display_label.clone(),
    };
    let (signal_tx, signal_rx) = mpsc::unbounded_channel();
    let (controller, handle) = CallController::new(identity, config, devices, transport, signal_tx);

    tokio::spawn(write_signals(socket_tx, join, signal_rx));
    tokio::spawn(read_signals(socket_rx, handle.events()));
    controller.spawn();

    Ok(handle)
}

async fn write_signals(
    mut socket: SplitSink<Socket, Message>,
    join: ClientMessage,
    mut signals: mpsc::UnboundedReceiver<ClientMessage>,
) {
    // join always goes first, everything else needs a registered user
    let mut next = Some(join);
    while let Some(message) = next {
        debug!("sending {:?}", message);
        match serde_json::to_string(&message) {
            Ok(text) => {
                if let Err(err) = socket.send(Message::Text(text)).await {
                    warn!("failed to send signal message: {}", err);
                    break;
                }
            }
            Err(err) => error!("failed to serialize {:?}: {}", message, err),
        }
        next = signals.recv().await;
    }

    if let Err(err) = socket.close().await {
        debug!("closing signaling socket: {}", err);
    }
}

async fn read_signals(mut socket: SplitStream<Socket>, events: EventSink) {
    while let Some(frame) = socket.next().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                warn!("signaling socket error: {}", err);
                break;
            }
        };
        match frame {
            Message::Text(text) => match serde_json::from_str::<ServerMessage>(&text) {
                Ok(message) => {
                    debug!("received {:?}", message);
                    if !events.emit(CallEvent::Signal(message)) {
                        return;
                    }
                }
                Err(err) => warn!("ignoring malformed signal message: {}", err),
            },
            Message::Close(_) => break,
            Message::Binary(_) | Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
        }
    }

    info!("signaling connection closed");
    events.emit(CallEvent::RelayDisconnected);
}
