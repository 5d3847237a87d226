#![allow(dead_code)]

use std::net::{SocketAddr, TcpListener};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use callbridge_protocol::{ClientMessage, ServerMessage, UserId};
use callbridge_signaling_server::router::{self, ServerState};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);
const SILENCE: Duration = Duration::from_millis(200);

pub async fn start_server() -> (SocketAddr, ServerState) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind random port");
    let address = listener.local_addr().unwrap();

    let state = ServerState::default();
    let server = axum::Server::from_tcp(listener)
        .unwrap()
        .serve(router::create(state.clone()).into_make_service());
    tokio::spawn(server);

    (address, state)
}

pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    pub async fn connect(address: SocketAddr) -> Self {
        let (ws, _) = connect_async(format!("ws://{address}/ws"))
            .await
            .expect("failed to connect");
        Self { ws }
    }

    /// Connect and join, waiting for the acknowledgement.
    pub async fn joined(address: SocketAddr, user_id: &str) -> Self {
        let mut client = Self::connect(address).await;
        client
            .send(&ClientMessage::Join {
                user_id: UserId::from(user_id),
                display_label: user_id.to_uppercase(),
            })
            .await;
        assert_eq!(
            client.recv().await,
            ServerMessage::Joined {
                user_id: UserId::from(user_id),
                display_label: user_id.to_uppercase(),
            }
        );
        client
    }

    pub async fn send(&mut self, message: &ClientMessage) {
        let text = serde_json::to_string(message).unwrap();
        self.send_raw(&text).await;
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.ws.send(Message::Text(text.to_owned())).await.unwrap();
    }

    pub async fn recv(&mut self) -> ServerMessage {
        serde_json::from_value(self.recv_raw().await).unwrap()
    }

    /// Next text frame as plain JSON, without going through the message types.
    pub async fn recv_raw(&mut self) -> serde_json::Value {
        loop {
            let message = timeout(RECV_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for a message")
                .expect("connection closed")
                .expect("websocket error");
            if let Message::Text(text) = message {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    pub async fn assert_silent(&mut self) {
        if let Ok(Some(message)) = timeout(SILENCE, self.ws.next()).await {
            panic!("expected silence, got {message:?}");
        }
    }

    pub async fn close(mut self) {
        self.ws.close(None).await.unwrap();
    }
}
