use std::sync::Arc;
use std::time::Instant;

use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::relay::Relay;

#[derive(Debug, Clone)]
pub struct ServerState {
    relay: Relay,
    started_at: Arc<Instant>,
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new(Relay::default())
    }
}

impl ServerState {
    #[must_use]
    pub fn new(relay: Relay) -> Self {
        Self {
            relay,
            started_at: Arc::new(Instant::now()),
        }
    }

    #[must_use]
    pub const fn relay(&self) -> &Relay {
        &self.relay
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub participants: usize,
    pub rooms: usize,
    pub pending_invites: usize,
    pub version: &'static str,
}

#[derive(Debug, Serialize)]
pub struct Banner {
    pub service: &'static str,
    pub status: &'static str,
    pub version: &'static str,
}

#[allow(clippy::unused_async)]
async fn index_handler() -> Json<Banner> {
    Json(Banner {
        service: env!("CARGO_PKG_NAME"),
        status: "running",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn health_handler(State(state): State<ServerState>) -> Json<Health> {
    Json(Health {
        status: "healthy",
        uptime_secs: state.started_at.elapsed().as_secs(),
        participants: state.relay.presence().len().await,
        rooms: state.relay.rooms().len().await,
        pending_invites: state.relay.invites().len().await,
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[allow(clippy::unused_async)]
async fn signaling_handler(State(state): State<ServerState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| state.relay.user_connected(socket))
}

pub fn create(server_state: ServerState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/ws", get(signaling_handler))
        .with_state(server_state)
}
