//! Live Update Hub: fan-out of Gateway events to connected dashboard viewers.
//!
//! Built on a single `tokio::sync::broadcast` channel of pre-serialized JSON.
//! A viewer is registered the moment its WebSocket upgrade completes (it gets
//! its own receiver) and deregistered unconditionally when the connection
//! closes or errors (the receiver is dropped). There is no replay: a viewer
//! that connects after an event was published never sees it and is expected to
//! re-fetch current state over the REST endpoints.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// Viewers that fall this far behind simply skip messages; there is no
/// delivery guarantee and no backlog.
const CHANNEL_CAPACITY: usize = 256;

/// Keeps idle connections from being dropped by intermediaries.
const PING_INTERVAL: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// A Gateway-originated event, sent to every viewer as `{"type": …, "data": …}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    SensorAdded(SensorAdded),
    RoomAdded(RoomAdded),
    /// Carries exactly the fields the client sent, not the merged blob.
    SettingsUpdated(serde_json::Map<String, serde_json::Value>),
    DbSettingsUpdated(DbSettingsUpdated),
    ReadingUpdated(ReadingUpdated),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorAdded {
    pub id: i64,
    pub name: String,
    pub location: String,
    #[serde(rename = "type")]
    pub sensor_type: String,
    pub min_temp: f64,
    pub max_temp: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomAdded {
    pub id: i64,
    pub name: String,
    pub min_temp: f64,
    pub max_temp: f64,
}

/// Credentials other than the password; the password is never broadcast.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DbSettingsUpdated {
    pub db_host: String,
    pub db_name: String,
    pub db_user: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingUpdated {
    pub id: i64,
    pub sensor_id: i64,
    pub temperature: f64,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// UpdateHub
// ---------------------------------------------------------------------------

/// Cloneable handle to the viewer registry. Stored in `AppState`.
#[derive(Clone)]
pub struct UpdateHub {
    tx: broadcast::Sender<Arc<str>>,
}

impl Default for UpdateHub {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateHub {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Register a viewer. Dropping the receiver deregisters it.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<str>> {
        self.tx.subscribe()
    }

    pub fn viewer_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Serialize `event` once and push it to every registered viewer.
    /// Publishing with zero viewers is a no-op, not an error.
    pub fn publish(&self, event: &Event) {
        let json: Arc<str> = match serde_json::to_string(event) {
            Ok(json) => json.into(),
            Err(e) => {
                warn!(error = %e, "Failed to serialize event, dropping it");
                return;
            }
        };
        let delivered = self.tx.send(json).unwrap_or(0);
        debug!(viewers = delivered, "Event published");
    }
}

// ---------------------------------------------------------------------------
// WebSocket endpoint
// ---------------------------------------------------------------------------

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub))
}

async fn handle_socket(socket: WebSocket, hub: UpdateHub) {
    let mut rx = hub.subscribe();
    let (mut sender, mut receiver) = socket.split();
    info!(viewers = hub.viewer_count(), "Viewer connected");

    // Outbound: forward published events, with a periodic keepalive ping.
    let send_task = tokio::spawn(async move {
        let mut ping = interval(PING_INTERVAL);
        loop {
            tokio::select! {
                _ = ping.tick() => {
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
                event = rx.recv() => match event {
                    Ok(json) => {
                        if sender.send(Message::Text(json.to_string().into())).await.is_err() {
                            // This viewer is gone; others are unaffected.
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Viewer lagged behind, skipping events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    });

    // Inbound: nothing is required from viewers; text frames are informational.
    let recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => {
                    debug!(message = %text, "Ignoring informational viewer message");
                }
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
    });

    // Either task ending means the connection is done; dropping the other
    // task's receiver removes the viewer from the registry.
    tokio::select! {
        _ = send_task => {}
        _ = recv_task => {}
    }

    info!("Viewer disconnected");
}
