use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::shared::models::StatusEvent;
use crate::shared::state::AppState;

/// Fan-out of lifecycle events to connected browsers. Events reach only
/// connections open at broadcast time; there is no queueing or replay.
pub struct StatusRelay {
    connections: Mutex<HashMap<Uuid, mpsc::UnboundedSender<String>>>,
}

impl StatusRelay {
    pub fn new() -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self) -> (Uuid, mpsc::UnboundedReceiver<String>) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.connections.lock().unwrap().insert(id, tx);
        (id, rx)
    }

    pub fn unregister(&self, id: &Uuid) {
        self.connections.lock().unwrap().remove(id);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    /// Serializes the event once and pushes it to every open connection,
    /// pruning any that have gone away.
    pub fn broadcast(&self, event: &StatusEvent) {
        let payload = match serde_json::to_string(event) {
            Ok(payload) => payload,
            Err(e) => {
                error!("Failed to serialize status event: {}", e);
                return;
            }
        };
        let mut connections = self.connections.lock().unwrap();
        connections.retain(|id, tx| {
            let delivered = tx.send(payload.clone()).is_ok();
            if !delivered {
                debug!("Dropping closed status connection {}", id);
            }
            delivered
        });
    }
}

impl Default for StatusRelay {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.relay.clone()))
}

async fn handle_socket(socket: WebSocket, relay: Arc<StatusRelay>) {
    let (mut sink, mut stream) = socket.split();
    let (id, mut rx) = relay.register();
    info!("Status client {} connected", id);

    let forward = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            if sink.send(Message::Text(payload)).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = stream.next().await {
        match message {
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    forward.abort();
    relay.unregister(&id);
    info!("Status client {} disconnected", id);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(bot_id: i32, status: &str) -> StatusEvent {
        StatusEvent::bot_status_change(bot_id, status, None)
    }

    #[tokio::test]
    async fn broadcast_reaches_every_open_connection() {
        let relay = StatusRelay::new();
        let (_a, mut rx_a) = relay.register();
        let (_b, mut rx_b) = relay.register();

        relay.broadcast(&event(7, "online"));

        let payload_a = rx_a.recv().await.unwrap();
        let payload_b = rx_b.recv().await.unwrap();
        assert_eq!(payload_a, payload_b);
        let parsed: serde_json::Value = serde_json::from_str(&payload_a).unwrap();
        assert_eq!(parsed["type"], "bot_status_change");
        assert_eq!(parsed["botId"], 7);
        assert_eq!(parsed["status"], "online");
    }

    #[tokio::test]
    async fn closed_connections_are_pruned() {
        let relay = StatusRelay::new();
        let (_a, rx_a) = relay.register();
        let (_b, mut rx_b) = relay.register();
        drop(rx_a);

        relay.broadcast(&event(1, "deploying"));

        assert_eq!(relay.connection_count(), 1);
        assert!(rx_b.recv().await.is_some());
    }

    #[tokio::test]
    async fn late_connections_see_no_replay() {
        let relay = StatusRelay::new();
        relay.broadcast(&event(1, "online"));

        let (_id, mut rx) = relay.register();
        relay.broadcast(&event(2, "offline"));

        let payload = rx.recv().await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(parsed["botId"], 2);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn unregister_stops_delivery() {
        let relay = StatusRelay::new();
        let (id, mut rx) = relay.register();
        relay.unregister(&id);

        relay.broadcast(&event(3, "error"));
        assert_eq!(relay.connection_count(), 0);
        assert!(rx.try_recv().is_err());
    }
}
