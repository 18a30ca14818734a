//! WebSocket endpoint for notification watching.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use vantage_wire::{ClientCommand, Envelope};

use crate::notify;
use crate::state::GatewayState;

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<GatewayState>) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
    let ws_id = state.connections.register(tx);
    counter!("vantage_ws_connections_total", 1);
    gauge!("vantage_ws_connections_active", state.connections.len() as f64);
    info!(%ws_id, connections = state.connections.len(), "websocket connected");

    let writer = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            if let Ok(json) = serde_json::to_string(&envelope) {
                if sender.send(Message::Text(json)).await.is_err() {
                    break;
                }
            }
        }
    });

    state.connections.send(&ws_id, Envelope::connected(&ws_id));

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => handle_client_message(&state, &ws_id, &text).await,
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                debug!(%ws_id, error = %err, "websocket read failed");
                break;
            }
        }
    }

    state.connections.unregister(&ws_id);
    state.watches.remove_connection(&ws_id);
    gauge!("vantage_ws_connections_active", state.connections.len() as f64);
    writer.abort();
    info!(%ws_id, connections = state.connections.len(), "websocket disconnected");
}

/// One inbound text frame. Malformed JSON and unknown types are logged and
/// skipped; the connection stays up.
async fn handle_client_message(state: &GatewayState, ws_id: &str, text: &str) {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(ws_id, error = %err, "malformed websocket message ignored");
            return;
        }
    };

    match ClientCommand::parse(&envelope) {
        Some(ClientCommand::Watch { kind, entity_id }) => {
            let push = match notify::watch_entity(state, kind, &entity_id, ws_id).await {
                Ok(()) => Envelope::watch_success(kind),
                Err(err) => {
                    debug!(ws_id, %entity_id, error = %err, "watch refused");
                    Envelope::watch_fail(kind)
                }
            };
            state.connections.send(ws_id, push);
        }
        Some(ClientCommand::Unwatch { kind, entity_id }) => {
            state.watches.unwatch(kind, &entity_id, ws_id);
            debug!(ws_id, %entity_id, "watch removed");
        }
        None => {
            debug!(ws_id, kind = %envelope.kind, "unhandled websocket message type");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{MemoryStore, RecordStore};
    use serde_json::json;
    use vantage_wire::EntityKind;

    async fn seeded_state() -> Arc<GatewayState> {
        let store = MemoryStore::new();
        store
            .insert("desk", json!({"deskId": "desk-42"}))
            .await
            .unwrap();
        store
            .insert("project", json!({"projectId": "p-1"}))
            .await
            .unwrap();
        GatewayState::stub_for_tests(Arc::new(store))
    }

    #[tokio::test]
    async fn watch_command_pushes_success_or_fail() {
        let state = seeded_state().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ws_id = state.connections.register(tx);

        handle_client_message(&state, &ws_id, r#"{"type":"WATCH_DESK","payload":"desk-42"}"#).await;
        let push = rx.try_recv().unwrap();
        assert_eq!(push.kind, "APP_NOTIFICATION_WATCH_DESK_SUCCESS");
        assert_eq!(push.payload, "You will receive notification on this desk");

        handle_client_message(&state, &ws_id, r#"{"type":"WATCH_DESK","payload":"ghost"}"#).await;
        let push = rx.try_recv().unwrap();
        assert_eq!(push.kind, "APP_NOTIFICATION_WATCH_DESK_FAIL");
        assert_eq!(push.payload, "Desk not found");
        assert_eq!(push.code, 200);
    }

    #[tokio::test]
    async fn unwatch_is_silent() {
        let state = seeded_state().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ws_id = state.connections.register(tx);

        handle_client_message(&state, &ws_id, r#"{"type":"WATCH_PROJECT","payload":"p-1"}"#).await;
        rx.try_recv().unwrap();

        handle_client_message(&state, &ws_id, r#"{"type":"UNWATCH_PROJECT","payload":"p-1"}"#)
            .await;
        assert!(rx.try_recv().is_err());
        assert!(state.watches.watchers(EntityKind::Project, "p-1").is_empty());
    }

    #[tokio::test]
    async fn malformed_and_unknown_messages_are_skipped() {
        let state = seeded_state().await;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ws_id = state.connections.register(tx);

        handle_client_message(&state, &ws_id, "{oops").await;
        handle_client_message(&state, &ws_id, r#"{"type":"PING"}"#).await;
        handle_client_message(&state, &ws_id, r#"{"type":"WATCH_ROOM","payload":"r-1"}"#).await;

        assert!(rx.try_recv().is_err());
        assert_eq!(state.connections.len(), 1);
    }
}
