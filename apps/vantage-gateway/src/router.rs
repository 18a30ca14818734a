//! Classifies raw broker messages and hands them to the right subsystem.

use std::sync::Arc;

use metrics::counter;
use tokio::sync::mpsc;
use tracing::{debug, info};
use vantage_wire::Route;

use crate::broker::InboundMessage;
use crate::notify;
use crate::state::GatewayState;

/// Drains the broker inbound channel until the gateway shuts down.
pub async fn route_inbound(
    mut inbound: mpsc::UnboundedReceiver<InboundMessage>,
    state: Arc<GatewayState>,
) {
    info!("broker message router started");
    while let Some(message) = inbound.recv().await {
        handle_message(&state, message).await;
    }
    info!("broker message router stopped");
}

async fn handle_message(state: &GatewayState, message: InboundMessage) {
    match state.topics.parse(&message.topic) {
        Some(Route::DeviceFrame { device_id }) => {
            counter!("vantage_frames_received_total", 1);
            state.frames.store(&device_id, message.payload.clone()).await;
            state.hub.broadcast(&device_id, message.payload);
        }
        Some(Route::RpcReply { op, request_id }) => {
            if !state.rpc.complete(&request_id, message.payload) {
                debug!(%op, %request_id, "late rpc reply discarded");
            }
        }
        Some(Route::Notification { kind, entity_id }) => {
            counter!(
                "vantage_notifications_total",
                1,
                "kind" => kind.topic_segment()
            );
            notify::dispatch(state, kind, &entity_id, &message.payload);
        }
        None => {
            debug!(topic = %message.topic, "unroutable broker message dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{MemoryStore, RecordStore};
    use bytes::Bytes;
    use serde_json::json;
    use std::time::Duration;

    fn message(topic: &str, payload: &'static [u8]) -> InboundMessage {
        InboundMessage {
            topic: topic.to_string(),
            payload: Bytes::from_static(payload),
        }
    }

    #[tokio::test]
    async fn frames_update_the_cache_and_fan_out() {
        let state = GatewayState::stub_for_tests(Arc::new(MemoryStore::new()));
        let mut viewer = state.hub.attach("cam-1");

        handle_message(&state, message("/3ml/device/cam-1/framed/out", b"jpeg-1")).await;

        assert_eq!(
            state.frames.snapshot("cam-1").await,
            Some(Bytes::from_static(b"jpeg-1"))
        );
        assert_eq!(viewer.recv().await, Some(Bytes::from_static(b"jpeg-1")));
    }

    #[tokio::test]
    async fn rpc_replies_resolve_waiting_calls() {
        let state = GatewayState::stub_for_tests(Arc::new(MemoryStore::new()));
        let call = {
            let rpc = state.rpc.clone();
            tokio::spawn(async move {
                rpc.call::<serde_json::Value>("recognizeFaces", "img", Duration::from_secs(5))
                    .await
            })
        };

        let request_id = loop {
            let mut ids = state.rpc.pending_ids();
            if let Some(id) = ids.pop() {
                break id;
            }
            tokio::task::yield_now().await;
        };

        handle_message(
            &state,
            InboundMessage {
                topic: format!("/3ml/rpc/recognizeFaces/response/{request_id}"),
                payload: Bytes::from_static(b"{\"recognizedFaces\":[]}"),
            },
        )
        .await;

        let value = call.await.unwrap().unwrap();
        assert_eq!(value["recognizedFaces"], json!([]));
    }

    #[tokio::test]
    async fn notifications_route_to_watchers() {
        let store = MemoryStore::new();
        store
            .insert("desk", json!({"deskId": "desk-42"}))
            .await
            .unwrap();
        let state = GatewayState::stub_for_tests(Arc::new(store));

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let ws_id = state.connections.register(tx);
        notify::watch_entity(&state, vantage_wire::EntityKind::Desk, "desk-42", &ws_id)
            .await
            .unwrap();

        handle_message(
            &state,
            message("/3ml/desk/desk-42/notification", br#"{"deskId":"desk-42"}"#),
        )
        .await;

        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn foreign_and_late_messages_are_dropped() {
        let state = GatewayState::stub_for_tests(Arc::new(MemoryStore::new()));
        handle_message(&state, message("/other/ns/topic", b"x")).await;
        handle_message(
            &state,
            message("/3ml/rpc/recognizeFaces/response/stale-id", b"{}"),
        )
        .await;
    }
}
