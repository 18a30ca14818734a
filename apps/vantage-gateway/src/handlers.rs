//! HTTP surface: capture endpoints, recognition, health and metrics.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::{BufMut, Bytes, BytesMut};
use futures_util::stream;
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};
use vantage_wire::{RecognizedFace, RecognizedResponse, RECOGNIZE_FACES_OP};

use crate::error::GatewayError;
use crate::state::GatewayState;
use crate::websocket::websocket_handler;

pub fn routes(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/device/:device_id/capture/live", get(capture_live))
        .route("/device/:device_id/capture/snap", get(capture_snap))
        .route("/device/:device_id/recognizeFaces", get(recognize_faces))
        .route("/ws", get(websocket_handler))
        .with_state(state)
}

async fn health(State(state): State<Arc<GatewayState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "broker_connected": state.broker.is_connected(),
        "connections": state.connections.len(),
        "subscriptions": state.broker.subscribed_topics().await.len(),
        "watched_entities": state.watches.watched_entities(),
    }))
}

async fn metrics(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let body = state.metrics.render();
    ([(CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

/// Live MJPEG stream for a device. The response never ends on its own;
/// clients disconnect when done.
async fn capture_live(
    State(state): State<Arc<GatewayState>>,
    Path(device_id): Path<String>,
) -> Result<Response, GatewayError> {
    if state.devices.ensure_subscribed(&device_id).await? {
        info!(%device_id, "first viewer for device");
    }
    let session = state.hub.attach(&device_id);
    counter!("vantage_live_viewers_total", 1);
    debug!(%device_id, viewers = state.hub.viewer_count(&device_id), "live stream attached");

    let parts = stream::unfold(session, |mut session| async move {
        let frame = session.recv().await?;
        Some((Ok::<Bytes, Infallible>(mjpeg_part(&frame)), session))
    });

    Ok((
        [(CONTENT_TYPE, "multipart/x-mixed-replace; boundary=frame")],
        Body::from_stream(parts),
    )
        .into_response())
}

/// Latest cached frame for a device, empty when none arrived yet.
async fn capture_snap(
    State(state): State<Arc<GatewayState>>,
    Path(device_id): Path<String>,
) -> impl IntoResponse {
    let frame = state.frames.snapshot(&device_id).await.unwrap_or_default();
    ([(CONTENT_TYPE, "image/jpeg")], frame)
}

#[derive(Debug, Deserialize)]
struct RecognizeParams {
    timeout: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RecognizeReply {
    image: String,
    recognized_faces: Vec<RecognizedFace>,
}

/// Runs recognition on the device's current frame. With `?timeout=<secs>`
/// the gateway resamples until a face shows up or the window closes, then
/// reports the last attempt either way.
async fn recognize_faces(
    State(state): State<Arc<GatewayState>>,
    Path(device_id): Path<String>,
    Query(params): Query<RecognizeParams>,
) -> Result<Json<RecognizeReply>, GatewayError> {
    let window = poll_window(params.timeout.as_deref());
    let started = Instant::now();

    loop {
        let frame = state.frames.snapshot(&device_id).await.unwrap_or_default();
        let image = BASE64.encode(&frame);
        let response: RecognizedResponse = state
            .rpc
            .call(RECOGNIZE_FACES_OP, image.clone(), state.rpc_timeout)
            .await?;

        let window_closed = match window {
            Some(window) => started.elapsed() >= window,
            None => true,
        };
        if !response.recognized_faces.is_empty() || window_closed {
            debug!(
                %device_id,
                faces = response.recognized_faces.len(),
                elapsed = ?started.elapsed(),
                "recognition finished"
            );
            return Ok(Json(RecognizeReply {
                image,
                recognized_faces: response.recognized_faces,
            }));
        }
    }
}

/// An unparseable timeout behaves like an absent one: single shot.
fn poll_window(raw: Option<&str>) -> Option<Duration> {
    raw.and_then(|v| v.parse::<u64>().ok()).map(Duration::from_secs)
}

/// One part of a `multipart/x-mixed-replace` stream: boundary, headers,
/// JPEG bytes, trailing CRLF.
fn mjpeg_part(frame: &Bytes) -> Bytes {
    let header = format!(
        "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        frame.len()
    );
    let mut part = BytesMut::with_capacity(header.len() + frame.len() + 2);
    part.put_slice(header.as_bytes());
    part.put_slice(frame);
    part.put_slice(b"\r\n");
    part.freeze()
}
