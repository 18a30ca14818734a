//! Payload shapes for request/reply calls bridged over the broker.

use serde::{Deserialize, Serialize};

/// The one RPC operation the current fleet serves.
pub const RECOGNIZE_FACES_OP: &str = "recognizeFaces";

/// Request published to `<ns>/rpc/<op>/request`. `payload` carries the
/// base64-encoded JPEG frame; the reply topic embeds `request_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcRequest {
    pub payload: String,
    pub request_id: String,
}

/// Reply payload for `recognizeFaces`. Extra fields some recognizers attach
/// are ignored on decode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognizedResponse {
    #[serde(default)]
    pub recognized_faces: Vec<RecognizedFace>,
}

/// A single recognized face with its bounding box and embedding.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecognizedFace {
    pub rect: Rect,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub category: i32,
    #[serde(default)]
    pub descriptor: Vec<f32>,
}

/// Axis-aligned bounding box, serialized with the capitalized field names
/// the fleet's recognizers emit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    #[serde(rename = "Min")]
    pub min: Point,
    #[serde(rename = "Max")]
    pub max: Point,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Point {
    #[serde(rename = "X")]
    pub x: i32,
    #[serde(rename = "Y")]
    pub y: i32,
}
