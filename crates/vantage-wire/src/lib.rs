//! Shared wire vocabulary for the Vantage device gateway.
//!
//! Everything in this crate is frozen by what already travels over the
//! broker and the WebSocket: topic grammar, envelope shapes, and the RPC
//! payloads the device fleet emits. The gateway depends on it for routing
//! and serialization; external clients can depend on it to speak the same
//! protocol without pulling in the server.

pub mod messages;
pub mod rpc;
pub mod topics;

pub use messages::{ClientCommand, EntityKind, Envelope, Notification};
pub use rpc::{Point, RecognizedFace, RecognizedResponse, Rect, RpcRequest, RECOGNIZE_FACES_OP};
pub use topics::{Route, TopicScheme};
