//! Topic grammar for the broker side of the gateway.

use crate::messages::EntityKind;

/// Builds and classifies the hierarchical topic names used on the broker.
///
/// All topics live under one configurable namespace (historically `/3ml`,
/// leading slash included).
#[derive(Debug, Clone)]
pub struct TopicScheme {
    namespace: String,
}

/// Inbound topics the gateway routes on, recovered from a raw topic name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// `<ns>/device/<device_id>/framed/out`
    DeviceFrame { device_id: String },
    /// `<ns>/rpc/<op>/response/<request_id>`
    RpcReply { op: String, request_id: String },
    /// `<ns>/<kind>/<entity_id>/notification`
    Notification { kind: EntityKind, entity_id: String },
}

impl TopicScheme {
    pub fn new(namespace: impl Into<String>) -> Self {
        let mut namespace = namespace.into();
        while namespace.ends_with('/') {
            namespace.pop();
        }
        Self { namespace }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn device_frames(&self, device_id: &str) -> String {
        format!("{}/device/{}/framed/out", self.namespace, device_id)
    }

    pub fn rpc_request(&self, op: &str) -> String {
        format!("{}/rpc/{}/request", self.namespace, op)
    }

    pub fn rpc_response(&self, op: &str, request_id: &str) -> String {
        format!("{}/rpc/{}/response/{}", self.namespace, op, request_id)
    }

    pub fn notification(&self, kind: EntityKind, entity_id: &str) -> String {
        format!(
            "{}/{}/{}/notification",
            self.namespace,
            kind.topic_segment(),
            entity_id
        )
    }

    /// Classifies an inbound topic. Topics outside the namespace, or inside
    /// it but matching no known shape, yield `None`.
    pub fn parse(&self, topic: &str) -> Option<Route> {
        let rest = topic
            .strip_prefix(self.namespace.as_str())
            .and_then(|r| r.strip_prefix('/'))?;

        // Device ids may contain slashes; matching on prefix and suffix
        // keeps the middle as greedy as the fleet's original grammar.
        if let Some(device_id) = rest
            .strip_prefix("device/")
            .and_then(|r| r.strip_suffix("/framed/out"))
        {
            if !device_id.is_empty() {
                return Some(Route::DeviceFrame {
                    device_id: device_id.to_string(),
                });
            }
            return None;
        }

        if let Some(r) = rest.strip_prefix("rpc/") {
            let (op, tail) = r.split_once('/')?;
            let request_id = tail.strip_prefix("response/")?;
            if op.is_empty() || request_id.is_empty() || request_id.contains('/') {
                return None;
            }
            return Some(Route::RpcReply {
                op: op.to_string(),
                request_id: request_id.to_string(),
            });
        }

        let (kind_segment, tail) = rest.split_once('/')?;
        let kind = EntityKind::from_topic_segment(kind_segment)?;
        let entity_id = tail.strip_suffix("/notification")?;
        if entity_id.is_empty() || entity_id.contains('/') {
            return None;
        }
        Some(Route::Notification {
            kind,
            entity_id: entity_id.to_string(),
        })
    }
}
