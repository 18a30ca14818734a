//! Watch registration and notification fan-out.
//!
//! Clients watch desks or projects over the WebSocket; fleet services
//! publish notifications on per-entity broker topics. This module keeps the
//! two registries in between and turns one notification into one reminder
//! push per watching connection.

use std::collections::HashSet;

use anyhow::Context;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vantage_wire::{EntityKind, Envelope, Notification};

use crate::error::GatewayError;
use crate::records::{Filter, RecordStore};
use crate::state::GatewayState;

/// Record collection backing each entity kind.
pub fn collection(kind: EntityKind) -> &'static str {
    kind.topic_segment()
}

/// Document field carrying the entity id for each kind.
pub fn id_field(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Desk => "deskId",
        EntityKind::Project => "projectId",
    }
}

/// Live WebSocket connections by id, each with its outbound queue.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<String, mpsc::UnboundedSender<Envelope>>,
}

impl ConnectionRegistry {
    pub fn register(&self, tx: mpsc::UnboundedSender<Envelope>) -> String {
        let ws_id = Uuid::new_v4().to_string();
        self.connections.insert(ws_id.clone(), tx);
        ws_id
    }

    pub fn unregister(&self, ws_id: &str) {
        self.connections.remove(ws_id);
    }

    /// Queues an envelope for one connection. Returns false when the
    /// connection is already gone.
    pub fn send(&self, ws_id: &str, envelope: Envelope) -> bool {
        match self.connections.get(ws_id) {
            Some(tx) => tx.send(envelope).is_ok(),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }
}

/// Which connections watch which entity. An entry disappears as soon as its
/// last watcher leaves.
#[derive(Default)]
pub struct WatchRegistry {
    watches: DashMap<(EntityKind, String), HashSet<String>>,
}

impl WatchRegistry {
    pub fn watch(&self, kind: EntityKind, entity_id: &str, ws_id: &str) {
        self.watches
            .entry((kind, entity_id.to_string()))
            .or_default()
            .insert(ws_id.to_string());
    }

    pub fn unwatch(&self, kind: EntityKind, entity_id: &str, ws_id: &str) {
        let key = (kind, entity_id.to_string());
        let mut emptied = false;
        if let Some(mut watchers) = self.watches.get_mut(&key) {
            watchers.remove(ws_id);
            emptied = watchers.is_empty();
        }
        if emptied {
            self.watches.remove_if(&key, |_, watchers| watchers.is_empty());
        }
    }

    /// Clears every watch held by a closing connection.
    pub fn remove_connection(&self, ws_id: &str) {
        self.watches.retain(|_, watchers| {
            watchers.remove(ws_id);
            !watchers.is_empty()
        });
    }

    pub fn watchers(&self, kind: EntityKind, entity_id: &str) -> Vec<String> {
        self.watches
            .get(&(kind, entity_id.to_string()))
            .map(|watchers| watchers.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn watched_entities(&self) -> usize {
        self.watches.len()
    }
}

/// Validates the entity exists, then records the watch. A lookup failure
/// counts as missing so a broken store refuses watches instead of
/// accepting ones it cannot verify.
pub async fn watch_entity(
    state: &GatewayState,
    kind: EntityKind,
    entity_id: &str,
    ws_id: &str,
) -> Result<(), GatewayError> {
    let filter = Filter::default().eq(id_field(kind), entity_id);
    let found = match state.store.count(collection(kind), &filter).await {
        Ok(count) => count,
        Err(err) => {
            warn!(
                kind = kind.topic_segment(),
                entity_id,
                error = %err,
                "record lookup failed, treating entity as missing"
            );
            0
        }
    };
    if found == 0 {
        return Err(GatewayError::NotFound(kind.label().to_string()));
    }
    state.watches.watch(kind, entity_id, ws_id);
    info!(kind = kind.topic_segment(), entity_id, ws_id, "watch registered");
    Ok(())
}

/// Fans a broker notification out to the entity's watchers. The id comes
/// from the payload; a topic naming a different entity loses to it.
pub fn dispatch(state: &GatewayState, kind: EntityKind, topic_entity_id: &str, payload: &[u8]) {
    let notification: Notification = match serde_json::from_slice(payload) {
        Ok(notification) => notification,
        Err(err) => {
            warn!(
                kind = kind.topic_segment(),
                topic_entity_id,
                error = %err,
                "undecodable notification dropped"
            );
            return;
        }
    };
    let Some(entity_id) = notification.entity_id(kind) else {
        warn!(
            kind = kind.topic_segment(),
            topic_entity_id,
            "notification without entity id dropped"
        );
        return;
    };

    let watchers = state.watches.watchers(kind, entity_id);
    if watchers.is_empty() {
        debug!(kind = kind.topic_segment(), entity_id, "notification with no watchers");
        return;
    }
    let mut delivered = 0;
    for ws_id in &watchers {
        if state.connections.send(ws_id, Envelope::remind()) {
            delivered += 1;
        }
    }
    debug!(
        kind = kind.topic_segment(),
        entity_id,
        delivered,
        watchers = watchers.len(),
        "reminder fanned out"
    );
}

/// Subscribes the notification topic of every known desk and project.
/// Entities created after startup are picked up on the next restart.
pub async fn subscribe_known_entities(state: &GatewayState) -> anyhow::Result<usize> {
    let mut subscribed = 0;
    for kind in EntityKind::ALL {
        let docs = state
            .store
            .find(collection(kind), &Filter::default())
            .await
            .with_context(|| format!("failed to enumerate {} records", kind.topic_segment()))?;
        for doc in docs {
            let Some(entity_id) = doc.get(id_field(kind)).and_then(Value::as_str) else {
                warn!(kind = kind.topic_segment(), "record without id field skipped");
                continue;
            };
            state
                .broker
                .subscribe(state.topics.notification(kind, entity_id))
                .await
                .with_context(|| {
                    format!(
                        "failed to subscribe {} notifications for {entity_id}",
                        kind.topic_segment()
                    )
                })?;
            subscribed += 1;
        }
    }
    Ok(subscribed)
}
