//! WebSocket envelopes and the notification push vocabulary.

use serde::{Deserialize, Serialize};

/// Message type for the greeting pushed right after a connection registers.
pub const TYPE_CONNECTED: &str = "CONNECTED";

/// Message type for reminders fanned out from broker notifications.
pub const TYPE_REMIND: &str = "APP_NOTIFICATION_REMIND";

/// Reminder text, verbatim from the deployed fleet (typos included).
pub const MSG_REMIND: &str = "You are sitting for too long. To protect you health, \
please consider to take a break for better health.";

/// The `{code, type, payload}` JSON envelope used in both directions on the
/// WebSocket. `code` and `payload` default on decode because clients only
/// reliably fill `type` and `payload`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub code: u16,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: String,
}

impl Envelope {
    pub fn connected(ws_id: &str) -> Self {
        Self {
            code: 200,
            kind: TYPE_CONNECTED.to_string(),
            payload: ws_id.to_string(),
        }
    }

    pub fn watch(kind: EntityKind, entity_id: &str) -> Self {
        Self {
            code: 200,
            kind: format!("WATCH_{}", kind.wire_segment()),
            payload: entity_id.to_string(),
        }
    }

    pub fn unwatch(kind: EntityKind, entity_id: &str) -> Self {
        Self {
            code: 200,
            kind: format!("UNWATCH_{}", kind.wire_segment()),
            payload: entity_id.to_string(),
        }
    }

    pub fn watch_success(kind: EntityKind) -> Self {
        Self {
            code: 200,
            kind: format!("APP_NOTIFICATION_WATCH_{}_SUCCESS", kind.wire_segment()),
            payload: format!(
                "You will receive notification on this {}",
                kind.topic_segment()
            ),
        }
    }

    /// Failure pushes keep code 200; the type string is the discriminator
    /// deployed clients switch on.
    pub fn watch_fail(kind: EntityKind) -> Self {
        Self {
            code: 200,
            kind: format!("APP_NOTIFICATION_WATCH_{}_FAIL", kind.wire_segment()),
            payload: format!("{} not found", kind.label()),
        }
    }

    pub fn remind() -> Self {
        Self {
            code: 200,
            kind: TYPE_REMIND.to_string(),
            payload: MSG_REMIND.to_string(),
        }
    }
}

/// The two entity families clients can watch for notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Desk,
    Project,
}

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::Desk, EntityKind::Project];

    /// Lower-case segment used in broker topics.
    pub fn topic_segment(self) -> &'static str {
        match self {
            EntityKind::Desk => "desk",
            EntityKind::Project => "project",
        }
    }

    /// Upper-case segment used in WebSocket message types.
    pub fn wire_segment(self) -> &'static str {
        match self {
            EntityKind::Desk => "DESK",
            EntityKind::Project => "PROJECT",
        }
    }

    /// Capitalized noun for user-facing texts.
    pub fn label(self) -> &'static str {
        match self {
            EntityKind::Desk => "Desk",
            EntityKind::Project => "Project",
        }
    }

    pub fn from_topic_segment(segment: &str) -> Option<Self> {
        match segment {
            "desk" => Some(EntityKind::Desk),
            "project" => Some(EntityKind::Project),
            _ => None,
        }
    }

    pub fn from_wire_segment(segment: &str) -> Option<Self> {
        match segment {
            "DESK" => Some(EntityKind::Desk),
            "PROJECT" => Some(EntityKind::Project),
            _ => None,
        }
    }
}

/// A client-to-server request recovered from an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Watch { kind: EntityKind, entity_id: String },
    Unwatch { kind: EntityKind, entity_id: String },
}

impl ClientCommand {
    /// Recognizes `WATCH_*` and `UNWATCH_*` envelopes. Anything else is
    /// `None` and callers ignore it.
    pub fn parse(envelope: &Envelope) -> Option<Self> {
        if let Some(segment) = envelope.kind.strip_prefix("UNWATCH_") {
            let kind = EntityKind::from_wire_segment(segment)?;
            return Some(ClientCommand::Unwatch {
                kind,
                entity_id: envelope.payload.clone(),
            });
        }
        if let Some(segment) = envelope.kind.strip_prefix("WATCH_") {
            let kind = EntityKind::from_wire_segment(segment)?;
            return Some(ClientCommand::Watch {
                kind,
                entity_id: envelope.payload.clone(),
            });
        }
        None
    }
}

/// Body published on `<ns>/<kind>/<id>/notification` topics. The entity id
/// is read from the payload, not recovered from the topic name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desk_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
}

impl Notification {
    /// The id field matching `kind`, treating empty strings as absent.
    pub fn entity_id(&self, kind: EntityKind) -> Option<&str> {
        let id = match kind {
            EntityKind::Desk => self.desk_id.as_deref(),
            EntityKind::Project => self.project_id.as_deref(),
        };
        id.filter(|id| !id.is_empty())
    }
}
