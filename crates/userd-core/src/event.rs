// ABOUTME: Defines the user event envelope emitted after each committed state change.
// ABOUTME: The record snapshot keeps the flat wire format; the kind names the transition.

use serde::{Deserialize, Serialize};

use crate::model::Record;

/// Default topic that user events are published to.
pub const DEFAULT_TOPIC: &str = "user-events";

/// The transition a published event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
    Deactivated,
}

impl EventKind {
    /// Stable lowercase name, used as the SSE event name and the log `kind` field.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Updated => "updated",
            EventKind::Deleted => "deleted",
            EventKind::Deactivated => "deactivated",
        }
    }
}

/// A point-in-time snapshot of a record after a completed transition.
/// For `Deleted` the snapshot is the record as it was when removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEvent {
    pub kind: EventKind,
    pub record: Record,
}

impl UserEvent {
    pub fn new(kind: EventKind, record: Record) -> Self {
        Self { kind, record }
    }

    /// Serialize the record snapshot as flat JSON text.
    pub fn payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.record)
    }
}
