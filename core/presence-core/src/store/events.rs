//! Coordination events.
//!
//! Every lifecycle transition appends an immutable event to a bounded,
//! oldest-first log under the `session.events` key. The log serves two
//! purposes: a recent-history audit window, and a trigger for cross-process
//! reactions (peers re-read it when the key changes). Events are never
//! authoritative state; the session store is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::ProcessId;

/// Maximum number of events retained; the oldest are evicted first.
pub const EVENT_LOG_CAPACITY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Registered,
    Updated,
    Logout,
    Removed,
    ForceSync,
    Cleaned,
}

/// Event-specific detail fields, all optional (absent fields are omitted
/// from the wire format).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Entry count removed by a cleanup pass.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub removed: Option<u32>,
}

/// One immutable lifecycle transition record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub process_id: ProcessId,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<EventPayload>,
}

impl SessionEvent {
    pub fn new(kind: EventKind, process_id: ProcessId, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            process_id,
            timestamp,
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: EventPayload) -> Self {
        self.payload = Some(payload);
        self
    }
}
