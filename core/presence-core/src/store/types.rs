//! Serialized session state shared between processes.
//!
//! Wire format is camelCase JSON under the `session.store` key:
//!
//! ```json
//! {
//!   "01J9K...": { "processId": "01J9K...", "role": "ADMIN", ... }
//! }
//! ```
//!
//! Fields added later default on deserialization, so version skew between
//! processes degrades instead of corrupting the whole store.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::ProcessId;

/// Snapshot of the authenticated identity as last seen by one process.
///
/// This is display/advisory data; the backend remains authoritative and the
/// snapshot may be stale relative to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl Principal {
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            attributes: BTreeMap::new(),
        }
    }
}

/// One process's entry in the shared session store.
///
/// The entry is owned exclusively for writes by the process holding
/// `process_id`; every other process only reads it. The single sanctioned
/// exception is expiry-driven cleanup, where any process may evict entries
/// whose owner is provably gone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub process_id: ProcessId,
    /// Opaque reference to the authentication token; absent means this
    /// process is unauthenticated.
    #[serde(default)]
    pub credential: Option<String>,
    #[serde(default)]
    pub principal: Option<Principal>,
    /// Normalized role classification, e.g. `"ADMIN"`.
    #[serde(default)]
    pub role: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// Whether the owning process is currently visible/focused.
    #[serde(default)]
    pub foreground: bool,
    /// Display title, for session pickers and conflict advisories.
    #[serde(default)]
    pub label: Option<String>,
    /// Current view/route of the owning process, display only.
    #[serde(default)]
    pub locator: Option<String>,
    /// Monotonic write counter for this entry, incremented by the owner on
    /// every credential-bearing write. Used to detect lost updates.
    #[serde(default)]
    pub version: u64,
}

impl SessionRecord {
    /// A freshly registered, unauthenticated record.
    pub fn initial(process_id: ProcessId, now: DateTime<Utc>) -> Self {
        Self {
            process_id,
            credential: None,
            principal: None,
            role: None,
            created_at: now,
            last_activity: now,
            foreground: true,
            label: None,
            locator: None,
            version: 0,
        }
    }

    pub fn principal_id(&self) -> Option<i64> {
        self.principal.as_ref().map(|p| p.id)
    }

    pub fn is_authenticated(&self) -> bool {
        self.credential.is_some()
    }
}
