//! Process identity.
//!
//! Each coordinating process mints exactly one `ProcessId` at startup and
//! keeps it for its whole lifetime. The identity is the key into the shared
//! session store, so it must be unique across every process of the same
//! installation. A ULID gives the required shape for free: a millisecond
//! timestamp followed by a random suffix, lexicographically sortable by
//! creation time.

use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Opaque identity of one coordinating process.
///
/// Generated once via [`ProcessId::generate`]; hosts that already carry a
/// stable identity (a tab id, a window token) can adopt it with `From`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(String);

impl ProcessId {
    /// Mints a fresh identity: creation timestamp plus random suffix.
    pub fn generate() -> Self {
        ProcessId(Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ProcessId {
    fn from(value: String) -> Self {
        ProcessId(value)
    }
}

impl From<&str> for ProcessId {
    fn from(value: &str) -> Self {
        ProcessId(value.to_string())
    }
}
