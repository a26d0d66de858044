//! Liveness classification and expiry cleanup.
//!
//! A process that dies abruptly never removes its own entry, so every peer
//! derives liveness purely from `now - last_activity`:
//!
//! - `fresh`:   age < 5 minutes
//! - `idle`:    5 minutes ≤ age < 30 minutes
//! - `stale`:   30 minutes ≤ age < 24 hours
//! - `expired`: age ≥ 24 hours
//!
//! Expired entries may be evicted by *any* process — the one sanctioned
//! exception to entry ownership, justified because an owner that has not
//! heartbeaten in a day is gone.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::identity::ProcessId;
use crate::store::{EventKind, EventPayload, SessionEvent, SessionRecord, SharedStore};

pub const FRESH_WINDOW_SECS: i64 = 5 * 60;
pub const IDLE_WINDOW_SECS: i64 = 30 * 60;
pub const STALE_WINDOW_SECS: i64 = 24 * 60 * 60;

/// Age bucket of a session record. Ordered: advancing the clock only ever
/// moves a record forward through `Fresh → Idle → Stale → Expired`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Fresh,
    Idle,
    Stale,
    Expired,
}

impl Liveness {
    /// Pure classification of `last_activity` against `now`.
    ///
    /// A record from the future (peer clock skew) counts as fresh.
    pub fn classify(last_activity: DateTime<Utc>, now: DateTime<Utc>) -> Liveness {
        let age = now.signed_duration_since(last_activity);
        if age < Duration::seconds(FRESH_WINDOW_SECS) {
            Liveness::Fresh
        } else if age < Duration::seconds(IDLE_WINDOW_SECS) {
            Liveness::Idle
        } else if age < Duration::seconds(STALE_WINDOW_SECS) {
            Liveness::Stale
        } else {
            Liveness::Expired
        }
    }

    pub fn is_active(self) -> bool {
        self != Liveness::Expired
    }
}

/// One live entry from the shared store, annotated for the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveSession {
    pub record: SessionRecord,
    pub liveness: Liveness,
    /// Whether this entry belongs to the calling process itself.
    pub is_self: bool,
}

/// Every non-expired entry, oldest registration first, annotated with
/// liveness and self-ownership.
pub fn list_active(store: &SharedStore, own: &ProcessId, now: DateTime<Utc>) -> Vec<ActiveSession> {
    let mut sessions: Vec<ActiveSession> = store
        .read()
        .into_values()
        .filter_map(|record| {
            let liveness = Liveness::classify(record.last_activity, now);
            liveness.is_active().then(|| ActiveSession {
                is_self: &record.process_id == own,
                liveness,
                record,
            })
        })
        .collect();
    sessions.sort_by(|a, b| {
        (a.record.created_at, &a.record.process_id).cmp(&(b.record.created_at, &b.record.process_id))
    });
    sessions
}

/// Removes every entry classified expired at call time and appends one
/// `cleaned` event carrying the count. Safe to call from any process; a
/// pass that finds nothing writes nothing.
pub fn cleanup_expired(store: &SharedStore, origin: &ProcessId, now: DateTime<Utc>) -> Result<usize> {
    let expired: Vec<String> = store
        .read()
        .into_values()
        .filter(|record| Liveness::classify(record.last_activity, now) == Liveness::Expired)
        .map(|record| record.process_id.as_str().to_string())
        .collect();

    if expired.is_empty() {
        return Ok(0);
    }

    let removed = store.remove_entries(origin, &expired)?;
    if removed > 0 {
        store.append_event(
            origin,
            SessionEvent::new(EventKind::Cleaned, origin.clone(), now).with_payload(EventPayload {
                removed: Some(removed as u32),
                ..Default::default()
            }),
        );
    }
    Ok(removed)
}
