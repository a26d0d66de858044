//! The shared-store write protocol.
//!
//! The medium underneath has no transactions, locks, or compare-and-swap, so
//! a read-modify-write of the whole store is not atomic across processes.
//! Every write therefore follows an **owner-partitioned merge** discipline:
//!
//! 1. read the latest store snapshot (immediately before writing, never with
//!    asynchronous work in between)
//! 2. apply the change to this process's own entry only (or, for cleanup, to
//!    entries independently determined to be expired)
//! 3. write back the merged result
//!
//! Each entry carries a monotonic `version`; a writer re-reads once if the
//! snapshot it loaded is older than a version it already committed (its own
//! heartbeats racing each other). Cross-process lost updates on *other*
//! processes' entries cannot happen because other entries are carried through
//! the merge untouched.
//!
//! Reads are defensive: an absent, empty, or malformed value is an empty
//! store — corruption is logged and survived, never propagated.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;

use crate::error::Result;
use crate::identity::ProcessId;
use crate::medium::SharedMedium;

use super::events::{SessionEvent, EVENT_LOG_CAPACITY};
use super::types::SessionRecord;

/// Logical key holding the `{processId: SessionRecord}` map.
pub const STORE_KEY: &str = "session.store";
/// Logical key holding the bounded event log.
pub const EVENTS_KEY: &str = "session.events";

/// Protocol-level access to the two shared keys.
///
/// Cheap to clone; clones share the same medium.
#[derive(Clone)]
pub struct SharedStore {
    medium: Arc<dyn SharedMedium>,
}

impl SharedStore {
    pub fn new(medium: Arc<dyn SharedMedium>) -> Self {
        Self { medium }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────

    /// Latest store snapshot. Malformed data is an empty store.
    pub fn read(&self) -> HashMap<String, SessionRecord> {
        match self.medium.read(STORE_KEY) {
            None => HashMap::new(),
            Some(raw) => parse_store(&raw),
        }
    }

    /// This process's (or any process's) current entry.
    pub fn get(&self, id: &ProcessId) -> Option<SessionRecord> {
        self.read().remove(id.as_str())
    }

    /// Latest event log, oldest first. Malformed data is an empty log.
    pub fn read_events(&self) -> Vec<SessionEvent> {
        match self.medium.read(EVENTS_KEY) {
            None => Vec::new(),
            Some(raw) => parse_events(&raw),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Owner-partitioned writes
    // ─────────────────────────────────────────────────────────────────────

    /// Rewrites `origin`'s own entry through `mutate`, merging it into the
    /// latest snapshot. Entries owned by other processes pass through
    /// untouched.
    ///
    /// `floor` is the highest version this process has already committed for
    /// its entry; a snapshot carrying an older version is stale (our own
    /// earlier write racing us) and is re-read once before merging.
    pub fn mutate_own<F>(&self, origin: &ProcessId, floor: u64, mutate: F) -> Result<SessionRecord>
    where
        F: Fn(Option<&SessionRecord>) -> SessionRecord,
    {
        let mut map = self.read();
        if let Some(current) = map.get(origin.as_str()) {
            if current.version < floor {
                map = self.read();
            }
        }

        let updated = mutate(map.get(origin.as_str()));
        map.insert(origin.as_str().to_string(), updated.clone());
        self.write_store(origin, &map)?;
        Ok(updated)
    }

    /// Removes `origin`'s own entry. Entries owned by other processes are
    /// carried through unchanged. No write occurs if the entry is absent.
    pub fn remove_own(&self, origin: &ProcessId) -> Result<Option<SessionRecord>> {
        let mut map = self.read();
        let removed = map.remove(origin.as_str());
        if removed.is_some() {
            self.write_store(origin, &map)?;
        }
        Ok(removed)
    }

    /// Removes the listed entries (cleanup of expired peers — the one
    /// sanctioned cross-owner write). Returns how many were present.
    pub fn remove_entries(&self, origin: &ProcessId, ids: &[String]) -> Result<usize> {
        let mut map = self.read();
        let before = map.len();
        for id in ids {
            map.remove(id);
        }
        let removed = before - map.len();
        if removed > 0 {
            self.write_store(origin, &map)?;
        }
        Ok(removed)
    }

    /// Wipes every entry ("sign out everywhere"). Deliberately separate from
    /// [`remove_own`]; this is the only whole-store overwrite in the protocol.
    pub fn clear_all(&self, origin: &ProcessId) -> Result<()> {
        self.write_store(origin, &HashMap::new())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Event log
    // ─────────────────────────────────────────────────────────────────────

    /// Appends an event, evicting the oldest entries beyond capacity.
    ///
    /// Event writes are best-effort by policy: on a quota rejection the
    /// oldest half of the log is evicted and the write retried once; if the
    /// medium still refuses, the event is dropped. Failures never reach the
    /// caller — session-record writes outrank the audit log.
    pub fn append_event(&self, origin: &ProcessId, event: SessionEvent) {
        let mut events = self.read_events();
        events.push(event);
        if events.len() > EVENT_LOG_CAPACITY {
            let excess = events.len() - EVENT_LOG_CAPACITY;
            events.drain(..excess);
        }

        match self.write_events(origin, &events) {
            Ok(()) => {}
            Err(err) if err.is_quota() => {
                let kept = newest_half(events);
                if let Err(err) = self.write_events(origin, &kept) {
                    warn!(error = %err, "Dropping coordination event after log eviction");
                }
            }
            Err(err) => {
                warn!(error = %err, "Dropping coordination event");
            }
        }
    }

    fn write_events(&self, origin: &ProcessId, events: &[SessionEvent]) -> Result<()> {
        let raw = serde_json::to_string(events)
            .map_err(|e| crate::error::PresenceError::json("encoding event log", e))?;
        self.medium.write(origin, EVENTS_KEY, &raw)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Store write with quota fallback
    // ─────────────────────────────────────────────────────────────────────

    fn write_store(&self, origin: &ProcessId, map: &HashMap<String, SessionRecord>) -> Result<()> {
        let raw = serde_json::to_string(map)
            .map_err(|e| crate::error::PresenceError::json("encoding session store", e))?;
        match self.medium.write(origin, STORE_KEY, &raw) {
            Ok(()) => Ok(()),
            Err(err) if err.is_quota() => {
                // Make room at the expense of audit history, then retry once.
                self.evict_oldest_half_of_events(origin);
                self.medium.write(origin, STORE_KEY, &raw)
            }
            Err(err) => Err(err),
        }
    }

    fn evict_oldest_half_of_events(&self, origin: &ProcessId) {
        let events = self.read_events();
        if events.is_empty() {
            return;
        }
        let kept = newest_half(events);
        let outcome = if kept.is_empty() {
            self.medium.remove(origin, EVENTS_KEY)
        } else {
            self.write_events(origin, &kept)
        };
        if let Err(err) = outcome {
            warn!(error = %err, "Failed to evict event log for quota recovery");
        }
    }
}

/// Keeps the newest ⌊n/2⌋ events (a single event evicts to nothing, so a
/// quota retry always has strictly less to write).
fn newest_half(mut events: Vec<SessionEvent>) -> Vec<SessionEvent> {
    let cut = (events.len() + 1) / 2;
    events.split_off(cut)
}

fn parse_store(raw: &str) -> HashMap<String, SessionRecord> {
    if raw.trim().is_empty() {
        return HashMap::new();
    }
    match serde_json::from_str(raw) {
        Ok(map) => map,
        Err(err) => {
            warn!(error = %err, key = STORE_KEY, "Malformed session store, treating as empty");
            HashMap::new()
        }
    }
}

fn parse_events(raw: &str) -> Vec<SessionEvent> {
    if raw.trim().is_empty() {
        return Vec::new();
    }
    match serde_json::from_str(raw) {
        Ok(events) => events,
        Err(err) => {
            warn!(error = %err, key = EVENTS_KEY, "Malformed event log, treating as empty");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::medium::MemoryMedium;
    use crate::store::events::EventKind;
    use crate::store::types::SessionRecord;
    use chrono::Utc;

    fn store_over(medium: Arc<dyn SharedMedium>) -> SharedStore {
        SharedStore::new(medium)
    }

    fn register(store: &SharedStore, id: &ProcessId) -> SessionRecord {
        store
            .mutate_own(id, 0, |existing| {
                let mut record = SessionRecord::initial(id.clone(), Utc::now());
                record.version = existing.map_or(0, |r| r.version + 1);
                record
            })
            .unwrap()
    }

    #[test]
    fn test_read_missing_key_is_empty() {
        let store = store_over(MemoryMedium::new());
        assert!(store.read().is_empty());
        assert!(store.read_events().is_empty());
    }

    #[test]
    fn test_read_corrupt_store_is_empty() {
        let medium = MemoryMedium::new();
        let origin = ProcessId::from("ext");
        medium.write(&origin, STORE_KEY, "{not json").unwrap();
        medium.write(&origin, EVENTS_KEY, "[broken").unwrap();

        let store = store_over(medium);
        assert!(store.read().is_empty());
        assert!(store.read_events().is_empty());
    }

    #[test]
    fn test_mutate_own_preserves_other_entries() {
        let medium = MemoryMedium::new();
        let store = store_over(medium);
        let a = ProcessId::from("a");
        let b = ProcessId::from("b");

        let b_record = register(&store, &b);
        register(&store, &a);

        let map = store.read();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("b"), Some(&b_record));
    }

    #[test]
    fn test_mutate_own_merges_latest_snapshot() {
        // A writes on top of state that already contains B's entry made
        // after A's previous observation; B's entry survives the merge.
        let medium = MemoryMedium::new();
        let store = store_over(Arc::clone(&medium) as Arc<dyn SharedMedium>);
        let a = ProcessId::from("a");
        let b = ProcessId::from("b");

        register(&store, &a);
        register(&store, &b);

        store
            .mutate_own(&a, 0, |existing| {
                let mut record = existing.expect("a registered").clone();
                record.role = Some("ADMIN".to_string());
                record.version += 1;
                record
            })
            .unwrap();

        let map = store.read();
        assert!(map.contains_key("b"), "merge must not clobber b");
        assert_eq!(map.get("a").unwrap().role.as_deref(), Some("ADMIN"));
    }

    #[test]
    fn test_remove_own_leaves_others() {
        let store = store_over(MemoryMedium::new());
        let a = ProcessId::from("a");
        let b = ProcessId::from("b");
        register(&store, &a);
        register(&store, &b);

        let removed = store.remove_own(&a).unwrap();
        assert!(removed.is_some());
        let map = store.read();
        assert!(!map.contains_key("a"));
        assert!(map.contains_key("b"));
    }

    #[test]
    fn test_remove_own_absent_skips_write() {
        let medium = MemoryMedium::new();
        let store = store_over(Arc::clone(&medium) as Arc<dyn SharedMedium>);
        let a = ProcessId::from("a");
        assert!(store.remove_own(&a).unwrap().is_none());
        // Nothing was ever written.
        assert_eq!(medium.read(STORE_KEY), None);
    }

    #[test]
    fn test_clear_all_wipes_everything() {
        let store = store_over(MemoryMedium::new());
        let a = ProcessId::from("a");
        let b = ProcessId::from("b");
        register(&store, &a);
        register(&store, &b);

        store.clear_all(&a).unwrap();
        assert!(store.read().is_empty());
    }

    #[test]
    fn test_event_log_is_bounded_in_arrival_order() {
        let store = store_over(MemoryMedium::new());
        let origin = ProcessId::from("a");

        let base = Utc::now();
        for i in 0..(EVENT_LOG_CAPACITY + 10) {
            let event = SessionEvent::new(
                EventKind::Updated,
                origin.clone(),
                base + chrono::Duration::milliseconds(i as i64),
            );
            store.append_event(&origin, event);
        }

        let events = store.read_events();
        assert_eq!(events.len(), EVENT_LOG_CAPACITY);
        // The N most recent, still oldest-first.
        assert_eq!(
            events.first().unwrap().timestamp,
            base + chrono::Duration::milliseconds(10)
        );
        assert_eq!(
            events.last().unwrap().timestamp,
            base + chrono::Duration::milliseconds((EVENT_LOG_CAPACITY + 9) as i64)
        );
        for pair in events.windows(2) {
            assert!(pair[0].timestamp <= pair[1].timestamp);
        }
    }

    #[test]
    fn test_store_write_outranks_event_log_under_quota() {
        // Quota sized so the record write only fits once the event log is
        // evicted: the log alone fits (≤ ~950 bytes), the record alone fits
        // (~1000 bytes), but not both.
        let medium = MemoryMedium::with_quota(1600);
        let store = store_over(Arc::clone(&medium) as Arc<dyn SharedMedium>);
        let origin = ProcessId::from("a");

        for _ in 0..10 {
            let event = SessionEvent::new(EventKind::Updated, origin.clone(), Utc::now());
            store.append_event(&origin, event);
        }
        let log_len_before = store.read_events().len();
        assert_eq!(log_len_before, 10);

        let result = store.mutate_own(&origin, 0, |_| {
            let mut record = SessionRecord::initial(origin.clone(), Utc::now());
            record.label = Some("y".repeat(800));
            record
        });

        assert!(result.is_ok(), "record write must survive via log eviction");
        assert!(store.read_events().len() < log_len_before);
        assert!(store.get(&origin).is_some());
    }

    #[test]
    fn test_append_event_dropped_when_quota_unrecoverable() {
        // Quota too small for any event log at all; appends must not panic
        // or error, and the store stays untouched.
        let medium = MemoryMedium::with_quota(8);
        let store = store_over(Arc::clone(&medium) as Arc<dyn SharedMedium>);
        let origin = ProcessId::from("a");

        let event = SessionEvent::new(EventKind::Registered, origin.clone(), Utc::now());
        store.append_event(&origin, event);
        assert!(store.read_events().is_empty());
    }

    #[test]
    fn test_newest_half_keeps_latest() {
        let origin = ProcessId::from("a");
        let base = Utc::now();
        let events: Vec<SessionEvent> = (0..5)
            .map(|i| {
                SessionEvent::new(
                    EventKind::Updated,
                    origin.clone(),
                    base + chrono::Duration::seconds(i),
                )
            })
            .collect();
        let kept = newest_half(events);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].timestamp, base + chrono::Duration::seconds(3));

        // A single-event log evicts to nothing.
        let one = vec![SessionEvent::new(
            EventKind::Updated,
            origin.clone(),
            base,
        )];
        assert!(newest_half(one).is_empty());
    }

    #[test]
    fn test_stale_snapshot_is_reread_before_merge() {
        use std::sync::Mutex;

        // Medium whose first read returns an old snapshot: simulates this
        // process's own rapid-fire writes racing each other.
        struct StaleOnce {
            inner: Arc<MemoryMedium>,
            stale: Mutex<Option<String>>,
        }
        impl SharedMedium for StaleOnce {
            fn read(&self, key: &str) -> Option<String> {
                if key == STORE_KEY {
                    if let Some(stale) = self.stale.lock().unwrap().take() {
                        return Some(stale);
                    }
                }
                self.inner.read(key)
            }
            fn write(&self, origin: &ProcessId, key: &str, value: &str) -> crate::error::Result<()> {
                self.inner.write(origin, key, value)
            }
            fn remove(&self, origin: &ProcessId, key: &str) -> crate::error::Result<()> {
                self.inner.remove(origin, key)
            }
        }

        let inner = MemoryMedium::new();
        let a = ProcessId::from("a");

        // Commit version 3 as the real latest state.
        let real = store_over(Arc::clone(&inner) as Arc<dyn SharedMedium>);
        real.mutate_own(&a, 0, |_| {
            let mut record = SessionRecord::initial(a.clone(), Utc::now());
            record.version = 3;
            record.role = Some("ADMIN".to_string());
            record
        })
        .unwrap();

        // Stage a stale snapshot carrying version 1.
        let mut stale_record = SessionRecord::initial(a.clone(), Utc::now());
        stale_record.version = 1;
        let mut stale_map = HashMap::new();
        stale_map.insert("a".to_string(), stale_record);
        let staged = serde_json::to_string(&stale_map).unwrap();

        let flaky = Arc::new(StaleOnce {
            inner,
            stale: Mutex::new(Some(staged)),
        });
        let store = store_over(flaky as Arc<dyn SharedMedium>);

        // Heartbeat-style write with floor 3: the stale version-1 snapshot
        // must be discarded for the re-read, so the committed role survives.
        let updated = store
            .mutate_own(&a, 3, |existing| {
                let mut record = existing.expect("entry present").clone();
                record.last_activity = Utc::now();
                record
            })
            .unwrap();

        assert_eq!(updated.version, 3);
        assert_eq!(updated.role.as_deref(), Some("ADMIN"));
    }
}
