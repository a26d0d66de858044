//! Per-process session lifecycle.
//!
//! One `SessionManager` instance exists per coordinating process. It owns
//! the process identity, is the only writer for that identity's entry in
//! the shared store, and turns ambient signals into protocol actions:
//!
//! ```text
//! host signals ──► SessionManager ──► SharedStore ──► shared medium
//!                      │    ▲                             │
//!                      │    └── debounced own-record sync ◄┘ (other
//!                      └──► subscribers (UI)                 processes)
//! ```
//!
//! The manager is explicitly constructed and explicitly disposed:
//! [`SessionManager::start`] registers and wires timers/signals,
//! [`SessionManager::stop`] tears everything down. Nothing here is a
//! module-level singleton; the composition root owns the instance.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::debounce::Debouncer;
use crate::error::Result;
use crate::identity::ProcessId;
use crate::medium::SharedMedium;
use crate::signals::{PlatformSignals, SignalId};
use crate::store::{
    EventKind, EventPayload, Principal, SessionEvent, SessionRecord, SharedStore, EVENTS_KEY,
    STORE_KEY,
};
use crate::timer::RepeatingTimer;

/// How often a live process refreshes `last_activity`.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
/// Quiet window for coalescing change-notification bursts.
pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub heartbeat_interval: Duration,
    pub debounce_window: Duration,
    /// Display title for this process's entry.
    pub label: Option<String>,
    /// Current view/route of this process, display only.
    pub locator: Option<String>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: HEARTBEAT_INTERVAL,
            debounce_window: DEBOUNCE_WINDOW,
            label: None,
            locator: None,
        }
    }
}

/// What subscribers observe.
#[derive(Debug, Clone)]
pub enum Notification {
    /// This process's own entry changed under a remote write (`None` when
    /// it vanished, e.g. a sign-out-everywhere elsewhere).
    SessionSynced { record: Option<SessionRecord> },
    /// A peer appended a lifecycle event.
    Peer { event: SessionEvent },
}

pub type SubscriberId = u64;
type SubscriberCallback = Arc<dyn Fn(&Notification) + Send + Sync>;

#[derive(Debug)]
struct LocalState {
    running: bool,
    foreground: bool,
    /// Highest version this process has committed for its own entry; the
    /// stale-snapshot floor for merges.
    last_written_version: u64,
    /// Newest event timestamp already drained; older events are history,
    /// not news.
    last_event_seen: Option<DateTime<Utc>>,
}

impl Default for LocalState {
    fn default() -> Self {
        Self {
            running: false,
            // A process starts out visible.
            foreground: true,
            last_written_version: 0,
            last_event_seen: None,
        }
    }
}

struct Inner {
    id: ProcessId,
    store: SharedStore,
    signals: Arc<dyn PlatformSignals>,
    config: ManagerConfig,
    state: Mutex<LocalState>,
    subscribers: Mutex<HashMap<SubscriberId, SubscriberCallback>>,
    next_subscriber: AtomicU64,
    heartbeat: Mutex<Option<RepeatingTimer>>,
    debouncer: Mutex<Option<Debouncer>>,
    signal_ids: Mutex<Vec<SignalId>>,
}

/// Owns one process's coordination lifecycle.
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// A manager with a freshly minted identity.
    pub fn new(
        medium: Arc<dyn SharedMedium>,
        signals: Arc<dyn PlatformSignals>,
        config: ManagerConfig,
    ) -> Self {
        Self::with_identity(ProcessId::generate(), medium, signals, config)
    }

    /// A manager adopting a host-assigned identity.
    pub fn with_identity(
        id: ProcessId,
        medium: Arc<dyn SharedMedium>,
        signals: Arc<dyn PlatformSignals>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id,
                store: SharedStore::new(medium),
                signals,
                config,
                state: Mutex::new(LocalState::default()),
                subscribers: Mutex::new(HashMap::new()),
                next_subscriber: AtomicU64::new(0),
                heartbeat: Mutex::new(None),
                debouncer: Mutex::new(None),
                signal_ids: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn process_id(&self) -> &ProcessId {
        &self.inner.id
    }

    pub fn store(&self) -> &SharedStore {
        &self.inner.store
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().unwrap().running
    }

    /// This process's own current entry, straight from the shared store.
    pub fn own_record(&self) -> Option<SessionRecord> {
        self.inner.store.get(&self.inner.id)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Registers this process and wires heartbeat, debouncer, and platform
    /// signals. Idempotent while running.
    pub fn start(&self) -> Result<()> {
        let inner = &self.inner;

        // Events already in the log are history, not news for this process.
        let baseline = inner.store.read_events().last().map(|e| e.timestamp);
        {
            let mut state = inner.state.lock().unwrap();
            if state.running {
                return Ok(());
            }
            state.running = true;
            state.foreground = true;
            state.last_event_seen = baseline;
        }

        if let Err(err) = register(inner) {
            inner.state.lock().unwrap().running = false;
            return Err(err);
        }

        // Debounced own-record sync: re-read at fire time, forward only if
        // credential / principal id / role differ from the last forward.
        let fetch_store = inner.store.clone();
        let fetch_id = inner.id.clone();
        let sink_inner = Arc::downgrade(inner);
        let debouncer = Debouncer::new(
            inner.config.debounce_window,
            move || fetch_store.get(&fetch_id),
            |a: &Option<SessionRecord>, b: &Option<SessionRecord>| sync_key(a) == sync_key(b),
            move |record| {
                if let Some(inner) = sink_inner.upgrade() {
                    notify_subscribers(&inner, &Notification::SessionSynced { record });
                }
            },
        );
        *inner.debouncer.lock().unwrap() = Some(debouncer);

        let storage_inner = Arc::downgrade(inner);
        let storage_id = inner.signals.on_storage_changed(Box::new(move |key| {
            if let Some(inner) = storage_inner.upgrade() {
                handle_storage_changed(&inner, key);
            }
        }));
        let visibility_inner = Arc::downgrade(inner);
        let visibility_id = inner.signals.on_visibility_changed(Box::new(move |visible| {
            if let Some(inner) = visibility_inner.upgrade() {
                handle_visibility(&inner, visible);
            }
        }));
        let terminating_inner = Arc::downgrade(inner);
        let terminating_id = inner.signals.on_terminating(Box::new(move || {
            if let Some(inner) = terminating_inner.upgrade() {
                teardown(&inner);
            }
        }));
        *inner.signal_ids.lock().unwrap() = vec![storage_id, visibility_id, terminating_id];

        let tick_inner = Arc::downgrade(inner);
        let timer = RepeatingTimer::spawn(inner.config.heartbeat_interval, move || {
            if let Some(inner) = tick_inner.upgrade() {
                if let Err(err) = heartbeat(&inner) {
                    warn!(error = %err, "Heartbeat write failed");
                }
            }
        });
        *inner.heartbeat.lock().unwrap() = Some(timer);

        Ok(())
    }

    /// Cancels timers and subscriptions and removes this process's entry.
    /// Invoked by the terminating signal; safe to call repeatedly.
    pub fn stop(&self) {
        teardown(&self.inner);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Store operations
    // ─────────────────────────────────────────────────────────────────────

    /// (Re-)writes this process's initial entry and announces it.
    pub fn register(&self) -> Result<()> {
        register(&self.inner)
    }

    /// Stores what the authentication flow handed us. Writes nothing — and
    /// emits nothing — when credential, principal, and role are all
    /// unchanged. Returns whether a write occurred.
    pub fn save_credential(
        &self,
        credential: Option<String>,
        principal: Option<Principal>,
        role: Option<String>,
    ) -> Result<bool> {
        let inner = &self.inner;
        if let Some(current) = inner.store.get(&inner.id) {
            if current.credential == credential
                && current.principal == principal
                && current.role == role
            {
                debug!(process_id = %inner.id, "Credential unchanged, skipping write");
                return Ok(false);
            }
        }

        let now = Utc::now();
        let (floor, foreground) = {
            let state = inner.state.lock().unwrap();
            (state.last_written_version, state.foreground)
        };

        let record = inner.store.mutate_own(&inner.id, floor, |existing| {
            let mut record = match existing {
                Some(existing) => {
                    let mut record = existing.clone();
                    record.version = existing.version + 1;
                    record
                }
                None => initial_record(inner, now),
            };
            record.credential = credential.clone();
            record.principal = principal.clone();
            record.role = role.clone();
            record.last_activity = now;
            record.foreground = foreground;
            record
        })?;

        inner.state.lock().unwrap().last_written_version = record.version;
        inner.store.append_event(
            &inner.id,
            SessionEvent::new(EventKind::Updated, inner.id.clone(), now).with_payload(
                EventPayload {
                    role: record.role.clone(),
                    ..Default::default()
                },
            ),
        );
        poke_sync(inner);
        Ok(true)
    }

    /// Local, independent logout: removes only this process's entry.
    pub fn clear_own_session(&self) -> Result<()> {
        clear_own_session(&self.inner)
    }

    /// Privileged "sign out everywhere": wipes the entire shared store.
    pub fn clear_all_sessions(&self) -> Result<()> {
        let inner = &self.inner;
        let now = Utc::now();
        inner.store.append_event(
            &inner.id,
            SessionEvent::new(EventKind::Logout, inner.id.clone(), now)
                .with_payload(departure_payload(inner.store.get(&inner.id))),
        );
        inner.store.clear_all(&inner.id)?;
        inner.state.lock().unwrap().last_written_version = 0;
        poke_sync(inner);
        Ok(())
    }

    /// Refreshes `last_activity`/`foreground` without a version bump and
    /// without an event (peers' debouncers suppress the resulting no-op).
    pub fn heartbeat(&self) -> Result<()> {
        heartbeat(&self.inner)
    }

    /// Asks every process (this one included) to re-read its session state.
    pub fn force_sync(&self) {
        let inner = &self.inner;
        inner.store.append_event(
            &inner.id,
            SessionEvent::new(EventKind::ForceSync, inner.id.clone(), Utc::now()),
        );
        poke_sync(inner);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Subscriptions
    // ─────────────────────────────────────────────────────────────────────

    pub fn subscribe<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .lock()
            .unwrap()
            .insert(id, Arc::new(callback));
        id
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.inner.subscribers.lock().unwrap().remove(&id);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inner operations (free functions so signal callbacks can share them)
// ─────────────────────────────────────────────────────────────────────────────

/// Wakes the own-record sync evaluation. Local credential-affecting writes
/// poke too, so "session synced" covers any origin and the equality guard's
/// baseline never goes stale.
fn poke_sync(inner: &Arc<Inner>) {
    if let Some(debouncer) = inner.debouncer.lock().unwrap().as_ref() {
        debouncer.poke();
    }
}

fn initial_record(inner: &Inner, now: DateTime<Utc>) -> SessionRecord {
    let mut record = SessionRecord::initial(inner.id.clone(), now);
    record.label = inner.config.label.clone();
    record.locator = inner.config.locator.clone();
    record
}

/// The fields a remote sync is judged by.
fn sync_key(record: &Option<SessionRecord>) -> Option<(Option<&str>, Option<i64>, Option<&str>)> {
    record
        .as_ref()
        .map(|r| (r.credential.as_deref(), r.principal_id(), r.role.as_deref()))
}

fn register(inner: &Arc<Inner>) -> Result<()> {
    let now = Utc::now();
    let (floor, foreground) = {
        let state = inner.state.lock().unwrap();
        (state.last_written_version, state.foreground)
    };

    let record = inner.store.mutate_own(&inner.id, floor, |existing| {
        let mut record = initial_record(inner, now);
        record.foreground = foreground;
        record.version = existing.map_or(0, |r| r.version + 1);
        record
    })?;

    inner.state.lock().unwrap().last_written_version = record.version;
    inner.store.append_event(
        &inner.id,
        SessionEvent::new(EventKind::Registered, inner.id.clone(), now),
    );
    poke_sync(inner);
    Ok(())
}

fn heartbeat(inner: &Arc<Inner>) -> Result<()> {
    let (floor, foreground, running) = {
        let state = inner.state.lock().unwrap();
        (state.last_written_version, state.foreground, state.running)
    };
    if !running {
        return Ok(());
    }

    let now = Utc::now();
    inner.store.mutate_own(&inner.id, floor, |existing| {
        let mut record = match existing {
            Some(existing) => existing.clone(),
            // Entry vanished underneath us (a peer's sign-out-everywhere or
            // cleanup); the process is still alive, so it belongs in the
            // store. Version stays at the floor: a heartbeat is not a
            // credential change.
            None => {
                let mut record = initial_record(inner, now);
                record.version = floor;
                record
            }
        };
        record.last_activity = now;
        record.foreground = foreground;
        record
    })?;

    // A tick that raced teardown past the running check must not leave a
    // resurrected entry behind.
    if !inner.state.lock().unwrap().running {
        let _ = inner.store.remove_own(&inner.id);
    }
    Ok(())
}

fn clear_own_session(inner: &Arc<Inner>) -> Result<()> {
    let now = Utc::now();
    let departing = inner.store.get(&inner.id);

    inner.store.append_event(
        &inner.id,
        SessionEvent::new(EventKind::Logout, inner.id.clone(), now)
            .with_payload(departure_payload(departing)),
    );
    inner.store.remove_own(&inner.id)?;
    inner.store.append_event(
        &inner.id,
        SessionEvent::new(EventKind::Removed, inner.id.clone(), now),
    );
    inner.state.lock().unwrap().last_written_version = 0;
    poke_sync(inner);
    Ok(())
}

fn departure_payload(record: Option<SessionRecord>) -> EventPayload {
    let record = record.as_ref();
    EventPayload {
        principal_name: record.and_then(|r| r.principal.as_ref().map(|p| p.name.clone())),
        role: record.and_then(|r| r.role.clone()),
        removed: None,
    }
}

fn handle_storage_changed(inner: &Arc<Inner>, key: &str) {
    match key {
        STORE_KEY => poke_sync(inner),
        EVENTS_KEY => drain_events(inner),
        _ => {}
    }
}

/// Forwards peer events newer than anything already drained; own events and
/// re-observed history are suppressed.
fn drain_events(inner: &Arc<Inner>) {
    let events = inner.store.read_events();
    let fresh: Vec<SessionEvent> = {
        let mut state = inner.state.lock().unwrap();
        let cutoff = state.last_event_seen;
        let fresh = events
            .iter()
            .filter(|e| e.process_id != inner.id && cutoff.map_or(true, |c| e.timestamp > c))
            .cloned()
            .collect();
        if let Some(newest) = events.iter().map(|e| e.timestamp).max() {
            state.last_event_seen = Some(match cutoff {
                Some(cutoff) => cutoff.max(newest),
                None => newest,
            });
        }
        fresh
    };

    for event in fresh {
        if event.kind == EventKind::ForceSync {
            poke_sync(inner);
        }
        notify_subscribers(inner, &Notification::Peer { event });
    }
}

fn handle_visibility(inner: &Arc<Inner>, visible: bool) {
    inner.state.lock().unwrap().foreground = visible;
    if let Err(err) = heartbeat(inner) {
        warn!(error = %err, "Visibility write failed");
    }
}

fn teardown(inner: &Arc<Inner>) {
    let was_running = {
        let mut state = inner.state.lock().unwrap();
        std::mem::replace(&mut state.running, false)
    };

    if let Some(timer) = inner.heartbeat.lock().unwrap().take() {
        timer.cancel();
    }
    if let Some(debouncer) = inner.debouncer.lock().unwrap().take() {
        debouncer.cancel();
    }
    for id in inner.signal_ids.lock().unwrap().drain(..) {
        inner.signals.unsubscribe(id);
    }

    if was_running {
        // Best-effort within the termination window; an abrupt kill skips
        // this and peers evict the entry once it expires.
        if let Err(err) = clear_own_session(inner) {
            warn!(error = %err, "Best-effort session removal failed during teardown");
        }
    }
}

fn notify_subscribers(inner: &Arc<Inner>, notification: &Notification) {
    let callbacks: Vec<SubscriberCallback> = inner
        .subscribers
        .lock()
        .unwrap()
        .values()
        .cloned()
        .collect();
    for callback in callbacks {
        callback(notification);
    }
}
