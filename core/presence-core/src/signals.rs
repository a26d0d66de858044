//! Platform signal capability.
//!
//! The coordination core never talks to a host environment directly. Every
//! ambient input it needs is modeled as one of three subscriptions:
//!
//! - **storage changed**: some other process wrote a shared key (carries only
//!   the key name; the value must be re-read from the medium)
//! - **visibility changed**: this process moved between foreground/background
//! - **terminating**: this process is about to go away
//!
//! Hosts adapt their real signal sources onto a [`SignalHub`]; tests drive
//! the hub directly. This keeps the coordination logic unit-testable with no
//! host environment at all.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Handle returned by a subscription, used to unsubscribe.
pub type SignalId = u64;

type StorageCallback = Arc<dyn Fn(&str) + Send + Sync>;
type VisibilityCallback = Arc<dyn Fn(bool) + Send + Sync>;
type TerminatingCallback = Arc<dyn Fn() + Send + Sync>;

/// The three ambient inputs the coordination core consumes.
///
/// Implementations must deliver each callback at most once per emission and
/// must tolerate callbacks that themselves subscribe or unsubscribe.
pub trait PlatformSignals: Send + Sync {
    fn on_storage_changed(&self, callback: Box<dyn Fn(&str) + Send + Sync>) -> SignalId;
    fn on_visibility_changed(&self, callback: Box<dyn Fn(bool) + Send + Sync>) -> SignalId;
    fn on_terminating(&self, callback: Box<dyn Fn() + Send + Sync>) -> SignalId;
    fn unsubscribe(&self, id: SignalId);
}

/// Standard in-process implementation of [`PlatformSignals`].
///
/// One hub belongs to one process. Emitters (the shared medium's fan-out, a
/// filesystem watcher, the host's lifecycle glue) push into it; the session
/// manager subscribes out of it.
#[derive(Default)]
pub struct SignalHub {
    next_id: AtomicU64,
    storage: Mutex<HashMap<SignalId, StorageCallback>>,
    visibility: Mutex<HashMap<SignalId, VisibilityCallback>>,
    terminating: Mutex<HashMap<SignalId, TerminatingCallback>>,
}

impl SignalHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn next_id(&self) -> SignalId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Announces that a shared key changed. Called by medium adapters.
    pub fn emit_storage_changed(&self, key: &str) {
        // Snapshot under the lock, invoke outside it, so a callback may
        // subscribe/unsubscribe without deadlocking.
        let callbacks: Vec<StorageCallback> =
            self.storage.lock().unwrap().values().cloned().collect();
        for callback in callbacks {
            callback(key);
        }
    }

    /// Announces a foreground/background transition for this process.
    pub fn emit_visibility_changed(&self, visible: bool) {
        let callbacks: Vec<VisibilityCallback> =
            self.visibility.lock().unwrap().values().cloned().collect();
        for callback in callbacks {
            callback(visible);
        }
    }

    /// Announces that this process is terminating.
    pub fn emit_terminating(&self) {
        let callbacks: Vec<TerminatingCallback> =
            self.terminating.lock().unwrap().values().cloned().collect();
        for callback in callbacks {
            callback();
        }
    }
}

impl PlatformSignals for SignalHub {
    fn on_storage_changed(&self, callback: Box<dyn Fn(&str) + Send + Sync>) -> SignalId {
        let id = self.next_id();
        self.storage.lock().unwrap().insert(id, Arc::from(callback));
        id
    }

    fn on_visibility_changed(&self, callback: Box<dyn Fn(bool) + Send + Sync>) -> SignalId {
        let id = self.next_id();
        self.visibility
            .lock()
            .unwrap()
            .insert(id, Arc::from(callback));
        id
    }

    fn on_terminating(&self, callback: Box<dyn Fn() + Send + Sync>) -> SignalId {
        let id = self.next_id();
        self.terminating
            .lock()
            .unwrap()
            .insert(id, Arc::from(callback));
        id
    }

    fn unsubscribe(&self, id: SignalId) {
        self.storage.lock().unwrap().remove(&id);
        self.visibility.lock().unwrap().remove(&id);
        self.terminating.lock().unwrap().remove(&id);
    }
}
