//! The shared key-value medium.
//!
//! Everything the coordination protocol knows about the outside world is two
//! string-valued keys in a medium that every process of the same installation
//! can read and write. The medium offers no transactions, no locks, and no
//! compare-and-swap; the protocol layer ([`crate::store`]) copes with that.
//!
//! A write is tagged with the identity of the writing process so change
//! fan-out can skip the writer: a process is never notified about its own
//! writes, only about everyone else's.
//!
//! Two implementations:
//!
//! - [`MemoryMedium`] — a process-local map with synchronous fan-out to
//!   attached [`SignalHub`]s. Lets tests run any number of "processes"
//!   against genuinely shared state, and can impose a byte quota to exercise
//!   the capacity-fault policy.
//! - [`DirMedium`] — one JSON file per key in a shared directory, written
//!   atomically (temp file + rename), observed with a filesystem watcher.
//!   This is the deployment backend when the coordinating processes are
//!   separate OS processes.

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, Weak};

use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use tempfile::NamedTempFile;
use tracing::warn;

use crate::error::{PresenceError, Result};
use crate::identity::ProcessId;
use crate::signals::SignalHub;
use crate::storage::StorageConfig;

/// A durable key-value store shared by every coordinating process.
///
/// `read` returns the latest committed value, or `None` if the key was never
/// written (or was removed). `write` and `remove` carry the originating
/// process so notification fan-out excludes the writer.
pub trait SharedMedium: Send + Sync {
    fn read(&self, key: &str) -> Option<String>;
    fn write(&self, origin: &ProcessId, key: &str, value: &str) -> Result<()>;
    fn remove(&self, origin: &ProcessId, key: &str) -> Result<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryMedium
// ─────────────────────────────────────────────────────────────────────────────

/// In-process shared medium with synchronous change fan-out.
///
/// All "processes" sharing one `Arc<MemoryMedium>` see the same entries.
/// Each process attaches its own [`SignalHub`]; a write notifies every hub
/// except the writer's.
pub struct MemoryMedium {
    entries: Mutex<HashMap<String, String>>,
    listeners: Mutex<Vec<(ProcessId, Weak<SignalHub>)>>,
    quota_bytes: Option<usize>,
}

impl MemoryMedium {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            quota_bytes: None,
        })
    }

    /// A medium that rejects writes once total stored bytes would exceed
    /// `quota_bytes`. Existing values stay readable after a rejection.
    pub fn with_quota(quota_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            listeners: Mutex::new(Vec::new()),
            quota_bytes: Some(quota_bytes),
        })
    }

    /// Registers `hub` to receive change notifications for writes made by
    /// processes other than `id`.
    pub fn attach(&self, id: &ProcessId, hub: &Arc<SignalHub>) {
        self.listeners
            .lock()
            .unwrap()
            .push((id.clone(), Arc::downgrade(hub)));
    }

    fn broadcast(&self, origin: &ProcessId, key: &str) {
        let mut listeners = self.listeners.lock().unwrap();
        listeners.retain(|(_, hub)| hub.strong_count() > 0);
        let live: Vec<Arc<SignalHub>> = listeners
            .iter()
            .filter(|(id, _)| id != origin)
            .filter_map(|(_, hub)| hub.upgrade())
            .collect();
        drop(listeners);

        // Delivery happens on the writer's thread; receivers decouple via
        // their own queues (the debouncer), matching the "arrives on the
        // receiver's event queue" model.
        for hub in live {
            hub.emit_storage_changed(key);
        }
    }

    fn stored_bytes(entries: &HashMap<String, String>) -> usize {
        entries.iter().map(|(k, v)| k.len() + v.len()).sum()
    }
}

impl SharedMedium for MemoryMedium {
    fn read(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn write(&self, origin: &ProcessId, key: &str, value: &str) -> Result<()> {
        {
            let mut entries = self.entries.lock().unwrap();
            if let Some(quota) = self.quota_bytes {
                let current = Self::stored_bytes(&entries);
                let existing = entries.get(key).map_or(0, |v| key.len() + v.len());
                let prospective = current - existing + key.len() + value.len();
                if prospective > quota {
                    return Err(PresenceError::QuotaExceeded {
                        key: key.to_string(),
                    });
                }
            }
            entries.insert(key.to_string(), value.to_string());
        }
        self.broadcast(origin, key);
        Ok(())
    }

    fn remove(&self, origin: &ProcessId, key: &str) -> Result<()> {
        let existed = self.entries.lock().unwrap().remove(key).is_some();
        if existed {
            self.broadcast(origin, key);
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// DirMedium
// ─────────────────────────────────────────────────────────────────────────────

/// ENOSPC maps to the quota fault so the eviction policy applies uniformly.
const ENOSPC: i32 = 28;

/// File-backed shared medium: one JSON file per logical key.
///
/// Writes are atomic (temp file + rename) so a reader never observes a
/// partial value. Each OS process holds its own `DirMedium` over the same
/// directory; cross-process change notification comes from a filesystem
/// watcher started with [`DirMedium::watch`].
pub struct DirMedium {
    config: StorageConfig,
    /// Last value this process committed per key. The watcher compares the
    /// on-disk content against this to suppress notifications for our own
    /// writes (the medium contract is "every *other* process").
    last_written: Mutex<HashMap<String, Option<String>>>,
}

impl DirMedium {
    pub fn new(config: StorageConfig) -> Result<Arc<Self>> {
        config
            .ensure_dirs()
            .map_err(|e| PresenceError::io("creating storage root", e))?;
        Ok(Arc::new(Self {
            config,
            last_written: Mutex::new(HashMap::new()),
        }))
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Starts watching the storage directory, emitting the logical key name
    /// into `hub` whenever another process changes a key. Dropping the
    /// returned watcher stops the subscription.
    pub fn watch(self: &Arc<Self>, hub: Arc<SignalHub>) -> Result<MediumWatcher> {
        let medium = Arc::clone(self);
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
            let event = match event {
                Ok(event) => event,
                Err(err) => {
                    warn!(error = %err, "Shared medium watcher error");
                    return;
                }
            };
            for path in &event.paths {
                if let Some(key) = medium.foreign_change(path) {
                    hub.emit_storage_changed(&key);
                }
            }
        })
        .map_err(|e| PresenceError::Watch { source: e })?;

        watcher
            .watch(self.config.root(), RecursiveMode::NonRecursive)
            .map_err(|e| PresenceError::Watch { source: e })?;

        Ok(MediumWatcher { _watcher: watcher })
    }

    /// Returns the logical key if `path` reflects a change made by another
    /// process, `None` if it is outside the layout or matches our own last
    /// committed value.
    fn foreign_change(&self, path: &Path) -> Option<String> {
        let key = self.config.key_for_path(path)?;
        let on_disk = std::fs::read_to_string(path).ok();
        let last_written = self.last_written.lock().unwrap();
        match last_written.get(&key) {
            Some(ours) if *ours == on_disk => None,
            _ => Some(key),
        }
    }

    fn persist(&self, path: &Path, value: &str) -> Result<()> {
        let parent = path.parent().ok_or_else(|| {
            PresenceError::io(
                "resolving storage parent",
                std::io::Error::new(std::io::ErrorKind::NotFound, "no parent directory"),
            )
        })?;
        let mut temp =
            NamedTempFile::new_in(parent).map_err(|e| PresenceError::io("creating temp file", e))?;
        temp.write_all(value.as_bytes())
            .map_err(|e| map_write_error(path, e))?;
        temp.flush().map_err(|e| map_write_error(path, e))?;
        temp.persist(path)
            .map_err(|e| map_write_error(path, e.error))?;
        Ok(())
    }
}

fn map_write_error(path: &Path, err: std::io::Error) -> PresenceError {
    if err.raw_os_error() == Some(ENOSPC) {
        PresenceError::QuotaExceeded {
            key: path.display().to_string(),
        }
    } else {
        PresenceError::io(format!("writing {}", path.display()), err)
    }
}

impl SharedMedium for DirMedium {
    fn read(&self, key: &str) -> Option<String> {
        fs_err::read_to_string(self.config.key_file(key)).ok()
    }

    fn write(&self, _origin: &ProcessId, key: &str, value: &str) -> Result<()> {
        // Record before persisting: the watcher may fire between the rename
        // and any bookkeeping done afterwards.
        self.last_written
            .lock()
            .unwrap()
            .insert(key.to_string(), Some(value.to_string()));
        let result = self.persist(&self.config.key_file(key), value);
        if result.is_err() {
            self.last_written.lock().unwrap().remove(key);
        }
        result
    }

    fn remove(&self, _origin: &ProcessId, key: &str) -> Result<()> {
        self.last_written
            .lock()
            .unwrap()
            .insert(key.to_string(), None);
        match fs_err::remove_file(self.config.key_file(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PresenceError::io(format!("removing {key}"), e)),
        }
    }
}

/// Keeps the filesystem watcher alive; dropping it stops notifications.
pub struct MediumWatcher {
    _watcher: RecommendedWatcher,
}
