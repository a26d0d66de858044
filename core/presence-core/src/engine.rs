//! PresenceEngine — the entry point for host applications.
//!
//! The engine composes the session manager, health monitor, and conflict
//! detector behind one surface and performs no business logic of its own.
//! Two rules govern every method here:
//!
//! - **Coordination never breaks authentication.** A failure in the shared
//!   medium is logged and degraded (empty lists, `false`, zero counts) —
//!   it is never propagated to the caller.
//! - **Conflicts are advisory.** A non-empty conflict list informs the user;
//!   nothing here blocks a sign-in or forces a logout.

use std::sync::Arc;

use chrono::Utc;
use tracing::warn;

use crate::conflict::{partition, RolePolicy};
use crate::health::{self, ActiveSession, Liveness};
use crate::identity::ProcessId;
use crate::manager::{ManagerConfig, Notification, SessionManager, SubscriberId};
use crate::medium::SharedMedium;
use crate::signals::PlatformSignals;
use crate::store::Principal;

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub manager: ManagerConfig,
    pub policy: RolePolicy,
}

/// Diagnostic counts over the shared store and event log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthReport {
    pub total: u32,
    pub fresh: u32,
    pub idle: u32,
    pub stale: u32,
    pub expired: u32,
    pub events: u32,
}

/// Facade over the coordination subsystem, one instance per process.
///
/// Explicitly constructed and disposed: the composition root calls
/// [`PresenceEngine::start`] once the process is up and
/// [`PresenceEngine::stop`] (or lets the terminating signal do it) on the
/// way out.
pub struct PresenceEngine {
    manager: SessionManager,
    policy: RolePolicy,
}

impl PresenceEngine {
    pub fn new(
        medium: Arc<dyn SharedMedium>,
        signals: Arc<dyn PlatformSignals>,
        config: EngineConfig,
    ) -> Self {
        Self {
            manager: SessionManager::new(medium, signals, config.manager),
            policy: config.policy,
        }
    }

    pub fn process_id(&self) -> &ProcessId {
        self.manager.process_id()
    }

    /// Direct access for hosts that need operations beyond the facade.
    pub fn manager(&self) -> &SessionManager {
        &self.manager
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    pub fn start(&self) {
        if let Err(err) = self.manager.start() {
            warn!(error = %err, "Session coordination unavailable, continuing without it");
        }
    }

    pub fn stop(&self) {
        self.manager.stop();
    }

    // ─────────────────────────────────────────────────────────────────────
    // Authentication state
    // ─────────────────────────────────────────────────────────────────────

    pub fn is_authenticated(&self) -> bool {
        self.manager
            .own_record()
            .is_some_and(|record| record.is_authenticated())
    }

    pub fn current_principal(&self) -> Option<Principal> {
        self.manager.own_record().and_then(|record| record.principal)
    }

    pub fn current_role(&self) -> Option<String> {
        self.manager.own_record().and_then(|record| record.role)
    }

    /// Stores what the authentication flow produced. Returns whether a
    /// write occurred (`false` for both no-op saves and coordination
    /// failures — neither affects the caller's sign-in).
    pub fn save_credential(
        &self,
        credential: Option<String>,
        principal: Option<Principal>,
        role: Option<String>,
    ) -> bool {
        match self.manager.save_credential(credential, principal, role) {
            Ok(wrote) => wrote,
            Err(err) => {
                warn!(error = %err, "Failed to publish credential to shared store");
                false
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Sessions, conflicts, health
    // ─────────────────────────────────────────────────────────────────────

    pub fn list_active_sessions(&self) -> Vec<ActiveSession> {
        health::list_active(self.manager.store(), self.manager.process_id(), Utc::now())
    }

    /// Live peers whose role is not declared compatible with ours.
    pub fn conflicts(&self) -> Vec<ActiveSession> {
        let sessions = self.list_active_sessions();
        partition(self.current_role().as_deref(), &sessions, &self.policy).conflicting
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts().is_empty()
    }

    /// Evicts expired entries; returns how many were removed.
    pub fn cleanup_expired(&self) -> u32 {
        match health::cleanup_expired(self.manager.store(), self.manager.process_id(), Utc::now())
        {
            Ok(removed) => removed as u32,
            Err(err) => {
                warn!(error = %err, "Expired-session cleanup failed");
                0
            }
        }
    }

    pub fn health(&self) -> HealthReport {
        let now = Utc::now();
        let mut report = HealthReport::default();
        for record in self.manager.store().read().into_values() {
            report.total += 1;
            match Liveness::classify(record.last_activity, now) {
                Liveness::Fresh => report.fresh += 1,
                Liveness::Idle => report.idle += 1,
                Liveness::Stale => report.stale += 1,
                Liveness::Expired => report.expired += 1,
            }
        }
        report.events = self.manager.store().read_events().len() as u32;
        report
    }

    // ─────────────────────────────────────────────────────────────────────
    // Logout & sync
    // ─────────────────────────────────────────────────────────────────────

    /// Signs out this process only; every other session stays untouched.
    pub fn logout_this_process(&self) {
        if let Err(err) = self.manager.clear_own_session() {
            warn!(error = %err, "Failed to remove own session entry");
        }
    }

    /// Signs out everywhere: wipes the whole shared store.
    pub fn logout_everywhere(&self) {
        if let Err(err) = self.manager.clear_all_sessions() {
            warn!(error = %err, "Failed to clear shared session store");
        }
    }

    /// Asks every process to re-read its session state.
    pub fn force_sync(&self) {
        self.manager.force_sync();
    }

    // ─────────────────────────────────────────────────────────────────────
    // Subscriptions
    // ─────────────────────────────────────────────────────────────────────

    pub fn subscribe<F>(&self, callback: F) -> SubscriberId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.manager.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.manager.unsubscribe(id);
    }
}
