//! End-to-end coordination scenarios: several engines, one shared medium.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{Duration as ChronoDuration, Utc};
use presence_core::{
    DirMedium, EngineConfig, EventKind, ManagerConfig, MemoryMedium, Notification,
    PlatformSignals, PresenceEngine, Principal, ProcessId, RolePolicy, SessionRecord,
    SharedMedium, SharedStore, SignalHub, StorageConfig,
};

const SETTLE: Duration = Duration::from_millis(150);

fn fast_config() -> ManagerConfig {
    ManagerConfig {
        heartbeat_interval: Duration::from_secs(600),
        debounce_window: Duration::from_millis(10),
        label: None,
        locator: None,
    }
}

fn education_policy() -> RolePolicy {
    // Students coexist with everyone; nothing else is whitelisted.
    RolePolicy::new().allow_universal("SINH_VIEN")
}

fn spawn_engine(medium: &Arc<MemoryMedium>, policy: RolePolicy) -> PresenceEngine {
    let hub = SignalHub::new();
    let engine = PresenceEngine::new(
        Arc::clone(medium) as Arc<dyn SharedMedium>,
        Arc::clone(&hub) as Arc<dyn PlatformSignals>,
        EngineConfig {
            manager: fast_config(),
            policy,
        },
    );
    medium.attach(engine.process_id(), &hub);
    engine
}

fn sign_in(engine: &PresenceEngine, token: &str, id: i64, name: &str, role: &str) {
    assert!(engine.save_credential(
        Some(token.to_string()),
        Some(Principal::new(id, name)),
        Some(role.to_string()),
    ));
}

fn conflict_ids(engine: &PresenceEngine) -> Vec<String> {
    engine
        .conflicts()
        .iter()
        .map(|s| s.record.process_id.to_string())
        .collect()
}

#[test]
fn test_role_conflicts_end_to_end() {
    let medium = MemoryMedium::new();
    let a = spawn_engine(&medium, education_policy());
    let b = spawn_engine(&medium, education_policy());

    a.start();
    b.start();
    sign_in(&a, "token-a", 1, "Ana", "ADMIN");
    sign_in(&b, "token-b", 2, "Binh", "SINH_VIEN");

    // A student session never conflicts with an admin session.
    assert!(!a.has_conflicts());
    assert!(!b.has_conflicts());

    // A lecturer signs in: not whitelisted against ADMIN.
    let c = spawn_engine(&medium, education_policy());
    c.start();
    sign_in(&c, "token-c", 3, "Chi", "GIANG_VIEN");

    assert_eq!(conflict_ids(&a), vec![c.process_id().to_string()]);
    assert_eq!(conflict_ids(&c), vec![a.process_id().to_string()]);
    assert!(!b.has_conflicts());

    a.stop();
    b.stop();
    c.stop();
}

#[test]
fn test_logout_independence() {
    let medium = MemoryMedium::new();
    let a = spawn_engine(&medium, RolePolicy::new());
    let b = spawn_engine(&medium, RolePolicy::new());
    a.start();
    b.start();
    sign_in(&a, "token-a", 1, "Ana", "ADMIN");
    sign_in(&b, "token-b", 2, "Binh", "ADMIN");

    a.logout_this_process();

    // B's own entry and authentication are untouched.
    assert!(b.is_authenticated());
    let sessions = b.list_active_sessions();
    assert_eq!(sessions.len(), 1);
    assert!(sessions[0].is_self);
    assert_eq!(
        sessions[0].record.process_id.to_string(),
        b.process_id().to_string()
    );

    a.stop();
    b.stop();
}

#[test]
fn test_peer_lifecycle_notifications() {
    let medium = MemoryMedium::new();
    let a = spawn_engine(&medium, RolePolicy::new());
    a.start();

    let kinds: Arc<Mutex<Vec<EventKind>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&kinds);
    a.subscribe(move |notification| {
        if let Notification::Peer { event } = notification {
            sink.lock().unwrap().push(event.kind);
        }
    });

    let b = spawn_engine(&medium, RolePolicy::new());
    b.start();
    sign_in(&b, "token-b", 2, "Binh", "SINH_VIEN");
    b.logout_this_process();
    thread::sleep(SETTLE);

    let observed = kinds.lock().unwrap().clone();
    assert!(observed.contains(&EventKind::Registered));
    assert!(observed.contains(&EventKind::Updated));
    assert!(observed.contains(&EventKind::Logout));
    assert!(observed.contains(&EventKind::Removed));

    a.stop();
    b.stop();
}

#[test]
fn test_expired_entries_are_cleaned_and_announced() {
    let medium = MemoryMedium::new();
    let a = spawn_engine(&medium, RolePolicy::new());
    a.start();

    // A peer that died a long time ago and never tore down.
    let ghost = ProcessId::from("ghost");
    let store = SharedStore::new(Arc::clone(&medium) as Arc<dyn SharedMedium>);
    store
        .mutate_own(&ghost, 0, |_| {
            let mut record = SessionRecord::initial(ghost.clone(), Utc::now());
            record.last_activity = Utc::now() - ChronoDuration::days(2);
            record
        })
        .unwrap();

    assert_eq!(a.cleanup_expired(), 1);
    assert!(a
        .list_active_sessions()
        .iter()
        .all(|s| s.record.process_id != ghost));

    let events = store.read_events();
    let cleaned = events
        .iter()
        .find(|e| e.kind == EventKind::Cleaned)
        .expect("cleanup announced");
    assert_eq!(cleaned.payload.as_ref().unwrap().removed, Some(1));

    a.stop();
}

#[test]
fn test_conflict_is_advisory_not_blocking() {
    let medium = MemoryMedium::new();
    let a = spawn_engine(&medium, education_policy());
    let b = spawn_engine(&medium, education_policy());
    a.start();
    b.start();
    sign_in(&a, "token-a", 1, "Ana", "ADMIN");
    sign_in(&b, "token-b", 2, "Binh", "GIANG_VIEN");

    // Both sides see the conflict, and both sessions remain authenticated
    // and fully operational.
    assert!(a.has_conflicts());
    assert!(b.has_conflicts());
    assert!(a.is_authenticated());
    assert!(b.is_authenticated());
    assert_eq!(a.list_active_sessions().len(), 2);

    a.stop();
    b.stop();
}

#[test]
fn test_dir_medium_coordinates_over_filesystem() {
    let temp = tempfile::tempdir().unwrap();
    let config = StorageConfig::with_root(temp.path().to_path_buf());

    // Two OS-process stand-ins, each with its own medium instance and
    // watcher over the same directory.
    let medium_a = DirMedium::new(config.clone()).unwrap();
    let medium_b = DirMedium::new(config).unwrap();
    let hub_a = SignalHub::new();
    let hub_b = SignalHub::new();
    let _watch_a = medium_a.watch(Arc::clone(&hub_a)).unwrap();
    let _watch_b = medium_b.watch(Arc::clone(&hub_b)).unwrap();

    let a = PresenceEngine::new(
        Arc::clone(&medium_a) as Arc<dyn SharedMedium>,
        Arc::clone(&hub_a) as Arc<dyn PlatformSignals>,
        EngineConfig {
            manager: fast_config(),
            policy: education_policy(),
        },
    );
    let b = PresenceEngine::new(
        Arc::clone(&medium_b) as Arc<dyn SharedMedium>,
        Arc::clone(&hub_b) as Arc<dyn PlatformSignals>,
        EngineConfig {
            manager: fast_config(),
            policy: education_policy(),
        },
    );

    a.start();
    b.start();
    sign_in(&a, "token-a", 1, "Ana", "ADMIN");

    // B's view converges through the filesystem watcher (or, at worst,
    // through its own next read of the shared files).
    let deadline = Instant::now() + Duration::from_secs(3);
    let mut peers = Vec::new();
    while Instant::now() < deadline {
        peers = b
            .list_active_sessions()
            .into_iter()
            .filter(|s| !s.is_self)
            .collect();
        if !peers.is_empty() {
            break;
        }
        thread::sleep(Duration::from_millis(50));
    }
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0].record.role.as_deref(), Some("ADMIN"));

    a.stop();
    b.stop();
}

#[test]
fn test_corrupted_store_never_breaks_sign_in() {
    let medium = MemoryMedium::new();
    let vandal = ProcessId::from("vandal");
    medium
        .write(&vandal, presence_core::store::STORE_KEY, "]]]garbage[[[")
        .unwrap();

    let a = spawn_engine(&medium, RolePolicy::new());
    a.start();
    sign_in(&a, "token-a", 1, "Ana", "ADMIN");
    assert!(a.is_authenticated());
    assert_eq!(a.list_active_sessions().len(), 1);

    a.stop();
}
