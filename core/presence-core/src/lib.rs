//! # presence-core
//!
//! Cross-process session coordination for Copresence: any number of
//! independent processes of the same installation register themselves,
//! publish and observe each other's authentication state, detect role
//! conflicts, and tear down cleanly — with no central server. The only
//! communication channel is a shared, durable key-value medium plus a
//! "something changed, re-read" notification.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime dependency. Timers and debouncing
//!   run on plain worker threads; hosts can wrap with async if needed.
//! - **Best-effort**: The medium has no transactions or locks. Writes follow
//!   an owner-partitioned merge discipline with per-entry versions; residual
//!   races are bounded and accepted (see [`store::shared`]).
//! - **Graceful degradation**: Malformed shared data reads as empty, and a
//!   coordination failure never breaks the host's authentication flow.
//! - **Explicit lifecycle**: Engines and managers are constructed and
//!   disposed by the composition root; `start()`/`stop()` own every timer
//!   and subscription. No module-level singletons.
//! - **Injected environment**: Storage and ambient signals arrive as
//!   capabilities ([`medium::SharedMedium`], [`signals::PlatformSignals`]),
//!   so the whole subsystem is unit-testable without a host.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use presence_core::{EngineConfig, MemoryMedium, PresenceEngine, SignalHub};
//!
//! let medium = MemoryMedium::new();
//! let hub = SignalHub::new();
//! let engine = PresenceEngine::new(medium, hub, EngineConfig::default());
//! engine.start();
//! let sessions = engine.list_active_sessions();
//! ```

// Public modules
pub mod conflict;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod health;
pub mod identity;
pub mod manager;
pub mod medium;
pub mod signals;
pub mod storage;
pub mod store;
pub mod timer;

// Re-export commonly used items at crate root
pub use conflict::{partition, ConflictReport, RolePolicy};
pub use engine::{EngineConfig, HealthReport, PresenceEngine};
pub use error::{PresenceError, Result};
pub use health::{cleanup_expired, list_active, ActiveSession, Liveness};
pub use identity::ProcessId;
pub use manager::{ManagerConfig, Notification, SessionManager, SubscriberId};
pub use medium::{DirMedium, MediumWatcher, MemoryMedium, SharedMedium};
pub use signals::{PlatformSignals, SignalHub, SignalId};
pub use storage::StorageConfig;
pub use store::{
    EventKind, EventPayload, Principal, SessionEvent, SessionRecord, SharedStore,
    EVENT_LOG_CAPACITY,
};
pub use timer::RepeatingTimer;
