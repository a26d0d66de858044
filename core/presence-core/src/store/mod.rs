//! Shared session store and event log.
//!
//! The only true shared state in the system lives under two logical keys of
//! the shared medium:
//!
//! ```text
//! session.store   → { processId: SessionRecord }   (authoritative state)
//! session.events  → [ SessionEvent, ... ]          (bounded audit window)
//! ```
//!
//! Change notifications carry only the key name; consumers re-read. The
//! store is the source of truth, events are triggers and history.
//!
//! # Module Structure
//!
//! - [`types`]: `SessionRecord` and `Principal` wire types
//! - [`events`]: `SessionEvent` and the bounded-log capacity
//! - [`shared`]: the owner-partitioned merge write protocol

pub mod events;
pub mod shared;
pub mod types;


pub use events::{EventKind, EventPayload, SessionEvent, EVENT_LOG_CAPACITY};
pub use shared::{SharedStore, EVENTS_KEY, STORE_KEY};
pub use types::{Principal, SessionRecord};
