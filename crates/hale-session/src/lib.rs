//! Hale Session - The conversation lifecycle engine
//!
//! This crate provides the coordination core behind the assistant's chat
//! surfaces:
//! - `events` - the UI event bus trackers listen on
//! - `broadcaster` - fans input activity out to every registered tracker
//! - `registry` - aggregate connection state shared across trackers
//! - `tracker` - per-conversation inactivity and connection monitoring
//! - `retry` - request retry with exponential backoff
//! - `timeout` - persisted admin session expiry with a warning window
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     chat surface (external)                  │
//! │        emits UiEvents            consumes TrackerEvents      │
//! └────────────┬─────────────────────────────▲───────────────────┘
//!              │                             │
//!              ▼                             │
//!   ┌─────────────────────┐      ┌──────────┴──────────┐
//!   │ ActivityBroadcaster │─────▶│   ActivityTracker   │  (one per
//!   │ (single listener)   │      │ inactivity + polls  │  conversation)
//!   └─────────────────────┘      └──────────┬──────────┘
//!                                           │ status changes
//!                                           ▼
//!                                ┌─────────────────────┐
//!                                │ ConnectionRegistry  │──▶ RegistryEvents
//!                                │  (shared, injected) │
//!                                └─────────────────────┘
//! ```
//!
//! The registry and broadcaster are plain injected instances constructed by
//! the composition root; there is no module-level global state.
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod broadcaster;
pub mod events;
pub mod registry;
pub mod retry;
pub mod timeout;
pub mod tracker;

pub use broadcaster::ActivityBroadcaster;
pub use events::{ScrollRegion, UiEvent, UiEventBus};
pub use registry::{ConnectionRegistry, RegistryEvent, RegistrySnapshot, RetryGuard};
pub use retry::{RetryCoordinator, RetryOutcome};
pub use timeout::{
    FileSessionStore, MemorySessionStore, PersistedSession, SessionStatus, SessionStore,
    SessionTimeoutEvent, SessionTimeoutManager,
};
pub use tracker::{ActivityTracker, TrackerEvent};
