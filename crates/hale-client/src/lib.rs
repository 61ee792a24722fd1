//! Hale Client - HTTP boundary for the lifecycle engine
//!
//! This crate owns every outbound HTTP concern:
//! - `probe` - lightweight reachability checks that never error
//! - `backend` - the typed workflow-backend client
//! - `classify` - the single place raw transport errors and backend error
//!   text are mapped into the closed `BackendError` variant set
//!
//! Everything above this boundary (trackers, the retry coordinator)
//! switches on `BackendError` variants and never sees a `reqwest::Error`.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`.

pub mod backend;
pub mod classify;
pub mod probe;

pub use backend::{AnalyticsBackend, WorkflowClient};
pub use classify::{classify_transport, TextClassifier};
pub use probe::{HttpProbe, ReachabilityProbe};
