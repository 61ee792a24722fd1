//! Hale Core - Shared domain types for the session lifecycle engine
//!
//! This crate provides the types shared between the lifecycle engine
//! (hale-session), the backend client (hale-client), and the composition
//! root: identifiers, the conversation/transcript model, the backend error
//! taxonomy, and configuration.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod config;
pub mod conversation;
pub mod error;
pub mod ids;
pub mod message;

// Re-exports for convenience
pub use config::{RetryPolicy, SessionTimeoutConfig, TrackerConfig};
pub use conversation::{Conversation, ConversationStage, EndReason};
pub use error::{BackendError, BackendResult, ErrorClass};
pub use ids::{ConversationId, RequestToken, ServiceLabel};
pub use message::{ChatMessage, MessageRole, NoticeKind, Transcript};
