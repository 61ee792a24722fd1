//! Hale Wire - Payload types for the workflow-automation backend
//!
//! This crate provides the request payload and response envelope exchanged
//! with the remote workflow engine over HTTP POST, including the tolerant
//! reply-shape normalization (the backend answers with either a bare string
//! or an `{"output": ...}` object).

pub mod request;
pub mod response;

pub use request::{ApplicationType, WorkflowRequest};
pub use response::{ReplyData, WorkflowResponse};
